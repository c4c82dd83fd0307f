//! Default name conversion between database identifiers and the HTTP surface.
//!
//! Routine names map to kebab-case URL segments; parameter and column names
//! map to camelCase with leading underscores trimmed, so `_first_name`
//! becomes `firstName` and `get_x` becomes `get-x`.

/// `get_user_by_id` → `get-user-by-id`.
pub fn to_kebab_case(ident: &str) -> String {
    ident
        .trim_matches('_')
        .chars()
        .map(|c| if c == '_' { '-' } else { c.to_ascii_lowercase() })
        .collect()
}

/// `_first_name` → `firstName`. Names without underscores pass unchanged.
pub fn to_camel_case(ident: &str) -> String {
    let trimmed = ident.trim_start_matches('_');
    let mut out = String::with_capacity(trimmed.len());
    let mut upper_next = false;
    for c in trimmed.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kebab() {
        assert_eq!(to_kebab_case("get_x"), "get-x");
        assert_eq!(to_kebab_case("GetUsers"), "getusers");
        assert_eq!(to_kebab_case("_private_fn_"), "private-fn");
    }

    #[test]
    fn camel() {
        assert_eq!(to_camel_case("_id"), "id");
        assert_eq!(to_camel_case("_first_name"), "firstName");
        assert_eq!(to_camel_case("name"), "name");
        assert_eq!(to_camel_case("age"), "age");
    }
}
