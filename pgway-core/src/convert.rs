//! PostgreSQL text-format → JSON conversion.
//!
//! Result values reach the gateway in PostgreSQL's text encoding: arrays as
//! `{e1,e2}`, composites as `(f1,f2)`, arrays of composites as
//! `{"(f1,f2)","(…)"}`. The functions here rewrite those into JSON fragments
//! appended to an output buffer, honoring the layered escape rules:
//!
//! - array-level quoting uses `\"` for a quote and `\\` for a backslash
//!   inside a quoted element;
//! - tuple-level quoting uses `""` for a quote and `\\` for a backslash
//!   inside a quoted field;
//! - arrays of composites apply the array layer first, then the tuple layer.
//!
//! Everything is pure string transformation; type knowledge comes in through
//! [`TypeDescriptor`] flags.

use crate::types::{CompositeFields, TypeCategory, TypeDescriptor};

/// Append `s` as a JSON string literal, escaping quotes, backslashes and
/// control characters.
pub fn append_json_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// `s` as a JSON string literal.
pub fn json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    append_json_string(&mut out, s);
    out
}

/// PostgreSQL-style quoting: double every internal `"` and surround with `"`.
pub fn quote_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Quote a date/time wire value, replacing the date/time separator space
/// with `T`.
pub fn quote_date_time(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        out.push(if c == ' ' { 'T' } else { c });
    }
    out.push('"');
    out
}

/// Quote one element of a PostgreSQL array literal, escaping with the
/// array-level rules (`\"` and `\\`).
fn push_array_element(out: &mut String, element: &str) {
    out.push('"');
    for c in element.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

/// Build a PostgreSQL array literal from element texts; `None` elements
/// become `NULL`.
pub fn array_literal<'a>(items: impl IntoIterator<Item = Option<&'a str>>) -> String {
    let mut out = String::from("{");
    for (idx, item) in items.into_iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        match item {
            None => out.push_str("NULL"),
            Some(element) => push_array_element(&mut out, element),
        }
    }
    out.push('}');
    out
}

/// Convert a JSON value into PostgreSQL parameter text; `None` is SQL NULL.
/// Arrays become `{…}` literals (recursively), objects stay JSON text.
pub fn json_to_pg_text(value: &serde_json::Value) -> Option<String> {
    use serde_json::Value;
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(_) => Some(value.to_string()),
        Value::Array(items) => {
            let mut out = String::from("{");
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                match item {
                    Value::Null => out.push_str("NULL"),
                    Value::Array(_) => {
                        // Nested literals sit unquoted inside the outer braces.
                        out.push_str(&json_to_pg_text(item).unwrap_or_default());
                    }
                    Value::String(s) => push_array_element(&mut out, s),
                    Value::Object(_) => push_array_element(&mut out, &item.to_string()),
                    other => out.push_str(&other.to_string()),
                }
            }
            out.push('}');
            Some(out)
        }
    }
}

/// Emit one scalar wire-text value as JSON according to its descriptor.
///
/// `was_quoted` distinguishes a quoted empty element from an absent one and
/// suppresses the `NULL` token check for quoted content.
fn append_scalar(out: &mut String, raw: &str, td: &TypeDescriptor, was_quoted: bool) {
    if !was_quoted && raw == "NULL" {
        out.push_str("null");
        return;
    }
    if td.is(TypeCategory::BOOLEAN) {
        match raw {
            "t" => out.push_str("true"),
            "f" => out.push_str("false"),
            other => out.push_str(other),
        }
    } else if td.is(TypeCategory::NUMERIC) || td.is(TypeCategory::JSON) {
        out.push_str(raw);
    } else if td.is_date_time() {
        out.push_str(&quote_date_time(raw));
    } else if let Some(fields) = &td.composite {
        append_composite(out, raw, fields);
    } else if td.base_db_type == "record" && raw.starts_with('(') {
        pg_tuple_to_json(out, raw);
    } else {
        append_json_string(out, raw);
    }
}

/// Convert a PostgreSQL array literal (`{…}`, possibly multidimensional)
/// into a JSON array.
///
/// `elem` describes the element type; numeric and boolean elements emit bare
/// tokens, JSON elements are inlined, the unquoted token `NULL` becomes
/// `null`, everything else becomes an escaped JSON string.
pub fn pg_array_to_json(out: &mut String, input: &str, elem: &TypeDescriptor) {
    let chars: Vec<char> = input.trim().chars().collect();
    if chars.first() != Some(&'{') {
        // Not an array literal after all — degrade to a plain string.
        append_json_string(out, input);
        return;
    }
    let mut i = 0usize;
    array_level(out, &chars, &mut i, elem);
}

fn array_level(out: &mut String, chars: &[char], i: &mut usize, elem: &TypeDescriptor) {
    // chars[*i] == '{'
    *i += 1;
    out.push('[');
    let mut first = true;
    while *i < chars.len() {
        match chars[*i] {
            '}' => {
                *i += 1;
                break;
            }
            ',' => {
                *i += 1;
                continue;
            }
            '{' => {
                if !first {
                    out.push(',');
                }
                first = false;
                array_level(out, chars, i, elem);
            }
            '"' => {
                if !first {
                    out.push(',');
                }
                first = false;
                let content = read_array_quoted(chars, i);
                append_scalar(out, &content, elem, true);
            }
            _ => {
                if !first {
                    out.push(',');
                }
                first = false;
                let mut tok = String::new();
                while *i < chars.len() && chars[*i] != ',' && chars[*i] != '}' {
                    tok.push(chars[*i]);
                    *i += 1;
                }
                append_scalar(out, &tok, elem, false);
            }
        }
    }
    out.push(']');
}

/// Read a `"`-quoted array element starting at the opening quote, undoing
/// the array-level `\"` / `\\` escapes.
fn read_array_quoted(chars: &[char], i: &mut usize) -> String {
    let mut content = String::new();
    *i += 1; // opening quote
    while *i < chars.len() {
        match chars[*i] {
            '\\' if *i + 1 < chars.len() => {
                content.push(chars[*i + 1]);
                *i += 2;
            }
            '"' => {
                *i += 1;
                break;
            }
            c => {
                content.push(c);
                *i += 1;
            }
        }
    }
    content
}

/// Split a composite tuple literal `(f1,f2,…)` into its fields, undoing the
/// tuple-level `""` / `\\` escapes. `None` fields were empty and unquoted —
/// SQL NULL. Returns `None` when the input is not a parseable tuple.
pub fn parse_tuple(input: &str) -> Option<Vec<Option<String>>> {
    let chars: Vec<char> = input.trim().chars().collect();
    if chars.first() != Some(&'(') {
        return None;
    }
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut was_quoted = false;
    let mut closed = false;
    let mut i = 1usize;
    while i < chars.len() {
        match chars[i] {
            '"' => {
                was_quoted = true;
                i += 1;
                while i < chars.len() {
                    match chars[i] {
                        '"' if chars.get(i + 1) == Some(&'"') => {
                            cur.push('"');
                            i += 2;
                        }
                        '"' => {
                            i += 1;
                            break;
                        }
                        '\\' if i + 1 < chars.len() => {
                            cur.push(chars[i + 1]);
                            i += 2;
                        }
                        c => {
                            cur.push(c);
                            i += 1;
                        }
                    }
                }
            }
            c @ (',' | ')') => {
                fields.push(if cur.is_empty() && !was_quoted {
                    None
                } else {
                    Some(std::mem::take(&mut cur))
                });
                was_quoted = false;
                i += 1;
                if c == ')' {
                    closed = true;
                    break;
                }
            }
            c => {
                cur.push(c);
                i += 1;
            }
        }
    }
    if !closed {
        return None;
    }
    Some(fields)
}

/// Convert a tuple of unknown shape `(a,b,c)` into a JSON array of strings.
///
/// Empty fields become `null`; all present fields are strings.
pub fn pg_tuple_to_json(out: &mut String, input: &str) {
    let Some(fields) = parse_tuple(input) else {
        append_json_string(out, input);
        return;
    };
    out.push('[');
    for (idx, field) in fields.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        match field {
            None => out.push_str("null"),
            Some(value) => append_json_string(out, value),
        }
    }
    out.push(']');
}

/// Convert a composite tuple with known field metadata into a JSON object.
///
/// Fields are emitted by their descriptors: numeric/boolean/json bare, array
/// fields re-enter the array converter, nested composites recurse, strings
/// are JSON-escaped. Shapes that fail to parse degrade to an opaque string.
pub fn append_composite(out: &mut String, input: &str, fields: &CompositeFields) {
    let parsed = match parse_tuple(input) {
        Some(parsed) if parsed.len() == fields.names.len() => parsed,
        _ => {
            append_json_string(out, input);
            return;
        }
    };
    out.push('{');
    for (idx, value) in parsed.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        append_json_string(out, &fields.names[idx]);
        out.push(':');
        let td = &fields.fields[idx];
        match value {
            None => out.push_str("null"),
            Some(raw) if td.is_array => pg_array_to_json(out, raw, &td.element()),
            Some(raw) => append_scalar(out, raw, td, true),
        }
    }
    out.push('}');
}

/// Convert an array of composites `{"(f1,f2)","(…)"}` into a JSON array of
/// objects.
///
/// Two passes per element: the array-level `\"` / `\\` escapes are undone
/// into a scratch buffer, then the tuple is parsed with tuple-level
/// escaping. A `NULL` element yields `null`.
pub fn pg_composite_array_to_json(out: &mut String, input: &str, fields: &CompositeFields) {
    let chars: Vec<char> = input.trim().chars().collect();
    if chars.first() != Some(&'{') {
        append_json_string(out, input);
        return;
    }
    out.push('[');
    let mut first = true;
    let mut i = 1usize;
    while i < chars.len() {
        match chars[i] {
            '}' => break,
            ',' => {
                i += 1;
                continue;
            }
            '"' => {
                if !first {
                    out.push(',');
                }
                first = false;
                let tuple = read_array_quoted(&chars, &mut i);
                append_composite(out, &tuple, fields);
            }
            _ => {
                if !first {
                    out.push(',');
                }
                first = false;
                let mut tok = String::new();
                while i < chars.len() && chars[i] != ',' && chars[i] != '}' {
                    tok.push(chars[i]);
                    i += 1;
                }
                if tok == "NULL" {
                    out.push_str("null");
                } else {
                    append_composite(out, &tok, fields);
                }
            }
        }
    }
    out.push(']');
}

/// Emit one wire-text column value (possibly NULL) as JSON, dispatching on
/// the column descriptor. This is the single emission policy used by the
/// response streamer.
pub fn append_column_value(out: &mut String, raw: Option<&str>, td: &TypeDescriptor) {
    let Some(raw) = raw else {
        out.push_str("null");
        return;
    };
    if td.is_array {
        match &td.composite {
            Some(fields) => pg_composite_array_to_json(out, raw, fields),
            None => pg_array_to_json(out, raw, &td.element()),
        }
    } else if let Some(fields) = &td.composite {
        append_composite(out, raw, fields);
    } else {
        append_scalar(out, raw, td, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn td(name: &str) -> TypeDescriptor {
        TypeDescriptor::new(name, false)
    }

    fn array_json(input: &str, elem: &str) -> String {
        let mut out = String::new();
        pg_array_to_json(&mut out, input, &td(elem));
        out
    }

    #[test]
    fn array_of_integers() {
        assert_eq!(array_json("{1,2,3}", "integer"), "[1,2,3]");
    }

    #[test]
    fn array_of_booleans() {
        assert_eq!(array_json("{t,f,t}", "boolean"), "[true,false,true]");
    }

    #[test]
    fn array_with_null() {
        assert_eq!(array_json("{1,NULL,3}", "integer"), "[1,null,3]");
    }

    #[test]
    fn empty_array() {
        assert_eq!(array_json("{}", "integer"), "[]");
    }

    #[test]
    fn array_of_text_is_escaped() {
        assert_eq!(array_json("{a,b}", "text"), r#"["a","b"]"#);
        assert_eq!(
            array_json(r#"{"hello \"world\"","x\\y"}"#, "text"),
            r#"["hello \"world\"","x\\y"]"#
        );
    }

    #[test]
    fn quoted_null_token_stays_a_string() {
        assert_eq!(array_json(r#"{"NULL",NULL}"#, "text"), r#"["NULL",null]"#);
    }

    #[test]
    fn multidimensional_array() {
        assert_eq!(array_json("{{1,2},{3,4}}", "integer"), "[[1,2],[3,4]]");
    }

    #[test]
    fn array_of_timestamps_gets_t_separator() {
        assert_eq!(
            array_json(r#"{"2024-01-02 10:30:00"}"#, "timestamp"),
            r#"["2024-01-02T10:30:00"]"#
        );
    }

    #[test]
    fn array_of_json_is_inlined() {
        assert_eq!(
            array_json(r#"{"{\"a\": 1}"}"#, "jsonb"),
            r#"[{"a": 1}]"#
        );
    }

    #[test]
    fn tuple_with_empty_fields() {
        let mut out = String::new();
        pg_tuple_to_json(&mut out, "(a,,c)");
        assert_eq!(out, r#"["a",null,"c"]"#);
    }

    #[test]
    fn tuple_all_empty() {
        let mut out = String::new();
        pg_tuple_to_json(&mut out, "(,,)");
        assert_eq!(out, "[null,null,null]");
    }

    #[test]
    fn tuple_quoted_fields() {
        let mut out = String::new();
        pg_tuple_to_json(&mut out, r#"("hello","world")"#);
        assert_eq!(out, r#"["hello","world"]"#);
    }

    #[test]
    fn tuple_doubled_quote_is_literal() {
        let mut out = String::new();
        pg_tuple_to_json(&mut out, r#"("say ""hi""",x)"#);
        assert_eq!(out, r#"["say \"hi\"","x"]"#);
    }

    #[test]
    fn tuple_quoted_empty_field_is_empty_string() {
        let mut out = String::new();
        pg_tuple_to_json(&mut out, r#"("",)"#);
        assert_eq!(out, r#"["",null]"#);
    }

    #[test]
    fn quote_text_doubles_internal_quotes() {
        assert_eq!(quote_text(r#"say "hi""#), r#""say ""hi""""#);
        // A second layer doubles both the surround and the original escapes.
        assert_eq!(
            quote_text(&quote_text("a\"b")),
            "\"\"\"a\"\"\"\"b\"\"\"\""
        );
    }

    #[test]
    fn quote_date_time_replaces_space() {
        assert_eq!(quote_date_time("2024-01-02 10:30:00"), "\"2024-01-02T10:30:00\"");
    }

    #[test]
    fn composite_with_known_fields() {
        let fields = CompositeFields {
            names: vec!["id".into(), "label".into()],
            fields: vec![td("integer"), td("text")],
        };
        let mut out = String::new();
        append_composite(&mut out, r#"(7,"a ""b"" c")"#, &fields);
        assert_eq!(out, r#"{"id":7,"label":"a \"b\" c"}"#);
    }

    #[test]
    fn composite_null_field() {
        let fields = CompositeFields {
            names: vec!["id".into(), "label".into()],
            fields: vec![td("integer"), td("text")],
        };
        let mut out = String::new();
        append_composite(&mut out, "(7,)", &fields);
        assert_eq!(out, r#"{"id":7,"label":null}"#);
    }

    #[test]
    fn composite_field_count_mismatch_degrades_to_string() {
        let fields = CompositeFields {
            names: vec!["id".into()],
            fields: vec![td("integer")],
        };
        let mut out = String::new();
        append_composite(&mut out, "(7,8)", &fields);
        assert_eq!(out, r#""(7,8)""#);
    }

    #[test]
    fn composite_array_round_trips_nested_escapes() {
        // row('test', row(1,'hello "world"')) rendered as an array element:
        // the outer \" layer is stripped, the inner "" layer is preserved.
        let fields = CompositeFields {
            names: vec!["label".into(), "nested".into()],
            fields: vec![td("text"), td("text")],
        };
        let input = r#"{"(test,\"(1,\"\"hello \"\"\"\"world\"\"\"\")\")"}"#;
        let mut out = String::new();
        pg_composite_array_to_json(&mut out, input, &fields);
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["label"], "test");
        assert_eq!(parsed[0]["nested"], r#"(1,"hello ""world""")"#);
    }

    #[test]
    fn composite_array_simple() {
        let fields = CompositeFields {
            names: vec!["id".into(), "name".into()],
            fields: vec![td("integer"), td("text")],
        };
        let mut out = String::new();
        pg_composite_array_to_json(&mut out, r#"{"(1,Ada)","(2,Bob)"}"#, &fields);
        assert_eq!(out, r#"[{"id":1,"name":"Ada"},{"id":2,"name":"Bob"}]"#);
    }

    #[test]
    fn composite_array_null_element() {
        let fields = CompositeFields {
            names: vec!["id".into()],
            fields: vec![td("integer")],
        };
        let mut out = String::new();
        pg_composite_array_to_json(&mut out, r#"{"(1)",NULL}"#, &fields);
        assert_eq!(out, r#"[{"id":1},null]"#);
    }

    #[test]
    fn composite_with_array_field() {
        let fields = CompositeFields {
            names: vec!["tags".into()],
            fields: vec![td("text[]")],
        };
        let mut out = String::new();
        append_composite(&mut out, r#"("{a,b}")"#, &fields);
        assert_eq!(out, r#"{"tags":["a","b"]}"#);
    }

    #[test]
    fn column_value_null() {
        let mut out = String::new();
        append_column_value(&mut out, None, &td("integer"));
        assert_eq!(out, "null");
    }

    #[test]
    fn column_value_scalar_kinds() {
        let mut out = String::new();
        append_column_value(&mut out, Some("42"), &td("integer"));
        out.push(',');
        append_column_value(&mut out, Some("t"), &td("boolean"));
        out.push(',');
        append_column_value(&mut out, Some("plain"), &td("text"));
        assert_eq!(out, r#"42,true,"plain""#);
    }

    #[test]
    fn column_value_record_without_metadata_uses_tuple_parse() {
        let mut out = String::new();
        append_column_value(&mut out, Some("(a,,c)"), &td("record"));
        assert_eq!(out, r#"["a",null,"c"]"#);
    }

    #[test]
    fn array_literal_quotes_and_escapes() {
        assert_eq!(array_literal([Some("a"), None, Some("b")]), r#"{"a",NULL,"b"}"#);
        assert_eq!(array_literal([Some(r#"say "hi""#)]), r#"{"say \"hi\""}"#);
        assert_eq!(array_literal([Some(r"back\slash")]), r#"{"back\\slash"}"#);
        assert_eq!(array_literal(std::iter::empty()), "{}");
    }

    #[test]
    fn json_to_pg_text_scalars() {
        use serde_json::json;
        assert_eq!(json_to_pg_text(&json!(null)), None);
        assert_eq!(json_to_pg_text(&json!("x")).as_deref(), Some("x"));
        assert_eq!(json_to_pg_text(&json!(true)).as_deref(), Some("true"));
        assert_eq!(json_to_pg_text(&json!(1.5)).as_deref(), Some("1.5"));
        assert_eq!(
            json_to_pg_text(&json!({"a": 1})).as_deref(),
            Some(r#"{"a":1}"#)
        );
    }

    #[test]
    fn json_to_pg_text_arrays() {
        use serde_json::json;
        assert_eq!(
            json_to_pg_text(&json!([1, null, 3])).as_deref(),
            Some("{1,NULL,3}")
        );
        assert_eq!(
            json_to_pg_text(&json!(["a", "b c"])).as_deref(),
            Some(r#"{"a","b c"}"#)
        );
        assert_eq!(
            json_to_pg_text(&json!([[1, 2], [3]])).as_deref(),
            Some("{{1,2},{3}}")
        );
    }

    #[test]
    fn json_string_escapes_control_chars() {
        assert_eq!(json_string("a\nb"), "\"a\\nb\"");
        assert_eq!(json_string("a\u{01}b"), "\"a\\u0001b\"");
    }
}
