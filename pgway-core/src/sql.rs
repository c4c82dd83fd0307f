//! SQL text construction for routine invocations.
//!
//! The gateway talks to PostgreSQL with every parameter in text format and
//! every result column coerced to text, so the invocation template rendered
//! here carries explicit casts on both sides:
//!
//! ```text
//! select "id"::text, "name"::text from "public"."get_users"("_limit" => $1::integer)
//! ```

use crate::model::Routine;
use crate::types::{TypeCategory, TypeDescriptor};

/// Double-quote an identifier, doubling internal quotes.
pub fn quote_ident(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 2);
    out.push('"');
    for c in ident.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// The select-list expression for one result column.
///
/// `bytea` columns stay uncast so binary scalars can stream as raw bytes;
/// everything else is read as wire text.
pub fn column_expression(name: &str, td: &TypeDescriptor) -> String {
    if td.is(TypeCategory::BINARY) && !td.is_array {
        quote_ident(name)
    } else {
        format!("{}::text", quote_ident(name))
    }
}

/// Render the invocation prefix for a routine: everything up to and
/// including the opening parenthesis of the argument list.
pub fn build_expression(routine: &Routine) -> String {
    let target = format!("{}.{}", quote_ident(&routine.schema), quote_ident(&routine.name));
    let mut sql = String::with_capacity(64);
    match routine.routine_type {
        crate::model::RoutineType::Table | crate::model::RoutineType::View => {
            sql.push_str("select ");
            push_column_list(&mut sql, routine);
            sql.push_str(" from ");
            sql.push_str(&target);
            return sql;
        }
        crate::model::RoutineType::Procedure => {
            sql.push_str("call ");
            sql.push_str(&target);
            sql.push('(');
            return sql;
        }
        _ => {}
    }
    if routine.is_void || (!routine.returns_record_type && !routine.returns_set) {
        // Void and scalar invocations; the trailing `::text` coercion is
        // appended after the argument list.
        sql.push_str("select ");
        sql.push_str(&target);
        sql.push('(');
    } else {
        sql.push_str("select ");
        push_column_list(&mut sql, routine);
        sql.push_str(" from ");
        sql.push_str(&target);
        sql.push('(');
    }
    sql
}

fn push_column_list(sql: &mut String, routine: &Routine) {
    for (idx, name) in routine.original_column_names.iter().enumerate() {
        if idx > 0 {
            sql.push(',');
        }
        sql.push_str(&column_expression(name, &routine.column_types[idx]));
    }
}

/// Render the argument list for the current parameter vector and close the
/// invocation. Returns the complete SQL text.
pub fn finish_expression(routine: &Routine) -> String {
    let mut sql = routine.expression.clone();
    let takes_args = sql.ends_with('(');
    if takes_args {
        for (idx, param) in routine.parameters.iter().enumerate() {
            if idx > 0 {
                sql.push(',');
            }
            sql.push_str(&quote_ident(&param.actual_name));
            sql.push_str(" => $");
            sql.push_str(&(idx + 1).to_string());
            sql.push_str("::");
            sql.push_str(&param.type_descriptor.param_cast());
        }
        sql.push(')');
    }
    // Scalar functions read their single value as text unless binary.
    if routine.routine_type == crate::model::RoutineType::Function
        && !routine.is_void
        && !routine.returns_set
        && !routine.returns_record_type
        && routine
            .column_types
            .first()
            .map(|td| !td.is(TypeCategory::BINARY) || td.is_array)
            .unwrap_or(false)
    {
        sql.push_str("::text");
    }
    sql
}

/// Render a SQL invocation where only a subset of parameters is supplied
/// (parameters with defaults omitted). `present` holds the indices of the
/// supplied parameters in routine order; placeholders are renumbered.
pub fn finish_expression_partial(routine: &Routine, present: &[usize]) -> String {
    let mut sql = routine.expression.clone();
    if sql.ends_with('(') {
        for (placeholder, &idx) in present.iter().enumerate() {
            if placeholder > 0 {
                sql.push(',');
            }
            let param = &routine.parameters[idx];
            sql.push_str(&quote_ident(&param.actual_name));
            sql.push_str(" => $");
            sql.push_str(&(placeholder + 1).to_string());
            sql.push_str("::");
            sql.push_str(&param.type_descriptor.param_cast());
        }
        sql.push(')');
    }
    if routine.routine_type == crate::model::RoutineType::Function
        && !routine.is_void
        && !routine.returns_set
        && !routine.returns_record_type
        && routine
            .column_types
            .first()
            .map(|td| !td.is(TypeCategory::BINARY) || td.is_array)
            .unwrap_or(false)
    {
        sql.push_str("::text");
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Parameter, Routine, RoutineType, Volatility};
    use crate::types::TypeDescriptor;

    fn scalar_fn(name: &str, params: &[(&str, &str)]) -> Routine {
        let mut routine = Routine {
            routine_type: RoutineType::Function,
            schema: "public".to_string(),
            name: name.to_string(),
            comment: None,
            is_strict: false,
            volatility: Volatility::Stable,
            returns_set: false,
            is_void: false,
            returns_unnamed_set: false,
            returns_record_type: false,
            column_count: 1,
            original_column_names: vec![name.to_string()],
            converted_column_names: vec![name.to_string()],
            column_types: vec![TypeDescriptor::new("integer", false)],
            parameters: params
                .iter()
                .enumerate()
                .map(|(i, (p, t))| Parameter::new(i, p, TypeDescriptor::new(t, false)))
                .collect(),
            has_variadic: false,
            expression: String::new(),
            full_definition: String::new(),
            simple_definition: String::new(),
            composite_columns: Default::default(),
            composite_array_columns: Default::default(),
        };
        routine.expression = build_expression(&routine);
        routine
    }

    #[test]
    fn scalar_invocation() {
        let routine = scalar_fn("get_x", &[("_id", "integer")]);
        assert_eq!(
            finish_expression(&routine),
            r#"select "public"."get_x"("_id" => $1::integer)::text"#
        );
    }

    #[test]
    fn set_invocation_casts_columns() {
        let mut routine = scalar_fn("ls", &[]);
        routine.returns_set = true;
        routine.returns_record_type = true;
        routine.column_count = 2;
        routine.original_column_names = vec!["name".to_string(), "age".to_string()];
        routine.converted_column_names = routine.original_column_names.clone();
        routine.column_types = vec![
            TypeDescriptor::new("text", false),
            TypeDescriptor::new("integer", false),
        ];
        routine.expression = build_expression(&routine);
        assert_eq!(
            finish_expression(&routine),
            r#"select "name"::text,"age"::text from "public"."ls"()"#
        );
    }

    #[test]
    fn partial_invocation_renumbers_placeholders() {
        let routine = scalar_fn("f", &[("_a", "integer"), ("_b", "text"), ("_c", "boolean")]);
        assert_eq!(
            finish_expression_partial(&routine, &[0, 2]),
            r#"select "public"."f"("_a" => $1::integer,"_c" => $2::boolean)::text"#
        );
    }

    #[test]
    fn table_select() {
        let mut routine = scalar_fn("users", &[]);
        routine.routine_type = RoutineType::Table;
        routine.column_count = 2;
        routine.original_column_names = vec!["id".to_string(), "name".to_string()];
        routine.converted_column_names = routine.original_column_names.clone();
        routine.column_types = vec![
            TypeDescriptor::new("integer", false),
            TypeDescriptor::new("text", false),
        ];
        routine.expression = build_expression(&routine);
        assert_eq!(
            finish_expression(&routine),
            r#"select "id"::text,"name"::text from "public"."users""#
        );
    }

    #[test]
    fn bytea_scalar_stays_uncast() {
        let mut routine = scalar_fn("get_blob", &[]);
        routine.column_types = vec![TypeDescriptor::new("bytea", false)];
        routine.expression = build_expression(&routine);
        assert_eq!(
            finish_expression(&routine),
            r#"select "public"."get_blob"()"#
        );
    }

    #[test]
    fn quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("weird\"name"), "\"weird\"\"name\"");
    }
}
