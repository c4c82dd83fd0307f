//! Runs the introspection query and decodes its 28-column rows into
//! [`Routine`] values.
//!
//! The query text is an opaque contract: the default ships in
//! `introspection.sql`, and any configured SQL returning the same column
//! vector replaces it. A configured value without whitespace is treated as
//! a function name and invoked with the ten filter parameters.

use std::collections::BTreeMap;

use pgway_core::model::{CompositeColumn, Parameter, Routine, RoutineType, Volatility};
use pgway_core::naming::to_camel_case;
use pgway_core::options::MetadataOptions;
use pgway_core::sql::{build_expression, quote_ident};
use pgway_core::types::{CompositeFields, TypeDescriptor};
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::debug;

use crate::error::DbError;

/// The default introspection query.
pub const DEFAULT_QUERY: &str = include_str!("introspection.sql");

/// The SQL to execute for a metadata configuration.
pub fn introspection_sql(options: &MetadataOptions) -> String {
    match options.query.as_deref().map(str::trim) {
        None | Some("") => DEFAULT_QUERY.to_string(),
        Some(query) if query.contains(char::is_whitespace) => query.to_string(),
        Some(function_name) => format!(
            "select * from {}($1::text,$2::text,$3::text[],$4::text[],$5::text,$6::text,\
             $7::text[],$8::text[],$9::text[],$10::text[])",
            function_name
                .split('.')
                .map(quote_ident)
                .collect::<Vec<_>>()
                .join(".")
        ),
    }
}

/// Run the introspection query and decode every row.
pub async fn discover(
    client: &tokio_postgres::Client,
    options: &MetadataOptions,
) -> Result<Vec<Routine>, DbError> {
    let sql = introspection_sql(options);
    let params: [&(dyn ToSql + Sync); 10] = [
        &options.schema_similar_to,
        &options.schema_not_similar_to,
        &options.include_schemas,
        &options.exclude_schemas,
        &options.name_similar_to,
        &options.name_not_similar_to,
        &options.include_names,
        &options.exclude_names,
        &options.include_languages,
        &options.exclude_languages,
    ];
    let rows = client
        .query(&sql, &params)
        .await
        .map_err(DbError::Execute)?;
    debug!(routines = rows.len(), "introspection complete");
    rows.iter().map(decode_row).collect()
}

fn get<'a, T: tokio_postgres::types::FromSql<'a>>(
    row: &'a Row,
    idx: usize,
    what: &str,
) -> Result<T, DbError> {
    row.try_get(idx)
        .map_err(|e| DbError::Decode(format!("column {idx} ({what}): {e}")))
}

/// Parse a JSON `[[…], …]` column of per-entry string lists.
fn parse_nested_lists(raw: Option<String>, what: &str) -> Result<Vec<Vec<String>>, DbError> {
    match raw {
        None => Ok(Vec::new()),
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| DbError::Decode(format!("{what}: {e}"))),
    }
}

/// Decode one introspection row into a [`Routine`].
pub fn decode_row(row: &Row) -> Result<Routine, DbError> {
    let routine_type = RoutineType::parse(&get::<String>(row, 0, "type")?);
    let schema: String = get(row, 1, "schema")?;
    let name: String = get(row, 2, "name")?;
    let comment: Option<String> = get(row, 3, "comment")?;
    let is_strict: bool = get(row, 4, "is_strict")?;
    let volatility = Volatility::parse(&get::<String>(row, 5, "volatility")?);
    let returns_set: bool = get(row, 6, "returns_set")?;
    let return_type: String = get(row, 7, "return_type")?;
    let column_count: i32 = get(row, 8, "return_record_count")?;
    let original_column_names: Vec<String> = get(row, 9, "return_record_names")?;
    let raw_column_types: Vec<String> = get(row, 10, "return_record_types")?;
    let is_unnamed_record: bool = get(row, 11, "is_unnamed_record")?;
    let _param_count: i32 = get(row, 12, "param_count")?;
    let param_names: Vec<String> = get(row, 13, "param_names")?;
    let param_types: Vec<String> = get(row, 14, "param_types")?;
    let param_defaults: Vec<bool> = get(row, 15, "param_defaults")?;
    let argument_def: Option<String> = get(row, 16, "argument_def")?;
    let has_variadic: bool = get(row, 17, "has_variadic")?;
    let definition: Option<String> = get(row, 18, "definition")?;
    let simple_definition: String = get(row, 19, "simple_definition")?;
    let composite_starts: Option<Vec<i32>> = get(row, 20, "composite_columns")?;
    let composite_names: Option<Vec<String>> = get(row, 21, "composite_names")?;
    let composite_field_names =
        parse_nested_lists(get(row, 22, "composite_field_names")?, "composite_field_names")?;
    let composite_field_types =
        parse_nested_lists(get(row, 23, "composite_field_types")?, "composite_field_types")?;
    let array_starts: Option<Vec<i32>> = get(row, 24, "array_composite_columns")?;
    let array_field_names =
        parse_nested_lists(get(row, 25, "array_field_names")?, "array_field_names")?;
    let array_field_types =
        parse_nested_lists(get(row, 26, "array_field_types")?, "array_field_types")?;
    let _language: String = get(row, 27, "language")?;

    let is_void = return_type == "void";
    let column_count = if is_void { 0 } else { column_count.max(0) as usize };

    if original_column_names.len() != column_count || raw_column_types.len() != column_count {
        return Err(DbError::Decode(format!(
            "{schema}.{name}: column vectors disagree with return_record_count"
        )));
    }
    if param_names.len() != param_types.len() || param_names.len() != param_defaults.len() {
        return Err(DbError::Decode(format!(
            "{schema}.{name}: parameter vectors disagree"
        )));
    }

    let mut column_types: Vec<TypeDescriptor> = raw_column_types
        .iter()
        .map(|t| TypeDescriptor::new(t, false))
        .collect();

    // Attach element metadata to array-of-composite columns.
    let mut composite_array_columns = BTreeMap::new();
    if let Some(starts) = &array_starts {
        for (entry, &position) in starts.iter().enumerate() {
            let position = position as usize;
            let (Some(field_names), Some(field_types)) = (
                array_field_names.get(entry),
                array_field_types.get(entry),
            ) else {
                return Err(DbError::Decode(format!(
                    "{schema}.{name}: array composite metadata incomplete"
                )));
            };
            let fields = CompositeFields {
                names: field_names.iter().map(|n| to_camel_case(n)).collect(),
                fields: field_types
                    .iter()
                    .map(|t| TypeDescriptor::new(t, false))
                    .collect(),
            };
            if let Some(td) = column_types.get_mut(position) {
                td.composite = Some(fields.clone());
            }
            let column_name = original_column_names
                .get(position)
                .cloned()
                .unwrap_or_default();
            composite_array_columns.insert(
                position,
                CompositeColumn {
                    field_names: fields.names.clone(),
                    fields: fields.fields.clone(),
                    converted_name: to_camel_case(&column_name),
                    expanded: vec![position],
                },
            );
        }
    }

    // Composite columns expanded into siblings.
    let mut composite_columns = BTreeMap::new();
    if let Some(starts) = &composite_starts {
        let names = composite_names.unwrap_or_default();
        for (entry, &start) in starts.iter().enumerate() {
            let start = start as usize;
            let (Some(field_names), Some(field_types), Some(declared)) = (
                composite_field_names.get(entry),
                composite_field_types.get(entry),
                names.get(entry),
            ) else {
                return Err(DbError::Decode(format!(
                    "{schema}.{name}: composite metadata incomplete"
                )));
            };
            composite_columns.insert(
                start,
                CompositeColumn {
                    field_names: field_names.iter().map(|n| to_camel_case(n)).collect(),
                    fields: field_types
                        .iter()
                        .map(|t| TypeDescriptor::new(t, false))
                        .collect(),
                    converted_name: to_camel_case(declared),
                    expanded: (start..start + field_names.len()).collect(),
                },
            );
        }
    }

    let parameters = param_names
        .iter()
        .zip(&param_types)
        .zip(&param_defaults)
        .enumerate()
        .map(|(ordinal, ((param_name, param_type), &has_default))| {
            Parameter::new(ordinal, param_name, TypeDescriptor::new(param_type, has_default))
        })
        .collect();

    let returns_record_type =
        return_type == "record" || column_count > 1 || !composite_columns.is_empty();

    let mut routine = Routine {
        routine_type,
        schema,
        name,
        comment,
        is_strict,
        volatility,
        returns_set,
        is_void,
        returns_unnamed_set: returns_set && is_unnamed_record,
        returns_record_type,
        column_count,
        converted_column_names: original_column_names
            .iter()
            .map(|n| to_camel_case(n))
            .collect(),
        original_column_names,
        column_types,
        parameters,
        has_variadic,
        expression: String::new(),
        full_definition: definition.unwrap_or_else(|| argument_def.unwrap_or_default()),
        simple_definition,
        composite_columns,
        composite_array_columns,
    };
    routine.expression = build_expression(&routine);
    routine
        .check_invariants()
        .map_err(DbError::Decode)?;
    Ok(routine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_query_is_used_when_unconfigured() {
        let options = MetadataOptions::default();
        assert_eq!(introspection_sql(&options), DEFAULT_QUERY);
    }

    #[test]
    fn whitespace_free_query_becomes_function_invocation() {
        let options = MetadataOptions {
            query: Some("meta.discover".to_string()),
            ..MetadataOptions::default()
        };
        let sql = introspection_sql(&options);
        assert!(sql.starts_with(r#"select * from "meta"."discover"($1::text"#));
        assert!(sql.contains("$10::text[]"));
    }

    #[test]
    fn sql_with_whitespace_is_used_verbatim() {
        let options = MetadataOptions {
            query: Some("select * from my_view".to_string()),
            ..MetadataOptions::default()
        };
        assert_eq!(introspection_sql(&options), "select * from my_view");
    }
}
