//! Response streaming: rows in, HTTP body out.
//!
//! Row sets are written as a JSON array while rows are still being fetched,
//! flushed every `buffer_rows` through a bounded channel into the response
//! body. Scalars and void routines produce complete responses. The
//! composite-nesting pass re-groups columns that the metadata builder
//! expanded out of composite-returning columns.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::TryStreamExt;
use http::{header, HeaderName, HeaderValue, StatusCode};
use pgway_cache::{CachedResponse, ResultCache};
use pgway_core::convert::{append_column_value, append_json_string, quote_text};
use pgway_core::endpoint::{RoutineEndpoint, TextResponseNullHandling};
use pgway_core::model::Routine;
use pgway_core::types::TypeCategory;
use tokio_postgres::{Row, RowStream};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::error::GatewayError;

/// Owns the database connection for the duration of a request or response
/// stream. Pooled clients recycle on drop; dedicated (notice-capturing)
/// connections close.
pub enum ClientHolder {
    Pooled(deadpool_postgres::Client),
    Dedicated(tokio_postgres::Client),
}

impl ClientHolder {
    pub fn client(&self) -> &tokio_postgres::Client {
        match self {
            ClientHolder::Pooled(client) => client,
            ClientHolder::Dedicated(client) => client,
        }
    }
}

/// What the routine's return shape means for the response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseShape {
    Void,
    Scalar,
    RowSet,
}

pub fn shape(routine: &Routine) -> ResponseShape {
    if routine.is_void {
        ResponseShape::Void
    } else if !routine.returns_set && routine.column_count <= 1 && !routine.returns_record_type {
        ResponseShape::Scalar
    } else {
        ResponseShape::RowSet
    }
}

/// Column texts of one all-text row.
pub fn row_texts(row: &Row) -> Result<Vec<Option<String>>, GatewayError> {
    (0..row.len())
        .map(|idx| {
            row.try_get::<_, Option<&str>>(idx)
                .map(|v| v.map(String::from))
                .map_err(|e| GatewayError::Internal(format!("row decode: {e}")))
        })
        .collect()
}

/// Render one row as a JSON object (named record) or JSON array (unnamed
/// record), applying the composite-nesting pass.
pub fn render_row_json(out: &mut String, values: &[Option<String>], routine: &Routine) {
    if routine.returns_unnamed_set {
        out.push('[');
        for (idx, value) in values.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            match routine.column_types.get(idx) {
                Some(td) => append_column_value(out, value.as_deref(), td),
                None => out.push_str("null"),
            }
        }
        out.push(']');
        return;
    }

    out.push('{');
    let mut first = true;
    let mut idx = 0;
    while idx < values.len() {
        // A column opening a composite expansion emits the whole nested
        // object and consumes its sibling columns.
        if let Some(info) = routine.composite_columns.get(&idx) {
            if !first {
                out.push(',');
            }
            first = false;
            append_json_string(out, &info.converted_name);
            out.push(':');
            let all_null = info
                .expanded
                .iter()
                .all(|&col| values.get(col).map(|v| v.is_none()).unwrap_or(true));
            if all_null {
                out.push_str("null");
            } else {
                out.push('{');
                for (field, &col) in info.expanded.iter().enumerate() {
                    if field > 0 {
                        out.push(',');
                    }
                    append_json_string(out, &info.field_names[field]);
                    out.push(':');
                    let value = values.get(col).and_then(|v| v.as_deref());
                    append_column_value(out, value, &info.fields[field]);
                }
                out.push('}');
            }
            idx += info.expanded.len();
            continue;
        }
        if !first {
            out.push(',');
        }
        first = false;
        append_json_string(out, &routine.converted_column_names[idx]);
        out.push(':');
        append_column_value(
            out,
            values[idx].as_deref(),
            &routine.column_types[idx],
        );
        idx += 1;
    }
    out.push('}');
}

/// Render one row in raw mode: values joined by the value separator, nulls
/// as empty strings, no JSON shaping.
pub fn render_row_raw(out: &mut String, values: &[Option<String>], endpoint: &RoutineEndpoint) {
    let sep = endpoint.raw_value_separator.as_deref().unwrap_or(",");
    for (idx, value) in values.iter().enumerate() {
        if idx > 0 {
            out.push_str(sep);
        }
        if let Some(value) = value {
            out.push_str(value);
        }
    }
}

fn apply_response_headers(response: &mut Response, endpoint: &RoutineEndpoint) {
    for (name, value) in &endpoint.response_headers {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            value.parse::<HeaderValue>(),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    if endpoint.security_sensitive {
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }
}

fn content_type_for(endpoint: &RoutineEndpoint, fallback: &'static str) -> String {
    endpoint
        .response_content_type
        .clone()
        .unwrap_or_else(|| fallback.to_string())
}

/// Build the response for a scalar routine from its (optional) single row.
pub fn scalar_response(
    endpoint: &RoutineEndpoint,
    routine: &Routine,
    row: Option<&Row>,
) -> Result<(Response, Option<CachedResponse>), GatewayError> {
    let Some(row) = row else {
        return Ok((StatusCode::NO_CONTENT.into_response(), None));
    };
    let td = routine
        .column_types
        .first()
        .cloned()
        .unwrap_or_else(|| pgway_core::types::TypeDescriptor::new("text", false));

    // Binary scalars stream the raw bytes; never cached.
    if td.is(TypeCategory::BINARY) && !td.is_array {
        let bytes: Option<Vec<u8>> = row
            .try_get(0)
            .map_err(|e| GatewayError::Internal(format!("row decode: {e}")))?;
        let content_type = content_type_for(endpoint, "application/octet-stream");
        let mut response = match bytes {
            Some(bytes) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, content_type)],
                bytes,
            )
                .into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        };
        apply_response_headers(&mut response, endpoint);
        return Ok((response, None));
    }

    let value: Option<&str> = row
        .try_get(0)
        .map_err(|e| GatewayError::Internal(format!("row decode: {e}")))?;

    // Raw mode: the column text exactly as the server sent it.
    if endpoint.raw {
        let content_type = content_type_for(endpoint, "text/plain");
        let body = value.unwrap_or_default().to_string();
        let mut response =
            (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response();
        apply_response_headers(&mut response, endpoint);
        return Ok((response, None));
    }

    let json_shaped = td.is(TypeCategory::JSON) || td.is_array || td.composite.is_some();
    let (status, content_type, body) = if json_shaped {
        let mut out = String::new();
        append_column_value(&mut out, value, &td);
        (
            StatusCode::OK,
            content_type_for(endpoint, "application/json"),
            out,
        )
    } else {
        match value {
            Some(text) => (
                StatusCode::OK,
                content_type_for(endpoint, "text/plain"),
                text.to_string(),
            ),
            None => match endpoint.text_response_null_handling {
                TextResponseNullHandling::EmptyString => (
                    StatusCode::OK,
                    content_type_for(endpoint, "text/plain"),
                    String::new(),
                ),
                TextResponseNullHandling::NullLiteral => (
                    StatusCode::OK,
                    content_type_for(endpoint, "text/plain"),
                    "null".to_string(),
                ),
                TextResponseNullHandling::NoContent => {
                    return Ok((StatusCode::NO_CONTENT.into_response(), None));
                }
            },
        }
    };

    let cacheable = CachedResponse {
        status: status.as_u16(),
        content_type: content_type.clone(),
        body: Bytes::copy_from_slice(body.as_bytes()),
    };
    let mut response =
        (status, [(header::CONTENT_TYPE, content_type)], body).into_response();
    apply_response_headers(&mut response, endpoint);
    Ok((response, Some(cacheable)))
}

/// Context for caching a streamed row set.
pub struct StreamCache {
    pub cache: ResultCache,
    pub key: String,
    pub ttl: Option<std::time::Duration>,
}

/// Stream a row set as the response body.
///
/// The client is moved into the writer task so the connection outlives the
/// stream. Rows accumulate in a flush buffer written out every
/// `buffer_rows`; when a cache context is present the whole body is also
/// accumulated until the row count exceeds `max_cacheable_rows`.
pub fn row_set_response(
    endpoint: &RoutineEndpoint,
    routine: &Routine,
    client: ClientHolder,
    rows: RowStream,
    stream_cache: Option<StreamCache>,
) -> Response {
    let raw = endpoint.raw;
    let content_type = content_type_for(
        endpoint,
        if raw { "text/plain" } else { "application/json" },
    );
    let buffer_rows = endpoint.buffer_rows.max(1);
    let task_endpoint = endpoint.clone();
    let task_routine = routine.clone();
    let cached_content_type = content_type.clone();

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(4);
    tokio::spawn(async move {
        // Holds the pooled connection for the lifetime of the stream.
        let _client = client;
        let endpoint = task_endpoint;
        let routine = task_routine;
        let mut rows = std::pin::pin!(rows);
        let mut buf = String::with_capacity(8 * 1024);
        let mut row_count: usize = 0;
        let mut cache_buf: Option<(StreamCache, String)> =
            stream_cache.map(|ctx| (ctx, String::new()));

        let line_sep = endpoint
            .raw_new_line_separator
            .as_deref()
            .unwrap_or("\n")
            .to_string();

        if raw && endpoint.raw_column_names {
            let sep = endpoint.raw_value_separator.as_deref().unwrap_or(",");
            for (idx, name) in routine.converted_column_names.iter().enumerate() {
                if idx > 0 {
                    buf.push_str(sep);
                }
                buf.push_str(&quote_text(name));
            }
            buf.push_str(&line_sep);
        } else if !raw {
            buf.push('[');
        }

        loop {
            match rows.try_next().await {
                Ok(Some(row)) => {
                    let values = match row_texts(&row) {
                        Ok(values) => values,
                        Err(err) => {
                            debug!(error = %err, "row decode failed mid-stream");
                            break;
                        }
                    };
                    if raw {
                        if row_count > 0 {
                            buf.push_str(&line_sep);
                        }
                        render_row_raw(&mut buf, &values, &endpoint);
                    } else {
                        if row_count > 0 {
                            buf.push(',');
                        }
                        render_row_json(&mut buf, &values, &routine);
                    }
                    row_count += 1;
                    // Result sets past the cacheable limit are not cached.
                    if cache_buf
                        .as_ref()
                        .is_some_and(|(ctx, _)| row_count > ctx.cache.options().max_cacheable_rows)
                    {
                        cache_buf = None;
                    }
                    if row_count % buffer_rows == 0 {
                        if let Some((_, acc)) = cache_buf.as_mut() {
                            acc.push_str(&buf);
                        }
                        if tx.send(Ok(Bytes::from(std::mem::take(&mut buf)))).await.is_err() {
                            return; // client went away
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(error = %err, "row fetch failed mid-stream");
                    break;
                }
            }
        }

        if !raw {
            buf.push(']');
        }
        if let Some((ctx, mut acc)) = cache_buf {
            acc.push_str(&buf);
            ctx.cache.add_or_update(
                ctx.key,
                CachedResponse {
                    status: 200,
                    content_type: cached_content_type,
                    body: Bytes::from(acc),
                },
                ctx.ttl,
            );
        }
        let _ = tx.send(Ok(Bytes::from(buf))).await;
    });

    let body = Body::from_stream(ReceiverStream::new(rx));
    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        body,
    )
        .into_response();
    apply_response_headers(&mut response, endpoint);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgway_core::model::{CompositeColumn, RoutineType, Volatility};
    use pgway_core::types::TypeDescriptor;
    use std::collections::BTreeMap;

    fn set_routine(columns: &[(&str, &str)]) -> Routine {
        Routine {
            routine_type: RoutineType::Function,
            schema: "public".to_string(),
            name: "ls".to_string(),
            comment: None,
            is_strict: false,
            volatility: Volatility::Stable,
            returns_set: true,
            is_void: false,
            returns_unnamed_set: false,
            returns_record_type: true,
            column_count: columns.len(),
            original_column_names: columns.iter().map(|(n, _)| n.to_string()).collect(),
            converted_column_names: columns.iter().map(|(n, _)| n.to_string()).collect(),
            column_types: columns
                .iter()
                .map(|(_, t)| TypeDescriptor::new(t, false))
                .collect(),
            parameters: Vec::new(),
            has_variadic: false,
            expression: String::new(),
            full_definition: String::new(),
            simple_definition: String::new(),
            composite_columns: BTreeMap::new(),
            composite_array_columns: BTreeMap::new(),
        }
    }

    fn values(items: &[Option<&str>]) -> Vec<Option<String>> {
        items.iter().map(|v| v.map(String::from)).collect()
    }

    #[test]
    fn shape_classification() {
        let mut r = set_routine(&[("x", "integer")]);
        assert_eq!(shape(&r), ResponseShape::RowSet);
        r.returns_set = false;
        r.returns_record_type = false;
        assert_eq!(shape(&r), ResponseShape::Scalar);
        r.is_void = true;
        assert_eq!(shape(&r), ResponseShape::Void);
    }

    #[test]
    fn named_row_renders_as_object() {
        let routine = set_routine(&[("name", "text"), ("age", "integer")]);
        let mut out = String::new();
        render_row_json(&mut out, &values(&[Some("Ada"), Some("36")]), &routine);
        assert_eq!(out, r#"{"name":"Ada","age":36}"#);

        out.clear();
        render_row_json(&mut out, &values(&[Some("Bob"), None]), &routine);
        assert_eq!(out, r#"{"name":"Bob","age":null}"#);
    }

    #[test]
    fn unnamed_row_renders_as_array() {
        let mut routine = set_routine(&[("c1", "text"), ("c2", "integer")]);
        routine.returns_unnamed_set = true;
        let mut out = String::new();
        render_row_json(&mut out, &values(&[Some("x"), Some("1")]), &routine);
        assert_eq!(out, r#"["x",1]"#);
    }

    #[test]
    fn composite_columns_regroup_into_nested_object() {
        // Columns: id, then (street, city) expanded out of an `address`
        // composite at build time.
        let mut routine = set_routine(&[
            ("id", "integer"),
            ("street", "text"),
            ("city", "text"),
        ]);
        routine.composite_columns.insert(
            1,
            CompositeColumn {
                field_names: vec!["street".to_string(), "city".to_string()],
                fields: vec![
                    TypeDescriptor::new("text", false),
                    TypeDescriptor::new("text", false),
                ],
                converted_name: "address".to_string(),
                expanded: vec![1, 2],
            },
        );
        let mut out = String::new();
        render_row_json(
            &mut out,
            &values(&[Some("7"), Some("Main St"), Some("Oslo")]),
            &routine,
        );
        assert_eq!(
            out,
            r#"{"id":7,"address":{"street":"Main St","city":"Oslo"}}"#
        );

        // All composite fields NULL → the nested object is null.
        out.clear();
        render_row_json(&mut out, &values(&[Some("7"), None, None]), &routine);
        assert_eq!(out, r#"{"id":7,"address":null}"#);
    }

    #[test]
    fn raw_row_joins_values() {
        let routine = set_routine(&[("a", "text"), ("b", "text")]);
        let mut endpoint = RoutineEndpoint::for_routine(&routine, "/api");
        endpoint.raw = true;
        endpoint.raw_value_separator = Some(";".to_string());
        let mut out = String::new();
        render_row_raw(&mut out, &values(&[Some("x"), None]), &endpoint);
        assert_eq!(out, "x;");
    }

    fn scalar_routine(ty: &str) -> Routine {
        let mut r = set_routine(&[("get_x", ty)]);
        r.returns_set = false;
        r.returns_record_type = false;
        r
    }

    #[test]
    fn scalar_null_handling() {
        let routine = scalar_routine("integer");
        let mut endpoint = RoutineEndpoint::for_routine(&routine, "/api");

        endpoint.text_response_null_handling = TextResponseNullHandling::NoContent;
        // A NULL scalar can't be produced without a Row here; the no-row
        // case must already be 204.
        let (response, cached) = scalar_response(&endpoint, &routine, None).unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(cached.is_none());
    }
}
