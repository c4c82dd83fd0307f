//! Per-request parameter binding.
//!
//! For one request, produce a fully populated parameter vector in routine
//! order, or decide the request cannot be bound. Each parameter resolves
//! from exactly one source, tried in a fixed order: hash-of, user-parameter
//! injection, upload-metadata placeholder, whole-body parameter, header
//! parameter, path parameter, primary source (query string or JSON body),
//! then default / proxy-response fallback.

use std::collections::BTreeSet;
use std::sync::Arc;

use http::HeaderMap;
use pgway_auth::{CredentialHasher, UserIdentity};
use pgway_core::convert::{array_literal, json_to_pg_text};
use pgway_core::endpoint::{
    proxy_params, QueryStringNullHandling, RequestHeadersMode, RequestParamType,
};
use pgway_core::model::{ParamSource, ParamValue, Parameter};
use pgway_core::types::TypeCategory;
use serde_json::{Map, Value};
use tracing::debug;

use crate::table::{EndpointTable, Entry};

/// Everything the binder may draw values from.
pub struct BindInput<'a> {
    /// Query pairs in request order; repeated keys form arrays.
    pub query: &'a [(String, String)],
    /// Raw request body.
    pub body: Option<&'a str>,
    /// Path placeholder values from the matched route.
    pub path_params: &'a [(String, String)],
    pub headers: &'a HeaderMap,
    pub identity: Option<&'a UserIdentity>,
    pub client_ip: &'a str,
}

/// Result of binding one request.
pub enum BindOutcome {
    Bound(BoundRequest),
    /// Missing parameter without default, or an extra key. 404.
    NotFound,
    /// The routine is strict and a bound value is NULL. 204.
    StrictNull,
}

/// A bound request: the (possibly overload-switched) entry and the filled
/// parameter vector.
pub struct BoundRequest {
    pub entry: Arc<Entry>,
    pub parameters: Vec<Parameter>,
    /// Index of the upload-metadata parameter, back-filled after handlers
    /// run.
    pub upload_metadata_index: Option<usize>,
}

impl BoundRequest {
    /// Indices of parameters that actually bound (unbound ones carry
    /// defaults and are omitted from the invocation).
    pub fn present_indices(&self) -> Vec<usize> {
        self.parameters
            .iter()
            .enumerate()
            .filter(|(_, p)| p.value.is_bound())
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Wire parameter vector for the present parameters.
    pub fn wire_params(&self) -> Vec<Option<String>> {
        self.parameters
            .iter()
            .filter(|p| p.value.is_bound())
            .map(|p| p.value.as_wire().map(String::from))
            .collect()
    }
}

/// The primary parameter source, uniformly keyed.
enum PrimarySource<'a> {
    Query(&'a [(String, String)]),
    Body(Map<String, Value>),
}

impl PrimarySource<'_> {
    fn key_count(&self) -> usize {
        match self {
            PrimarySource::Query(pairs) => {
                let mut keys = BTreeSet::new();
                for (key, _) in *pairs {
                    keys.insert(key.as_str());
                }
                keys.len()
            }
            PrimarySource::Body(map) => map.len(),
        }
    }

    fn contains(&self, key: &str) -> bool {
        match self {
            PrimarySource::Query(pairs) => pairs.iter().any(|(k, _)| k == key),
            PrimarySource::Body(map) => map.contains_key(key),
        }
    }

    fn keys(&self) -> BTreeSet<&str> {
        match self {
            PrimarySource::Query(pairs) => pairs.iter().map(|(k, _)| k.as_str()).collect(),
            PrimarySource::Body(map) => map.keys().map(String::as_str).collect(),
        }
    }

    /// Raw text of a key's first value, for hash-of parameters.
    fn raw_text(&self, key: &str) -> Option<String> {
        match self {
            PrimarySource::Query(pairs) => pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone()),
            PrimarySource::Body(map) => map.get(key).and_then(json_to_pg_text),
        }
    }
}

/// Bind one request against an endpoint table entry.
///
/// When the primary source's key count does not match the routine's
/// parameter count and an overload indexed under that count exists, the
/// overload replaces the entry before binding starts.
pub fn bind(
    table: &EndpointTable,
    entry: Arc<Entry>,
    input: &BindInput<'_>,
    hasher: &dyn CredentialHasher,
) -> BindOutcome {
    let source = match entry.endpoint.request_param_type {
        RequestParamType::QueryString => PrimarySource::Query(input.query),
        RequestParamType::BodyJson => {
            let map = input
                .body
                .and_then(|body| serde_json::from_str::<Value>(body).ok())
                .and_then(|value| match value {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .unwrap_or_default();
            PrimarySource::Body(map)
        }
    };

    // Overload dispatch by supplied key count.
    let entry = {
        let supplied = source.key_count();
        if supplied != entry.routine.parameters.len() {
            match table.overload(&entry.endpoint.method, &entry.endpoint.path, supplied) {
                Some(overload) => overload.clone(),
                None => entry,
            }
        } else {
            entry
        }
    };

    let endpoint = &entry.endpoint;
    let routine = &entry.routine;
    let mut parameters = routine.clone_parameters();
    let mut upload_metadata_index = None;
    let headers_param_name =
        pgway_core::naming::to_camel_case(&endpoint.request_headers_parameter_name);

    for (idx, param) in parameters.iter_mut().enumerate() {
        // 1. Hash-of: hash the raw primary-source value of the referenced key.
        if let Some(of_key) = &param.hash_of {
            match source.raw_text(of_key) {
                Some(raw) => match hasher.hash(&raw) {
                    Ok(hash) => {
                        param.bind(ParamValue::Text(hash), Some(raw), ParamSource::BodyParam);
                    }
                    Err(err) => {
                        debug!(error = %err, "password hashing failed");
                        return BindOutcome::NotFound;
                    }
                },
                None => param.bind(ParamValue::Null, None, ParamSource::BodyParam),
            }
            continue;
        }

        // 2. User-parameter injection.
        if endpoint.use_user_parameters {
            if param.is_ip_address {
                param.bind(
                    ParamValue::Text(input.client_ip.to_string()),
                    Some(input.client_ip.to_string()),
                    ParamSource::HeaderParam,
                );
                continue;
            }
            if let Some(claim) = &param.user_claim {
                if let Some(identity) = input.identity {
                    let value = identity.claim_as_text(claim);
                    match value {
                        Some(text) => param.bind(
                            ParamValue::Text(text.clone()),
                            Some(text),
                            ParamSource::HeaderParam,
                        ),
                        None => param.bind(ParamValue::Null, None, ParamSource::HeaderParam),
                    }
                    continue;
                }
            }
            if param.is_user_claims {
                if let Some(identity) = input.identity {
                    let json = identity.claims_json();
                    param.bind(
                        ParamValue::Text(json.clone()),
                        Some(json),
                        ParamSource::HeaderParam,
                    );
                    continue;
                }
            }
        }

        // 3. Upload-metadata placeholder, back-filled after handlers run.
        if param.is_upload_metadata {
            param.bind(ParamValue::Null, None, ParamSource::BodyParam);
            upload_metadata_index = Some(idx);
            continue;
        }

        // 4. Whole-body parameter.
        if endpoint.body_parameter_name.as_deref() == Some(param.converted_name.as_str()) {
            match input.body {
                Some(body) => param.bind(
                    ParamValue::Text(body.to_string()),
                    Some(body.to_string()),
                    ParamSource::BodyParam,
                ),
                None => param.bind(ParamValue::Null, None, ParamSource::BodyParam),
            }
            continue;
        }

        // 5. Header parameter: only when the primary source has no such key.
        if endpoint.request_headers_mode == RequestHeadersMode::Parameter
            && param.converted_name == headers_param_name
            && !source.contains(&param.converted_name)
        {
            let json = headers_json(input.headers);
            param.bind(
                ParamValue::Text(json.clone()),
                Some(json),
                ParamSource::HeaderParam,
            );
            continue;
        }

        // 6. Path parameter.
        if endpoint
            .path_parameters
            .iter()
            .any(|name| *name == param.converted_name)
        {
            if let Some((_, value)) = input
                .path_params
                .iter()
                .find(|(name, _)| *name == param.converted_name)
            {
                param.bind(
                    ParamValue::Text(value.clone()),
                    Some(value.clone()),
                    ParamSource::PathParam,
                );
                continue;
            }
        }

        // 7. Primary source.
        match &source {
            PrimarySource::Query(pairs) => {
                let values: Vec<&str> = pairs
                    .iter()
                    .filter(|(k, _)| *k == param.converted_name)
                    .map(|(_, v)| v.as_str())
                    .collect();
                // An empty value under `Ignore` handling counts as absent
                // and falls through to default resolution.
                if !values.is_empty()
                    && bind_from_query(param, &values, endpoint.query_string_null_handling)
                {
                    continue;
                }
            }
            PrimarySource::Body(map) => {
                if let Some(value) = map.get(&param.converted_name) {
                    bind_from_json(param, value);
                    continue;
                }
            }
        }

        // 8. Defaults and proxy-response parameters; otherwise unbindable.
        if param.type_descriptor.has_default {
            continue; // stays unbound, omitted from the invocation
        }
        if endpoint.is_proxy && proxy_params::is_proxy_param(&param.actual_name) {
            param.bind(ParamValue::Null, None, ParamSource::BodyParam);
            continue;
        }
        debug!(
            parameter = %param.converted_name,
            routine = %routine.display_name(),
            "no binding for parameter"
        );
        return BindOutcome::NotFound;
    }

    // Extra-key rejection (passthrough proxies skip it: the query string is
    // forwarded upstream instead of bound). Keys consumed indirectly — the
    // hash-of source key and the whole-body parameter — count as known.
    if !endpoint.is_passthrough_proxy(routine) {
        let mut known: BTreeSet<&str> = parameters
            .iter()
            .map(|p| p.converted_name.as_str())
            .collect();
        for param in &parameters {
            if let Some(of_key) = &param.hash_of {
                known.insert(of_key.as_str());
            }
        }
        if let Some(body_param) = &endpoint.body_parameter_name {
            known.insert(body_param.as_str());
        }
        for key in source.keys() {
            if !known.contains(key) {
                debug!(key, "extra parameter key");
                return BindOutcome::NotFound;
            }
        }
    }

    // Strict-function short-circuit.
    if routine.is_strict
        && parameters
            .iter()
            .any(|p| matches!(p.value, ParamValue::Null))
    {
        return BindOutcome::StrictNull;
    }

    BindOutcome::Bound(BoundRequest {
        entry: entry.clone(),
        parameters,
        upload_metadata_index,
    })
}

/// Bind from query-string values: repeated keys (or an array-typed
/// parameter) form a PostgreSQL array literal; an empty single value
/// follows the endpoint's null handling. Returns `false` when the value is
/// ignored and the parameter should resolve as absent.
fn bind_from_query(param: &mut Parameter, values: &[&str], nulls: QueryStringNullHandling) -> bool {
    if param.type_descriptor.is_array || values.len() > 1 {
        let literal = array_literal(values.iter().map(|v| Some(*v)));
        param.bind(
            ParamValue::Text(literal.clone()),
            Some(literal),
            ParamSource::QueryString,
        );
        return true;
    }
    let value = values[0];
    if value.is_empty() {
        return match nulls {
            QueryStringNullHandling::EmptyString => {
                // An empty string is only a value for text-like types;
                // everything else has no empty representation and binds NULL.
                if param.type_descriptor.is(TypeCategory::TEXT)
                    || param.type_descriptor.is(TypeCategory::JSON)
                {
                    param.bind(
                        ParamValue::Text(String::new()),
                        Some(String::new()),
                        ParamSource::QueryString,
                    );
                } else {
                    param.bind(ParamValue::Null, Some(String::new()), ParamSource::QueryString);
                }
                true
            }
            QueryStringNullHandling::NullLiteral => {
                param.bind(ParamValue::Null, Some(String::new()), ParamSource::QueryString);
                true
            }
            QueryStringNullHandling::Ignore => false,
        };
    }
    param.bind(
        ParamValue::Text(value.to_string()),
        Some(value.to_string()),
        ParamSource::QueryString,
    );
    true
}

fn bind_from_json(param: &mut Parameter, value: &Value) {
    match json_to_pg_text(value) {
        None => param.bind(ParamValue::Null, None, ParamSource::BodyJson),
        Some(text) => param.bind(
            ParamValue::Text(text.clone()),
            Some(text),
            ParamSource::BodyJson,
        ),
    }
}

/// Request headers as a JSON object (repeated headers collapse to the last
/// value).
pub fn headers_json(headers: &HeaderMap) -> String {
    let mut map = Map::new();
    for (name, value) in headers {
        map.insert(
            name.as_str().to_string(),
            Value::from(String::from_utf8_lossy(value.as_bytes()).to_string()),
        );
    }
    Value::Object(map).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::EndpointTable;
    use pgway_auth::Argon2Hasher;
    use pgway_core::endpoint::RoutineEndpoint;
    use pgway_core::model::{Routine, RoutineType, Volatility};
    use pgway_core::types::TypeDescriptor;

    fn routine(params: &[(&str, &str, bool)]) -> Routine {
        let mut r = Routine {
            routine_type: RoutineType::Function,
            schema: "public".to_string(),
            name: "get_x".to_string(),
            comment: None,
            is_strict: false,
            volatility: Volatility::Stable,
            returns_set: false,
            is_void: false,
            returns_unnamed_set: false,
            returns_record_type: false,
            column_count: 1,
            original_column_names: vec!["get_x".to_string()],
            converted_column_names: vec!["getX".to_string()],
            column_types: vec![TypeDescriptor::new("integer", false)],
            parameters: params
                .iter()
                .enumerate()
                .map(|(i, (name, ty, has_default))| {
                    Parameter::new(i, name, TypeDescriptor::new(ty, *has_default))
                })
                .collect(),
            has_variadic: false,
            expression: String::new(),
            full_definition: String::new(),
            simple_definition: String::new(),
            composite_columns: Default::default(),
            composite_array_columns: Default::default(),
        };
        r.expression = pgway_core::sql::build_expression(&r);
        r
    }

    fn table_with(routine: Routine, endpoint: RoutineEndpoint) -> (EndpointTable, Arc<Entry>) {
        let mut table = EndpointTable::default();
        table.insert(Entry { routine, endpoint });
        let entry = table.entries[0].clone();
        (table, entry)
    }

    fn entry_for(params: &[(&str, &str, bool)]) -> (EndpointTable, Arc<Entry>) {
        let r = routine(params);
        let e = RoutineEndpoint::for_routine(&r, "/api");
        table_with(r, e)
    }

    fn empty_input<'a>() -> BindInput<'a> {
        static EMPTY_HEADERS: std::sync::OnceLock<HeaderMap> = std::sync::OnceLock::new();
        BindInput {
            query: &[],
            body: None,
            path_params: &[],
            headers: EMPTY_HEADERS.get_or_init(HeaderMap::new),
            identity: None,
            client_ip: "127.0.0.1",
        }
    }

    #[test]
    fn binds_from_query_string() {
        let (table, entry) = entry_for(&[("_id", "integer", false)]);
        let query = vec![("id".to_string(), "7".to_string())];
        let input = BindInput {
            query: &query,
            ..empty_input()
        };
        let BindOutcome::Bound(bound) = bind(&table, entry, &input, &Argon2Hasher) else {
            panic!("expected bound");
        };
        assert_eq!(bound.parameters[0].value, ParamValue::Text("7".to_string()));
        assert_eq!(bound.parameters[0].source, Some(ParamSource::QueryString));
        assert_eq!(bound.wire_params(), vec![Some("7".to_string())]);
    }

    #[test]
    fn missing_parameter_without_default_is_not_found() {
        let (table, entry) = entry_for(&[("_id", "integer", false)]);
        let input = empty_input();
        assert!(matches!(
            bind(&table, entry, &input, &Argon2Hasher),
            BindOutcome::NotFound
        ));
    }

    #[test]
    fn missing_parameter_with_default_is_omitted() {
        let (table, entry) = entry_for(&[("_id", "integer", true)]);
        let input = empty_input();
        let BindOutcome::Bound(bound) = bind(&table, entry, &input, &Argon2Hasher) else {
            panic!("expected bound");
        };
        assert!(bound.present_indices().is_empty());
    }

    #[test]
    fn extra_key_is_not_found() {
        let (table, entry) = entry_for(&[("_id", "integer", false)]);
        let query = vec![
            ("id".to_string(), "7".to_string()),
            ("bogus".to_string(), "1".to_string()),
        ];
        let input = BindInput {
            query: &query,
            ..empty_input()
        };
        assert!(matches!(
            bind(&table, entry, &input, &Argon2Hasher),
            BindOutcome::NotFound
        ));
    }

    #[test]
    fn strict_null_short_circuits() {
        let mut r = routine(&[("_id", "integer", false)]);
        r.is_strict = true;
        let mut e = RoutineEndpoint::for_routine(&r, "/api");
        e.query_string_null_handling = QueryStringNullHandling::EmptyString;
        let (table, entry) = table_with(r, e);

        // `id=` (empty) has no integer representation, binds NULL, and the
        // strict routine short-circuits to 204.
        let query = vec![("id".to_string(), String::new())];
        let input = BindInput {
            query: &query,
            ..empty_input()
        };
        assert!(matches!(
            bind(&table, entry, &input, &Argon2Hasher),
            BindOutcome::StrictNull
        ));

        // A strict text parameter keeps the empty string — not null.
        let mut r = routine(&[("_name", "text", false)]);
        r.is_strict = true;
        let mut e = RoutineEndpoint::for_routine(&r, "/api");
        e.query_string_null_handling = QueryStringNullHandling::EmptyString;
        let (table, entry) = table_with(r, e);
        let query = vec![("name".to_string(), String::new())];
        let input = BindInput {
            query: &query,
            ..empty_input()
        };
        assert!(matches!(
            bind(&table, entry, &input, &Argon2Hasher),
            BindOutcome::Bound(_)
        ));
    }

    #[test]
    fn repeated_query_keys_become_array_literal() {
        let (table, entry) = entry_for(&[("_ids", "integer[]", false)]);
        let query = vec![
            ("ids".to_string(), "1".to_string()),
            ("ids".to_string(), "2".to_string()),
        ];
        let input = BindInput {
            query: &query,
            ..empty_input()
        };
        let BindOutcome::Bound(bound) = bind(&table, entry, &input, &Argon2Hasher) else {
            panic!("expected bound");
        };
        assert_eq!(
            bound.parameters[0].value,
            ParamValue::Text(r#"{"1","2"}"#.to_string())
        );
    }

    #[test]
    fn binds_from_json_body() {
        let r = routine(&[("_name", "text", false), ("_tags", "text[]", false)]);
        let mut e = RoutineEndpoint::for_routine(&r, "/api");
        e.request_param_type = RequestParamType::BodyJson;
        let (table, entry) = table_with(r, e);
        let input = BindInput {
            body: Some(r#"{"name": "ada", "tags": ["a", "b"]}"#),
            ..empty_input()
        };
        let BindOutcome::Bound(bound) = bind(&table, entry, &input, &Argon2Hasher) else {
            panic!("expected bound");
        };
        assert_eq!(bound.parameters[0].value, ParamValue::Text("ada".to_string()));
        assert_eq!(
            bound.parameters[1].value,
            ParamValue::Text(r#"{"a","b"}"#.to_string())
        );
    }

    #[test]
    fn json_null_binds_null() {
        let r = routine(&[("_name", "text", false)]);
        let mut e = RoutineEndpoint::for_routine(&r, "/api");
        e.request_param_type = RequestParamType::BodyJson;
        let (table, entry) = table_with(r, e);
        let input = BindInput {
            body: Some(r#"{"name": null}"#),
            ..empty_input()
        };
        let BindOutcome::Bound(bound) = bind(&table, entry, &input, &Argon2Hasher) else {
            panic!("expected bound");
        };
        assert!(bound.parameters[0].value.is_null());
    }

    #[test]
    fn path_parameter_binds() {
        let r = routine(&[("_id", "integer", false)]);
        let mut e = RoutineEndpoint::for_routine(&r, "/api");
        e.path = "/api/users/{id}".to_string();
        e.refresh_path_parameters();
        let (table, entry) = table_with(r, e);
        let path_params = vec![("id".to_string(), "42".to_string())];
        let input = BindInput {
            path_params: &path_params,
            ..empty_input()
        };
        let BindOutcome::Bound(bound) = bind(&table, entry, &input, &Argon2Hasher) else {
            panic!("expected bound");
        };
        assert_eq!(bound.parameters[0].value, ParamValue::Text("42".to_string()));
        assert_eq!(bound.parameters[0].source, Some(ParamSource::PathParam));
    }

    #[test]
    fn overload_dispatch_by_key_count() {
        let mut table = EndpointTable::default();
        let one = routine(&[("_a", "text", false)]);
        let e1 = RoutineEndpoint::for_routine(&one, "/api");
        table.insert(Entry {
            routine: one,
            endpoint: e1,
        });
        let two = routine(&[("_a", "text", false), ("_b", "text", false)]);
        let e2 = RoutineEndpoint::for_routine(&two, "/api");
        table.insert(Entry {
            routine: two,
            endpoint: e2,
        });
        // Primary now holds the two-parameter routine; a one-key request
        // must dispatch to the displaced overload.
        let primary = table.entries[1].clone();
        let query = vec![("a".to_string(), "x".to_string())];
        let input = BindInput {
            query: &query,
            ..empty_input()
        };
        let BindOutcome::Bound(bound) = bind(&table, primary, &input, &Argon2Hasher) else {
            panic!("expected bound");
        };
        assert_eq!(bound.entry.routine.parameters.len(), 1);
    }

    #[test]
    fn user_parameters_inject_ip_and_claims() {
        let mut r = routine(&[("_ip", "text", false), ("_user_claims", "jsonb", false)]);
        r.parameters[0].is_ip_address = true;
        r.parameters[1].is_user_claims = true;
        let mut e = RoutineEndpoint::for_routine(&r, "/api");
        e.use_user_parameters = true;
        let (table, entry) = table_with(r, e);

        let mut claims = serde_json::Map::new();
        claims.insert("sub".to_string(), Value::from("u-1"));
        let identity = UserIdentity::from_claims(claims, "role", "sub");
        let input = BindInput {
            identity: Some(&identity),
            client_ip: "10.0.0.9",
            ..empty_input()
        };
        let BindOutcome::Bound(bound) = bind(&table, entry, &input, &Argon2Hasher) else {
            panic!("expected bound");
        };
        assert_eq!(
            bound.parameters[0].value,
            ParamValue::Text("10.0.0.9".to_string())
        );
        assert_eq!(
            bound.parameters[1].value,
            ParamValue::Text(r#"{"sub":"u-1"}"#.to_string())
        );
    }

    #[test]
    fn hash_of_parameter_hashes_source_key() {
        let mut r = routine(&[("_login", "text", false), ("_password_hash", "text", false)]);
        r.parameters[1].hash_of = Some("password".to_string());
        let mut e = RoutineEndpoint::for_routine(&r, "/api");
        e.request_param_type = RequestParamType::BodyJson;
        let (table, entry) = table_with(r, e);
        let input = BindInput {
            body: Some(r#"{"login": "ada", "password": "s3cret"}"#),
            ..empty_input()
        };
        let BindOutcome::Bound(bound) = bind(&table, entry, &input, &Argon2Hasher) else {
            panic!("expected bound");
        };
        let ParamValue::Text(hash) = &bound.parameters[1].value else {
            panic!("expected hashed text");
        };
        assert!(hash.starts_with("$argon2"));
        assert!(Argon2Hasher.verify("s3cret", hash));
    }

    #[test]
    fn whole_body_parameter_takes_raw_body() {
        let r = routine(&[("_payload", "text", false)]);
        let mut e = RoutineEndpoint::for_routine(&r, "/api");
        e.body_parameter_name = Some("payload".to_string());
        let (table, entry) = table_with(r, e);
        let input = BindInput {
            body: Some("raw bytes here"),
            ..empty_input()
        };
        let BindOutcome::Bound(bound) = bind(&table, entry, &input, &Argon2Hasher) else {
            panic!("expected bound");
        };
        assert_eq!(
            bound.parameters[0].value,
            ParamValue::Text("raw bytes here".to_string())
        );
        assert_eq!(bound.parameters[0].source, Some(ParamSource::BodyParam));
    }

    #[test]
    fn header_parameter_binds_headers_json() {
        let r = routine(&[("_headers", "jsonb", false)]);
        let mut e = RoutineEndpoint::for_routine(&r, "/api");
        e.request_headers_mode = RequestHeadersMode::Parameter;
        let (table, entry) = table_with(r, e);
        let mut headers = HeaderMap::new();
        headers.insert("x-trace", "abc".parse().unwrap());
        let input = BindInput {
            headers: &headers,
            ..empty_input()
        };
        let BindOutcome::Bound(bound) = bind(&table, entry, &input, &Argon2Hasher) else {
            panic!("expected bound");
        };
        let ParamValue::Text(json) = &bound.parameters[0].value else {
            panic!()
        };
        assert!(json.contains(r#""x-trace":"abc""#));
    }
}
