//! Routine comment annotations.
//!
//! Endpoint behavior is customized by key/value lines in the routine's
//! database comment, optionally prefixed with `@`:
//!
//! ```text
//! authorize [admin, support]
//! cached [_id]
//! cache-expires-in 30s
//! validate _email using required, email
//! proxy https://upstream.example.com
//! ```
//!
//! Lines whose first token is not a recognized key are free text and are
//! ignored; `@`-prefixed unknown keys are collected into
//! `custom_parameters` for endpoint-create handlers.

use http::Method;

use crate::endpoint::{
    EventScope, NoticeSeverity, RequestHeadersMode, RequestParamType, RoutineEndpoint,
    TextResponseNullHandling,
};
use crate::model::Routine;
use crate::options::parse_interval;
use crate::validation::{ParamValidation, ValidationRule};

/// Error applying a comment annotation.
#[derive(Debug)]
pub enum AnnotationError {
    /// A value failed to parse, e.g. a bad interval or HTTP method.
    InvalidValue { key: String, value: String },
    /// `validate` line missing the `using` clause or naming no rules.
    InvalidValidation(String),
}

impl std::fmt::Display for AnnotationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnnotationError::InvalidValue { key, value } => {
                write!(f, "invalid value for annotation '{key}': '{value}'")
            }
            AnnotationError::InvalidValidation(line) => {
                write!(f, "invalid validate annotation: '{line}'")
            }
        }
    }
}

impl std::error::Error for AnnotationError {}

/// Split a `[a, b]` or `a, b` list value into items.
fn parse_list(value: &str) -> Vec<String> {
    value
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Undo `\n`, `\r`, `\t` escapes in separator values.
fn unescape_separator(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn invalid(key: &str, value: &str) -> AnnotationError {
    AnnotationError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Resolve a parameter name mentioned in an annotation to the converted
/// name the binder and validator use.
fn converted_param_name(routine: &Routine, name: &str) -> String {
    routine
        .parameters
        .iter()
        .find(|p| p.actual_name == name || p.converted_name == name)
        .map(|p| p.converted_name.clone())
        .unwrap_or_else(|| name.to_string())
}

/// Apply every annotation line of `comment` to the endpoint.
pub fn apply_comment(
    endpoint: &mut RoutineEndpoint,
    routine: &Routine,
    comment: &str,
) -> Result<(), AnnotationError> {
    for line in comment.lines() {
        apply_line(endpoint, routine, line)?;
    }
    Ok(())
}

fn apply_line(
    endpoint: &mut RoutineEndpoint,
    routine: &Routine,
    line: &str,
) -> Result<(), AnnotationError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }
    let (prefixed, line) = match line.strip_prefix('@') {
        Some(rest) => (true, rest.trim()),
        None => (false, line),
    };
    let (key, value) = match line.split_once(char::is_whitespace) {
        Some((key, value)) => (key, value.trim()),
        None => (line, ""),
    };
    // `key = value` form
    let value = value.strip_prefix('=').map(str::trim).unwrap_or(value);
    let key = key.to_ascii_lowercase().replace('_', "-");

    match key.as_str() {
        "authorize" | "requires-authorization" => {
            endpoint.requires_authorization = true;
            endpoint.authorize_roles = parse_list(value);
        }
        "login" => endpoint.login = true,
        "logout" => endpoint.logout = true,
        "security-sensitive" | "sensitive" => endpoint.security_sensitive = true,
        "disabled" => endpoint.disabled = true,
        "cached" => {
            endpoint.cached = true;
            endpoint.cached_params = parse_list(value)
                .iter()
                .map(|name| converted_param_name(routine, name))
                .collect();
        }
        "cache-expires-in" | "cache-expires" => {
            endpoint.cached = true;
            endpoint.cache_expires_in =
                Some(parse_interval(value).map_err(|_| invalid(&key, value))?);
        }
        "invalidate-cache" => endpoint.invalidate_cache = true,
        "content-type" => {
            if value.is_empty() {
                return Err(invalid(&key, value));
            }
            endpoint.response_content_type = Some(value.to_string());
        }
        "response-headers" => {
            for header in value.split(',') {
                let Some((name, header_value)) = header.split_once(':') else {
                    return Err(invalid(&key, value));
                };
                endpoint
                    .response_headers
                    .push((name.trim().to_string(), header_value.trim().to_string()));
            }
        }
        "buffer-rows" => {
            endpoint.buffer_rows = value.parse().map_err(|_| invalid(&key, value))?;
        }
        "raw" => endpoint.raw = true,
        "raw-value-separator" | "separator" => {
            endpoint.raw = true;
            endpoint.raw_value_separator = Some(unescape_separator(value));
        }
        "raw-new-line-separator" | "new-line-separator" => {
            endpoint.raw = true;
            endpoint.raw_new_line_separator = Some(unescape_separator(value));
        }
        "raw-column-names" | "column-names" => {
            endpoint.raw = true;
            endpoint.raw_column_names = true;
        }
        "connection" => {
            if value.is_empty() {
                return Err(invalid(&key, value));
            }
            endpoint.connection_name = Some(value.to_string());
        }
        "timeout" | "command-timeout" => {
            endpoint.command_timeout =
                Some(parse_interval(value).map_err(|_| invalid(&key, value))?);
        }
        "upload" => {
            endpoint.upload = true;
            endpoint.upload_handlers = parse_list(value);
        }
        "validate" | "validation" => {
            apply_validate(endpoint, routine, value)?;
        }
        "proxy" => {
            endpoint.is_proxy = true;
            if !value.is_empty() {
                endpoint.proxy_host = Some(value.to_string());
            }
        }
        "user-context" => endpoint.user_context = true,
        "user-parameters" => endpoint.use_user_parameters = true,
        "request-headers" => {
            endpoint.request_headers_mode = match value.to_ascii_lowercase().as_str() {
                "ignore" | "" => RequestHeadersMode::Ignore,
                "context" => RequestHeadersMode::Context,
                "parameter" => RequestHeadersMode::Parameter,
                _ => return Err(invalid(&key, value)),
            };
        }
        "request-headers-parameter-name" => {
            endpoint.request_headers_parameter_name = value.to_string();
        }
        "info-events" | "info-streaming-events" => {
            endpoint.info_events = true;
            let mut items = value.split_whitespace();
            match items.next().map(str::to_ascii_lowercase).as_deref() {
                None | Some("all") => endpoint.info_scope = EventScope::All,
                Some("authenticated" | "self") => {
                    endpoint.info_scope = EventScope::Authenticated;
                }
                Some("authorized" | "authorize") => {
                    endpoint.info_scope = EventScope::Authorized;
                    let rest = value
                        .split_once(char::is_whitespace)
                        .map(|(_, rest)| rest)
                        .unwrap_or("");
                    endpoint.info_roles = parse_list(rest);
                }
                Some(other) => return Err(invalid(&key, other)),
            }
        }
        "info-severity" => {
            endpoint.info_severity = NoticeSeverity::parse(value);
        }
        "path" => {
            if value.is_empty() {
                return Err(invalid(&key, value));
            }
            endpoint.path = value.to_string();
            endpoint.refresh_path_parameters();
        }
        "method" => {
            endpoint.method = value
                .to_ascii_uppercase()
                .parse::<Method>()
                .ok()
                .filter(|m| {
                    [
                        Method::GET,
                        Method::POST,
                        Method::PUT,
                        Method::DELETE,
                        Method::PATCH,
                    ]
                    .contains(m)
                })
                .ok_or_else(|| invalid(&key, value))?;
            endpoint.request_param_type =
                if endpoint.method == Method::GET || endpoint.method == Method::DELETE {
                    RequestParamType::QueryString
                } else {
                    RequestParamType::BodyJson
                };
        }
        "param-type" | "request-param-type" => {
            endpoint.request_param_type = match value.to_ascii_lowercase().as_str() {
                "query" | "query-string" | "querystring" => RequestParamType::QueryString,
                "body" | "body-json" | "json" => RequestParamType::BodyJson,
                _ => return Err(invalid(&key, value)),
            };
        }
        "text-null-handling" => {
            endpoint.text_response_null_handling = match value.to_ascii_lowercase().as_str() {
                "empty" | "empty-string" => TextResponseNullHandling::EmptyString,
                "null" | "null-literal" => TextResponseNullHandling::NullLiteral,
                "no-content" => TextResponseNullHandling::NoContent,
                _ => return Err(invalid(&key, value)),
            };
        }
        "body-parameter" | "body-param" => {
            if value.is_empty() {
                return Err(invalid(&key, value));
            }
            endpoint.body_parameter_name = Some(converted_param_name(routine, value));
        }
        "tags" => endpoint.tags = parse_list(value),
        _ if prefixed => {
            endpoint
                .custom_parameters
                .insert(key.to_string(), value.to_string());
        }
        // Free comment text.
        _ => {}
    }
    Ok(())
}

/// `validate <param> using <rule>[, <rule>…]`
fn apply_validate(
    endpoint: &mut RoutineEndpoint,
    routine: &Routine,
    value: &str,
) -> Result<(), AnnotationError> {
    let Some((param, rules)) = value.split_once(" using ") else {
        return Err(AnnotationError::InvalidValidation(value.to_string()));
    };
    let param = converted_param_name(routine, param.trim());
    let mut parsed = Vec::new();
    for expr in rules.split(',') {
        let rule = ValidationRule::parse(expr)
            .ok_or_else(|| AnnotationError::InvalidValidation(expr.trim().to_string()))?;
        parsed.push(ParamValidation::new(rule));
    }
    if parsed.is_empty() {
        return Err(AnnotationError::InvalidValidation(value.to_string()));
    }
    endpoint
        .parameter_validations
        .entry(param)
        .or_default()
        .extend(parsed);
    Ok(())
}
