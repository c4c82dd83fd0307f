//! Reverse-proxy interposition.
//!
//! Endpoints tagged `proxy` forward the incoming request to their upstream
//! host. Passthrough proxies (no response-field parameters on the routine)
//! relay the upstream response verbatim; otherwise the response is mapped
//! into the routine's `_response_*` parameters and execution continues.

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use pgway_auth::UserIdentity;
use pgway_core::endpoint::proxy_params;
use pgway_core::model::{ParamSource, ParamValue};
use pgway_core::options::ProxyOptions;
use tracing::debug;

use crate::bind::BoundRequest;
use crate::error::GatewayError;

/// The upstream response, held for relay or parameter mapping.
pub struct ProxyOutcome {
    pub status: u16,
    pub headers: HeaderMap,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Headers never forwarded upstream regardless of configuration.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "content-length",
    "host",
];

/// Build the upstream URL: host + request path + query string, augmented
/// with user claim/IP keys when configured.
pub fn target_url(
    host: &str,
    path: &str,
    query: &str,
    options: &ProxyOptions,
    identity: Option<&UserIdentity>,
    client_ip: &str,
) -> String {
    let mut url = format!("{}{}", host.trim_end_matches('/'), path);
    let mut sep = if query.is_empty() { '?' } else { '&' };
    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }
    if options.forward_user_parameters {
        let mut push = |key: &str, value: &str| {
            url.push(sep);
            sep = '&';
            url.push_str(key);
            url.push('=');
            url.push_str(&form_urlencoded::byte_serialize(value.as_bytes()).collect::<String>());
        };
        push("ip", client_ip);
        if let Some(identity) = identity {
            if let Some(name) = &identity.name {
                push("user", name);
            }
            for role in &identity.roles {
                push("role", role);
            }
        }
    }
    url
}

fn forwardable(name: &HeaderName, options: &ProxyOptions) -> bool {
    let lower = name.as_str();
    !HOP_BY_HOP.contains(&lower)
        && !options
            .excluded_headers
            .iter()
            .any(|excluded| excluded.eq_ignore_ascii_case(lower))
}

/// Forward the request upstream. The body may be fully buffered bytes or a
/// stream handed through from the incoming request (multipart uploads with
/// forwarding enabled).
pub async fn forward(
    http: &reqwest::Client,
    options: &ProxyOptions,
    method: &Method,
    url: &str,
    headers: &HeaderMap,
    body: Option<reqwest::Body>,
) -> Result<ProxyOutcome, GatewayError> {
    let mut request = http.request(
        reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|e| GatewayError::Internal(e.to_string()))?,
        url,
    );
    for (name, value) in headers {
        if forwardable(name, options) {
            if let Ok(value) = value.to_str() {
                request = request.header(name.as_str(), value);
            }
        }
    }
    if let Some(body) = body {
        request = request.body(body);
    }
    if let Some(timeout) = options.timeout {
        request = request.timeout(timeout);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) if err.is_timeout() => return Err(GatewayError::ProxyTimeout),
        Err(err) => {
            let status = err.status().map(|s| s.as_u16()).unwrap_or(502);
            debug!(error = %err, "proxy send failed");
            return Err(GatewayError::ProxyFailure {
                status,
                message: err.to_string(),
            });
        }
    };

    let status = response.status().as_u16();
    let success = response.status().is_success();
    let mut out_headers = HeaderMap::new();
    for (name, value) in response.headers() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out_headers.insert(name, value);
        }
    }
    let content_type = out_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let body = response
        .bytes()
        .await
        .map_err(|err| GatewayError::ProxyFailure {
            status: 502,
            message: err.to_string(),
        })?;

    Ok(ProxyOutcome {
        status,
        headers: out_headers,
        content_type,
        body,
        success,
        error_message: None,
    })
}

/// Relay an upstream response verbatim (passthrough proxies).
pub fn passthrough_response(outcome: ProxyOutcome) -> Response {
    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, outcome.body).into_response();
    for (name, value) in &outcome.headers {
        if !HOP_BY_HOP.contains(&name.as_str()) {
            response.headers_mut().insert(name.clone(), value.clone());
        }
    }
    response
}

/// Map the upstream response into the routine's `_response_*` parameters.
pub fn map_into_parameters(bound: &mut BoundRequest, outcome: &ProxyOutcome) {
    for param in &mut bound.parameters {
        let value = match param.actual_name.as_str() {
            proxy_params::STATUS_CODE => Some(outcome.status.to_string()),
            proxy_params::BODY => Some(String::from_utf8_lossy(&outcome.body).to_string()),
            proxy_params::HEADERS => Some(crate::bind::headers_json(&outcome.headers)),
            proxy_params::CONTENT_TYPE => outcome.content_type.clone(),
            proxy_params::SUCCESS => Some(outcome.success.to_string()),
            proxy_params::ERROR_MESSAGE => outcome.error_message.clone(),
            _ => continue,
        };
        match value {
            Some(text) => param.bind(
                ParamValue::Text(text.clone()),
                Some(text),
                ParamSource::BodyParam,
            ),
            None => param.bind(ParamValue::Null, None, ParamSource::BodyParam),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ProxyOptions {
        ProxyOptions::default()
    }

    #[test]
    fn target_url_joins_path_and_query() {
        let url = target_url(
            "https://up.example.com/",
            "/api/get-x",
            "id=7",
            &options(),
            None,
            "127.0.0.1",
        );
        assert_eq!(url, "https://up.example.com/api/get-x?id=7");
    }

    #[test]
    fn target_url_appends_user_parameters() {
        let mut opts = options();
        opts.forward_user_parameters = true;
        let mut claims = serde_json::Map::new();
        claims.insert("sub".to_string(), serde_json::Value::from("ada"));
        claims.insert("role".to_string(), serde_json::Value::from("admin"));
        let identity = UserIdentity::from_claims(claims, "role", "sub");
        let url = target_url(
            "https://up.example.com",
            "/x",
            "",
            &opts,
            Some(&identity),
            "10.0.0.1",
        );
        assert_eq!(
            url,
            "https://up.example.com/x?ip=10.0.0.1&user=ada&role=admin"
        );
    }

    #[test]
    fn excluded_headers_are_not_forwarded() {
        let opts = options();
        assert!(!forwardable(&header::AUTHORIZATION, &opts));
        assert!(!forwardable(&header::HOST, &opts));
        assert!(forwardable(&HeaderName::from_static("x-trace"), &opts));
    }
}
