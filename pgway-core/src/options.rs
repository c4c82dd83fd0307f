//! Typed option structs for every configurable concern, plus the interval
//! grammar used wherever a duration appears in configuration or routine
//! comment annotations.
//!
//! Unknown keys are refused at deserialization time — every struct is
//! `deny_unknown_fields`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::retry::{ErrorCodePolicy, RetryStrategy};

/// Error from [`parse_interval`].
#[derive(Debug, PartialEq, Eq)]
pub struct IntervalError(pub String);

impl std::fmt::Display for IntervalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid interval: {}", self.0)
    }
}

impl std::error::Error for IntervalError {}

/// Parse an interval expression: a decimal number followed by one of
/// `ms`, `s`, `m`, `h`, `d`, `w`, `us`. No unit defaults to seconds.
///
/// ```
/// # use pgway_core::options::parse_interval;
/// # use std::time::Duration;
/// assert_eq!(parse_interval("90").unwrap(), Duration::from_secs(90));
/// assert_eq!(parse_interval("1.5h").unwrap(), Duration::from_secs(5400));
/// assert_eq!(parse_interval("250ms").unwrap(), Duration::from_millis(250));
/// ```
pub fn parse_interval(input: &str) -> Result<Duration, IntervalError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(IntervalError(input.to_string()));
    }
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.' && c != '+')
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| IntervalError(input.to_string()))?;
    if value < 0.0 || !value.is_finite() {
        return Err(IntervalError(input.to_string()));
    }
    let micros = match unit.trim() {
        "" | "s" => value * 1_000_000.0,
        "ms" => value * 1_000.0,
        "us" => value,
        "m" => value * 60.0 * 1_000_000.0,
        "h" => value * 3_600.0 * 1_000_000.0,
        "d" => value * 86_400.0 * 1_000_000.0,
        "w" => value * 7.0 * 86_400.0 * 1_000_000.0,
        _ => return Err(IntervalError(input.to_string())),
    };
    Ok(Duration::from_micros(micros.round() as u64))
}

/// Serde adapters deserializing intervals from strings (`"30s"`) or bare
/// numbers (seconds).
pub mod interval {
    use super::{parse_interval, Duration};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(f64),
        Text(String),
    }

    fn convert<E: Error>(raw: Raw) -> Result<Duration, E> {
        match raw {
            Raw::Seconds(secs) if secs >= 0.0 && secs.is_finite() => {
                Ok(Duration::from_secs_f64(secs))
            }
            Raw::Seconds(secs) => Err(E::custom(format!("invalid interval: {secs}"))),
            Raw::Text(text) => parse_interval(&text).map_err(E::custom),
        }
    }

    pub fn required<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        convert(Raw::deserialize(de)?)
    }

    pub fn optional<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
        match Option::<Raw>::deserialize(de)? {
            None => Ok(None),
            Some(raw) => convert(raw).map(Some),
        }
    }

    pub fn seq<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<Duration>, D::Error> {
        Vec::<Raw>::deserialize(de)?
            .into_iter()
            .map(convert)
            .collect()
    }
}

fn default_true() -> bool {
    true
}

/// Result cache tuning.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheOptions {
    /// Background sweeper period.
    #[serde(deserialize_with = "interval::required")]
    pub sweep_every: Duration,
    /// Canonical keys longer than this are replaced by their SHA-256 digest.
    pub hash_key_threshold: usize,
    pub hash_keys: bool,
    /// Record sets larger than this are never cached.
    pub max_cacheable_rows: usize,
    /// Default TTL for cached endpoints without `cache-expires-in`.
    #[serde(deserialize_with = "interval::optional")]
    pub default_expires_in: Option<Duration>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            sweep_every: Duration::from_secs(60),
            hash_key_threshold: 512,
            hash_keys: true,
            max_cacheable_rows: 1000,
            default_expires_in: None,
        }
    }
}

/// Delay sequence applied to connection-open attempts.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConnectionRetryOptions {
    #[serde(deserialize_with = "interval::seq")]
    pub delays: Vec<Duration>,
}

impl Default for ConnectionRetryOptions {
    fn default() -> Self {
        ConnectionRetryOptions {
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(5),
            ],
        }
    }
}

/// Connection strings and metadata-connection resolution.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConnectionOptions {
    /// Default connection string.
    pub default: Option<String>,
    /// Named connection strings selectable per endpoint via the
    /// `connection` annotation.
    pub named: BTreeMap<String, String>,
    /// Schema search-path override applied to every session.
    pub search_path: Option<String>,
    pub retry: ConnectionRetryOptions,
    /// Pool size per connection string.
    pub pool_size: Option<usize>,
}

/// Defaults for statement execution.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CommandOptions {
    #[serde(deserialize_with = "interval::optional")]
    pub timeout: Option<Duration>,
    pub retry: RetryStrategy,
    /// SQL state → problem document mappings applied to every endpoint
    /// unless overridden.
    pub error_codes: ErrorCodePolicy,
}

impl Default for CommandOptions {
    fn default() -> Self {
        CommandOptions {
            timeout: Some(Duration::from_secs(30)),
            retry: RetryStrategy::default(),
            error_codes: ErrorCodePolicy::new(),
        }
    }
}

/// Introspection query configuration: the ten filter parameters applied when
/// the query body is a bare function name.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MetadataOptions {
    /// SQL text, or a bare function name (no whitespace) invoked with the
    /// filter parameters below.
    pub query: Option<String>,
    /// Named connection to introspect through; the default connection
    /// otherwise.
    pub connection: Option<String>,
    pub schema_similar_to: Option<String>,
    pub schema_not_similar_to: Option<String>,
    pub include_schemas: Vec<String>,
    pub exclude_schemas: Vec<String>,
    pub name_similar_to: Option<String>,
    pub name_not_similar_to: Option<String>,
    pub include_names: Vec<String>,
    pub exclude_names: Vec<String>,
    pub include_languages: Vec<String>,
    pub exclude_languages: Vec<String>,
}

/// JWT issue/verify settings for login endpoints.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct JwtOptions {
    pub secret: String,
    pub issuer: String,
    #[serde(deserialize_with = "interval::required")]
    pub expires_in: Duration,
    pub cookie_name: String,
}

impl Default for JwtOptions {
    fn default() -> Self {
        JwtOptions {
            secret: String::new(),
            issuer: "pgway".to_string(),
            expires_in: Duration::from_secs(3600),
            cookie_name: "pgway-auth".to_string(),
        }
    }
}

/// HTTP Basic authentication with a database challenge query.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BasicAuthOptions {
    pub enabled: bool,
    /// Query taking the username as `$1` and returning the stored password
    /// hash plus optional claim columns.
    pub challenge_query: Option<String>,
    pub realm: String,
}

impl Default for BasicAuthOptions {
    fn default() -> Self {
        BasicAuthOptions {
            enabled: false,
            challenge_query: None,
            realm: "pgway".to_string(),
        }
    }
}

/// Authentication and claim mapping.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AuthOptions {
    /// Claim type carrying roles.
    pub role_claim: String,
    /// Claim type carrying the user identifier.
    pub name_claim: String,
    /// Map of parameter actual name → claim type, injected when an endpoint
    /// uses user parameters.
    pub claim_parameters: BTreeMap<String, String>,
    /// Parameter names bound to the client IP.
    pub ip_parameter_name: String,
    /// Algorithm for hash-of parameters and challenge-query verification.
    /// Unknown names are refused at load time.
    pub password_hasher: String,
    pub jwt: JwtOptions,
    pub basic: BasicAuthOptions,
}

impl Default for AuthOptions {
    fn default() -> Self {
        AuthOptions {
            role_claim: "role".to_string(),
            name_claim: "name_identifier".to_string(),
            claim_parameters: BTreeMap::new(),
            ip_parameter_name: "_ip_address".to_string(),
            password_hasher: "argon2id".to_string(),
            jwt: JwtOptions::default(),
            basic: BasicAuthOptions::default(),
        }
    }
}

/// Reverse-proxy defaults.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProxyOptions {
    /// Default upstream for endpoints tagged `proxy` without a host.
    pub host: Option<String>,
    /// Request headers never forwarded upstream.
    pub excluded_headers: Vec<String>,
    /// Stream multipart bodies upstream instead of buffering.
    pub forward_uploads: bool,
    #[serde(deserialize_with = "interval::optional")]
    pub timeout: Option<Duration>,
    /// Append authenticated user claims and client IP as query parameters.
    pub forward_user_parameters: bool,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        ProxyOptions {
            host: None,
            excluded_headers: vec![
                "authorization".to_string(),
                "cookie".to_string(),
                "host".to_string(),
            ],
            forward_uploads: true,
            timeout: Some(Duration::from_secs(30)),
            forward_user_parameters: false,
        }
    }
}

/// Upload handling.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct UploadOptions {
    /// Directory the default file handler writes into.
    pub directory: Option<String>,
    /// Handlers applied when an `upload` annotation names none.
    pub default_handlers: Vec<String>,
    pub max_size: Option<u64>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        UploadOptions {
            directory: None,
            default_handlers: vec!["file".to_string()],
            max_size: Some(64 * 1024 * 1024),
        }
    }
}

/// NOTICE streaming over Server-Sent Events.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SseOptions {
    /// Suffix appended to an endpoint path to form its event stream path.
    pub path_suffix: String,
    /// Per-subscriber channel capacity; messages drop on overflow.
    pub channel_capacity: usize,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for SseOptions {
    fn default() -> Self {
        SseOptions {
            path_suffix: "/events".to_string(),
            channel_capacity: 128,
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_units() {
        assert_eq!(parse_interval("10ms").unwrap(), Duration::from_millis(10));
        assert_eq!(parse_interval("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_interval("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_interval("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_interval("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_interval("2w").unwrap(), Duration::from_secs(1_209_600));
        assert_eq!(parse_interval("100us").unwrap(), Duration::from_micros(100));
    }

    #[test]
    fn interval_decimals_and_default_unit() {
        assert_eq!(parse_interval("0.5s").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_interval("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_interval("30"), Ok(Duration::from_secs(30)));
    }

    #[test]
    fn interval_rejects_garbage() {
        assert!(parse_interval("").is_err());
        assert!(parse_interval("fast").is_err());
        assert!(parse_interval("5 parsecs").is_err());
        assert!(parse_interval("-3s").is_err());
    }

    #[test]
    fn cache_options_deserialize() {
        let opts: CacheOptions =
            serde_yaml::from_str("sweep_every: 90s\nmax_cacheable_rows: 10").unwrap();
        assert_eq!(opts.sweep_every, Duration::from_secs(90));
        assert_eq!(opts.max_cacheable_rows, 10);
        assert_eq!(opts.hash_key_threshold, 512);
    }

    #[test]
    fn unknown_keys_are_refused() {
        let err = serde_yaml::from_str::<CacheOptions>("sweeper: 90s").unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }
}
