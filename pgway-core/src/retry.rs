//! Retry strategies and SQL-state → HTTP problem mappings.
//!
//! The strategy and policy *data* live here; the classifier that inspects
//! driver errors lives next to the driver in `pgway-pg`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::options::interval;

/// SQL states retried by default: connection failures, admin shutdown,
/// serialization/deadlock conflicts, too-many-connections, lock timeouts.
pub const DEFAULT_RETRY_STATES: &[&str] = &[
    "08000", "08003", "08006", "08001", "08004", "57P01", "40001", "40P01", "53300", "55P03",
];

/// Delay sequence plus SQL-state allowlist consulted by the retry runner.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RetryStrategy {
    /// Delay before each retry attempt; the attempt count is
    /// `1 + delays.len()`.
    #[serde(default, deserialize_with = "interval::seq")]
    pub delays: Vec<Duration>,
    /// SQL states that are retried in addition to the transient classes.
    #[serde(default)]
    pub error_codes: Vec<String>,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy {
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(5),
            ],
            error_codes: DEFAULT_RETRY_STATES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl RetryStrategy {
    /// A strategy that never retries.
    pub fn none() -> Self {
        RetryStrategy {
            delays: Vec::new(),
            error_codes: Vec::new(),
        }
    }

    pub fn max_attempts(&self) -> usize {
        1 + self.delays.len()
    }

    pub fn allows(&self, sql_state: &str) -> bool {
        self.error_codes.iter().any(|code| code == sql_state)
    }
}

/// One SQL-state → RFC-7807 mapping of an endpoint's error-code policy.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ErrorCodeMapping {
    pub status: u16,
    pub title: String,
    #[serde(default, rename = "type")]
    pub problem_type: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

/// Per-endpoint map of SQL states to HTTP problem documents.
pub type ErrorCodePolicy = BTreeMap<String, ErrorCodeMapping>;
