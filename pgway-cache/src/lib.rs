//! Concurrent TTL cache for rendered endpoint responses.
//!
//! Entries are keyed by a canonical string derived from the routine's
//! invocation template and the cache-relevant parameter values; keys past a
//! configurable length are replaced by their SHA-256 digest. Expired entries
//! are dropped lazily on access and by a single background sweeper.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use pgway_core::model::Parameter;
use pgway_core::options::CacheOptions;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A cached, fully rendered response body.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Clone)]
struct Entry {
    value: CachedResponse,
    /// `None` entries never expire (no TTL configured for the endpoint).
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Thread-safe response cache shared by all request handlers.
///
/// Cloning is cheap; clones share the same map.
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<DashMap<String, Entry>>,
    options: CacheOptions,
}

impl ResultCache {
    pub fn new(options: CacheOptions) -> Self {
        ResultCache {
            inner: Arc::new(DashMap::new()),
            options,
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Get a cached response, removing it when expired.
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        let entry = self.inner.get(key)?;
        if entry.is_expired(Instant::now()) {
            drop(entry);
            self.inner.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    /// Insert or replace a response with the endpoint's TTL.
    pub fn add_or_update(&self, key: String, value: CachedResponse, ttl: Option<Duration>) {
        let ttl = ttl.or(self.options.default_expires_in);
        let entry = Entry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.inner.insert(key, entry);
    }

    /// Remove one entry; used by `invalidate-cache` endpoints.
    pub fn remove(&self, key: &str) {
        self.inner.remove(key);
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Remove all expired entries. The sweeper calls this on its period;
    /// iteration does not block readers.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.inner.retain(|_, entry| !entry.is_expired(now));
    }

    /// Spawn the background sweeper. Returns immediately; the task runs
    /// until `shutdown` is cancelled. At most one sweeper should run per
    /// cache.
    pub fn start_sweeper(&self, shutdown: CancellationToken) {
        let cache = self.clone();
        let period = self.options.sweep_every;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("cache sweeper stopped");
                        break;
                    }
                    _ = tick.tick() => {
                        let before = cache.len();
                        cache.evict_expired();
                        let evicted = before.saturating_sub(cache.len());
                        if evicted > 0 {
                            debug!(evicted, "cache sweep");
                        }
                    }
                }
            }
        });
    }

    /// Build the canonical cache key for a request: the invocation template,
    /// then each cache-relevant parameter's original string value in routine
    /// order. Only parameters named in `cached_params` participate; an empty
    /// list means all parameters. Keys past the configured threshold are
    /// replaced by their SHA-256 hex digest.
    pub fn build_key(
        &self,
        expression: &str,
        parameters: &[Parameter],
        cached_params: &[String],
    ) -> String {
        let mut key = String::with_capacity(expression.len() + 16 * parameters.len());
        key.push_str(expression);
        for param in parameters {
            if !cached_params.is_empty()
                && !cached_params
                    .iter()
                    .any(|name| *name == param.converted_name || *name == param.actual_name)
            {
                continue;
            }
            key.push('\u{1f}');
            match &param.original_string_value {
                Some(original) => key.push_str(original),
                None => key.push('\u{0}'),
            }
        }
        if self.options.hash_keys && key.len() > self.options.hash_key_threshold {
            let digest = Sha256::digest(key.as_bytes());
            key = format!("{digest:x}");
        }
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgway_core::model::{ParamSource, ParamValue};
    use pgway_core::types::TypeDescriptor;

    fn response(body: &str) -> CachedResponse {
        CachedResponse {
            status: 200,
            content_type: "application/json".to_string(),
            body: Bytes::copy_from_slice(body.as_bytes()),
        }
    }

    fn cache() -> ResultCache {
        ResultCache::new(CacheOptions::default())
    }

    #[test]
    fn get_miss_then_hit() {
        let cache = cache();
        assert!(cache.get("k").is_none());
        cache.add_or_update("k".to_string(), response("[1]"), Some(Duration::from_secs(60)));
        assert_eq!(cache.get("k").unwrap().body, Bytes::from_static(b"[1]"));
    }

    #[test]
    fn hit_is_byte_identical() {
        let cache = cache();
        let original = response(r#"[{"a":1}]"#);
        cache.add_or_update("k".to_string(), original.clone(), None);
        assert_eq!(cache.get("k").unwrap(), original);
    }

    #[test]
    fn expired_entry_is_removed_on_get() {
        let cache = cache();
        cache.add_or_update("k".to_string(), response("x"), Some(Duration::ZERO));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn evict_expired_keeps_live_entries() {
        let cache = cache();
        cache.add_or_update("dead".to_string(), response("x"), Some(Duration::ZERO));
        cache.add_or_update("live".to_string(), response("y"), Some(Duration::from_secs(60)));
        cache.add_or_update("forever".to_string(), response("z"), None);
        cache.evict_expired();
        assert_eq!(cache.len(), 2);
        assert!(cache.get("live").is_some());
        assert!(cache.get("forever").is_some());
    }

    #[test]
    fn remove_clears_entry() {
        let cache = cache();
        cache.add_or_update("k".to_string(), response("x"), None);
        cache.remove("k");
        assert!(cache.get("k").is_none());
    }

    fn param(ordinal: usize, name: &str, value: Option<&str>) -> Parameter {
        let mut p = Parameter::new(ordinal, name, TypeDescriptor::new("text", false));
        match value {
            Some(s) => p.bind(
                ParamValue::Text(s.to_string()),
                Some(s.to_string()),
                ParamSource::QueryString,
            ),
            None => p.bind(ParamValue::Null, None, ParamSource::QueryString),
        }
        p
    }

    #[test]
    fn key_uses_selected_params_in_order() {
        let cache = cache();
        let params = vec![
            param(0, "_a", Some("1")),
            param(1, "_b", Some("2")),
            param(2, "_c", Some("3")),
        ];
        let all = cache.build_key("select f(", &params, &[]);
        let some = cache.build_key("select f(", &params, &["a".to_string(), "c".to_string()]);
        assert_ne!(all, some);
        assert!(some.contains('1') && some.contains('3') && !some.contains('2'));
    }

    #[test]
    fn key_distinguishes_null_from_empty() {
        let cache = cache();
        let with_null = cache.build_key("e", &[param(0, "_a", None)], &[]);
        let with_empty = cache.build_key("e", &[param(0, "_a", Some(""))], &[]);
        assert_ne!(with_null, with_empty);
    }

    #[test]
    fn long_keys_are_hashed() {
        let mut options = CacheOptions::default();
        options.hash_key_threshold = 16;
        let cache = ResultCache::new(options);
        let long = cache.build_key(
            "select something_rather_long(",
            &[param(0, "_a", Some("aaaaaaaaaaaaaaaaaaaaaaaa"))],
            &[],
        );
        // SHA-256 hex digest
        assert_eq!(long.len(), 64);
        assert!(long.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hashing_can_be_disabled() {
        let mut options = CacheOptions::default();
        options.hash_key_threshold = 16;
        options.hash_keys = false;
        let cache = ResultCache::new(options);
        let key = cache.build_key(
            "select something_rather_long(",
            &[param(0, "_a", Some("aaaaaaaaaaaaaaaaaaaaaaaa"))],
            &[],
        );
        assert!(key.len() > 64);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_on_period() {
        let mut options = CacheOptions::default();
        options.sweep_every = Duration::from_secs(5);
        let cache = ResultCache::new(options);
        cache.add_or_update("k".to_string(), response("x"), Some(Duration::from_secs(1)));

        let shutdown = CancellationToken::new();
        cache.start_sweeper(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(6)).await;
        // Let the sweeper task run.
        tokio::task::yield_now().await;
        assert!(cache.is_empty());
        shutdown.cancel();
    }
}
