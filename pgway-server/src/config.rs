//! Gateway configuration: one YAML document deserialized into the typed
//! option structs, with `.env` loading and environment-variable overrides
//! for the secrets that should not live in the file.
//!
//! Unknown keys anywhere in the document are refused at load time.

use std::path::Path;

use pgway_core::options::{
    AuthOptions, CacheOptions, CommandOptions, ConnectionOptions, MetadataOptions, ProxyOptions,
    SseOptions, UploadOptions,
};
use serde::Deserialize;

/// Configuration load failure.
#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "config read error: {msg}"),
            ConfigError::Parse(msg) => write!(f, "config parse error: {msg}"),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingOptions {
    /// `tracing_subscriber` EnvFilter directive, e.g. `info,pgway=debug`.
    pub filter: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        LoggingOptions {
            filter: "info".to_string(),
        }
    }
}

/// The whole gateway configuration document.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GatewayConfig {
    /// Bind address, e.g. `0.0.0.0:8080`.
    pub listen: String,
    /// Prefix for generated endpoint paths.
    pub path_prefix: String,
    pub connection: ConnectionOptions,
    pub metadata: MetadataOptions,
    pub command: CommandOptions,
    pub cache: CacheOptions,
    pub auth: AuthOptions,
    pub proxy: ProxyOptions,
    pub upload: UploadOptions,
    pub sse: SseOptions,
    pub logging: LoggingOptions,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            listen: "127.0.0.1:8080".to_string(),
            path_prefix: "/api".to_string(),
            connection: ConnectionOptions::default(),
            metadata: MetadataOptions::default(),
            command: CommandOptions::default(),
            cache: CacheOptions::default(),
            auth: AuthOptions::default(),
            proxy: ProxyOptions::default(),
            upload: UploadOptions::default(),
            sse: SseOptions::default(),
            logging: LoggingOptions::default(),
        }
    }
}

impl GatewayConfig {
    /// Parse a YAML document.
    pub fn from_yaml(content: &str) -> Result<GatewayConfig, ConfigError> {
        let mut config: GatewayConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, after loading `.env` into the process environment.
    pub fn load(path: &Path) -> Result<GatewayConfig, ConfigError> {
        let _ = dotenvy::dotenv();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Environment overrides for values that should not sit in the file.
    /// `.env` never overwrites already-set process variables.
    fn apply_env(&mut self) {
        if let Ok(listen) = std::env::var("PGWAY_LISTEN") {
            self.listen = listen;
        }
        if let Ok(conn) = std::env::var("PGWAY_CONNECTION") {
            self.connection.default = Some(conn);
        }
        if let Ok(secret) = std::env::var("PGWAY_JWT_SECRET") {
            self.auth.jwt.secret = secret;
        }
        if let Ok(filter) = std::env::var("PGWAY_LOG") {
            self.logging.filter = filter;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.default.is_none() {
            return Err(ConfigError::Invalid(
                "connection.default is required (or set PGWAY_CONNECTION)".to_string(),
            ));
        }
        if self.path_prefix.is_empty() || !self.path_prefix.starts_with('/') {
            return Err(ConfigError::Invalid(
                "path_prefix must start with '/'".to_string(),
            ));
        }
        if self.auth.basic.enabled && self.auth.basic.challenge_query.is_none() {
            return Err(ConfigError::Invalid(
                "auth.basic.challenge_query is required when basic auth is enabled".to_string(),
            ));
        }
        if pgway_auth::hasher_named(&self.auth.password_hasher).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown auth.password_hasher '{}'",
                self.auth.password_hasher
            )));
        }
        Ok(())
    }
}
