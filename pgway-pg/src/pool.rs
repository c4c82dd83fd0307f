//! Connection-string resolution and pool construction.
//!
//! The gateway keeps one deadpool pool per configured connection string.
//! The metadata connection resolves in order: named data source → named
//! connection string → default data source → default connection string.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use pgway_core::options::{ConnectionOptions, ConnectionRetryOptions};
use tokio_postgres::config::Config;
use tokio_postgres::NoTls;
use tracing::{info, warn};

use crate::error::DbError;

const DEFAULT_POOL_SIZE: usize = 16;

/// All pools the gateway talks through, keyed by connection name.
#[derive(Clone)]
pub struct DataSources {
    default: Pool,
    named: BTreeMap<String, Pool>,
    /// Parsed configs kept for dedicated (non-pooled) connections.
    configs: BTreeMap<String, Config>,
    default_config: Config,
    retry: ConnectionRetryOptions,
}

/// Parse a connection string and apply the search-path override.
fn parse_config(conn_str: &str, search_path: Option<&str>) -> Result<Config, DbError> {
    let mut config = Config::from_str(conn_str).map_err(|e| DbError::BadConfig(e.to_string()))?;
    if let Some(path) = search_path {
        config.options(format!("-c search_path={path}"));
    }
    Ok(config)
}

fn build_pool(config: Config, size: usize) -> Result<Pool, DbError> {
    let manager = Manager::from_config(
        config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    Pool::builder(manager)
        .max_size(size)
        .build()
        .map_err(|e| DbError::BadConfig(e.to_string()))
}

impl DataSources {
    /// Build every configured pool. Fails fast on malformed connection
    /// strings; actual connections are opened lazily.
    pub fn from_options(options: &ConnectionOptions) -> Result<DataSources, DbError> {
        let default_str = options
            .default
            .as_deref()
            .ok_or_else(|| DbError::BadConfig("no default connection configured".to_string()))?;
        let size = options.pool_size.unwrap_or(DEFAULT_POOL_SIZE);
        let search_path = options.search_path.as_deref();

        let default_config = parse_config(default_str, search_path)?;
        let default = build_pool(default_config.clone(), size)?;

        let mut named = BTreeMap::new();
        let mut configs = BTreeMap::new();
        for (name, conn_str) in &options.named {
            let config = parse_config(conn_str, search_path)?;
            named.insert(name.clone(), build_pool(config.clone(), size)?);
            configs.insert(name.clone(), config);
        }
        info!(pools = named.len() + 1, "data sources ready");
        Ok(DataSources {
            default,
            named,
            configs,
            default_config,
            retry: options.retry.clone(),
        })
    }

    /// The pool for an endpoint's connection name; `None` falls back to the
    /// default.
    pub fn pool(&self, name: Option<&str>) -> Result<&Pool, DbError> {
        match name {
            None => Ok(&self.default),
            Some(name) => self
                .named
                .get(name)
                .ok_or_else(|| DbError::BadConfig(format!("unknown connection '{name}'"))),
        }
    }

    /// The parsed config for a dedicated (non-pooled) connection.
    pub fn config(&self, name: Option<&str>) -> Result<&Config, DbError> {
        match name {
            None => Ok(&self.default_config),
            Some(name) => self
                .configs
                .get(name)
                .ok_or_else(|| DbError::BadConfig(format!("unknown connection '{name}'"))),
        }
    }

    /// Acquire a pooled client, retrying connection-open failures per the
    /// configured delay sequence.
    pub async fn acquire(&self, name: Option<&str>) -> Result<deadpool_postgres::Client, DbError> {
        let pool = self.pool(name)?;
        let mut last_error = String::new();
        for (attempt, delay) in std::iter::once(Duration::ZERO)
            .chain(self.retry.delays.iter().copied())
            .enumerate()
        {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match pool.get().await {
                Ok(client) => return Ok(client),
                Err(err) => {
                    warn!(attempt, error = %err, "connection acquisition failed");
                    last_error = err.to_string();
                }
            }
        }
        Err(DbError::Acquire(last_error))
    }
}
