//! Shared application state threaded through every request handler.

use std::sync::Arc;

use pgway_auth::{hasher_named, Argon2Hasher, CredentialHasher, TokenIssuer};
use pgway_cache::ResultCache;
use pgway_pg::DataSources;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::sse::EventRouter;
use crate::table::EndpointTable;
use crate::upload::UploadHandlers;

/// Immutable per-process context. Cloning is cheap; everything heavy sits
/// behind an `Arc` or is internally shared.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    pub table: Arc<EndpointTable>,
    pub sources: DataSources,
    pub cache: ResultCache,
    pub events: EventRouter,
    pub issuer: TokenIssuer,
    pub hasher: Arc<dyn CredentialHasher>,
    pub http: reqwest::Client,
    pub uploads: UploadHandlers,
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(
        config: GatewayConfig,
        table: EndpointTable,
        sources: DataSources,
        cache: ResultCache,
    ) -> GatewayState {
        let events = EventRouter::from_table(&table, &config.sse);
        let issuer = TokenIssuer::new(&config.auth.jwt);
        // The name was validated at configuration load; the fallback only
        // covers states built from hand-assembled configs.
        let hasher = hasher_named(&config.auth.password_hasher)
            .unwrap_or_else(|| Arc::new(Argon2Hasher));
        GatewayState {
            config: Arc::new(config),
            table: Arc::new(table),
            sources,
            cache,
            events,
            issuer,
            hasher,
            http: reqwest::Client::new(),
            uploads: UploadHandlers::with_defaults(),
            shutdown: CancellationToken::new(),
        }
    }
}
