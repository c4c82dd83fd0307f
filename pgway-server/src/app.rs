//! Router assembly and the serve loop.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, RawPathParams, State};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;
use axum::Router;
use http::{Request, StatusCode};
use pgway_auth::challenge;
use pgway_cache::ResultCache;
use pgway_pg::DataSources;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::build::{self, EndpointHandler};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::handler;
use crate::auth;
use crate::state::GatewayState;
use crate::table::Entry;

/// Server startup failure.
#[derive(Debug)]
pub enum ServeError {
    Build(build::BuildError),
    Db(pgway_pg::DbError),
    Io(std::io::Error),
}

impl std::fmt::Display for ServeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServeError::Build(err) => write!(f, "{err}"),
            ServeError::Db(err) => write!(f, "{err}"),
            ServeError::Io(err) => write!(f, "bind failed: {err}"),
        }
    }
}

impl std::error::Error for ServeError {}

fn client_ip(request: &Request<Body>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

/// Build the application router from the endpoint table.
pub fn router(state: GatewayState) -> Router {
    use std::collections::HashMap;
    use std::sync::Arc;

    let mut method_routers: HashMap<String, MethodRouter<GatewayState>> = HashMap::new();
    for entry in state.table.routable() {
        let captured: Arc<Entry> = entry.clone();
        let route = move |State(state): State<GatewayState>,
                          params: RawPathParams,
                          request: Request<Body>| {
            let entry = captured.clone();
            async move {
                let path_params: Vec<(String, String)> = params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                let ip = client_ip(&request);
                handler::handle(state, entry, path_params, ip, request).await
            }
        };
        let filter = handler::method_filter(&entry.endpoint.method);
        let method_router = method_routers
            .remove(&entry.endpoint.path)
            .unwrap_or_default();
        method_routers.insert(entry.endpoint.path.clone(), method_router.on(filter, route));
    }

    let mut router = Router::new();
    for (path, method_router) in method_routers {
        router = router.route(&path, method_router);
    }

    // Event-stream routes sit beside their endpoints at path + suffix.
    if state.table.has_streaming_events {
        for entry in state.table.routable() {
            if !entry.endpoint.info_events {
                continue;
            }
            let captured: Arc<Entry> = entry.clone();
            let sse_path = format!("{}{}", entry.endpoint.path, state.events.path_suffix);
            router = router.route(
                &sse_path,
                axum::routing::get(
                    move |State(state): State<GatewayState>, request: Request<Body>| {
                        let entry = captured.clone();
                        async move { subscribe_events(state, entry, request).await }
                    },
                ),
            );
        }
    }

    router
        .fallback(|| async { StatusCode::NOT_FOUND })
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// SSE subscription handler: enforce the endpoint's event scope, then
/// stream.
async fn subscribe_events(
    state: GatewayState,
    entry: std::sync::Arc<Entry>,
    request: Request<Body>,
) -> Response {
    use pgway_core::endpoint::EventScope;

    let identity = match auth::authenticate(&state, request.headers()).await {
        Ok(identity) => identity,
        Err(err) => return err.into_response(),
    };
    let allowed = match entry.endpoint.info_scope {
        EventScope::All => true,
        EventScope::Authenticated => identity.is_some(),
        EventScope::Authorized => identity
            .as_ref()
            .map(|user| user.has_any_role(&entry.endpoint.info_roles))
            .unwrap_or(false),
    };
    if !allowed {
        let basic = state
            .config
            .auth
            .basic
            .enabled
            .then(|| challenge(&state.config.auth.basic.realm));
        let err = match (identity.is_some(), basic) {
            (false, Some(challenge)) => GatewayError::BasicChallenge(challenge),
            (false, None) => GatewayError::Auth(pgway_auth::AuthError::Unauthenticated),
            (true, _) => GatewayError::Auth(pgway_auth::AuthError::Forbidden),
        };
        return err.into_response();
    }
    match state.events.subscribe(&entry.endpoint.path) {
        Some(subscription) => Sse::new(subscription)
            .keep_alive(KeepAlive::default())
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Build everything and serve until shutdown.
pub async fn serve(config: GatewayConfig, handlers: Vec<EndpointHandler>) -> Result<(), ServeError> {
    let sources = DataSources::from_options(&config.connection).map_err(ServeError::Db)?;
    let table = build::build(&config, &sources, &handlers)
        .await
        .map_err(ServeError::Build)?;
    let cache = ResultCache::new(config.cache.clone());
    let listen = config.listen.clone();
    let state = GatewayState::new(config, table, sources, cache);

    // The sweeper only runs when something can actually be cached.
    if state.table.entries.iter().any(|e| e.endpoint.cached) {
        state.cache.start_sweeper(state.shutdown.clone());
    }

    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(ServeError::Io)?;
    info!(%listen, endpoints = state.table.len(), "pgway listening");

    let shutdown = state.shutdown.clone();
    let serve_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    })
    .await;

    state.shutdown.cancel();
    serve_result.map_err(ServeError::Io)
}
