//! The per-request state machine.
//!
//! One linear async procedure per request: authenticate → authorize → bind
//! → validate → (proxy) → set user context → (upload) → execute → stream.
//! Failures at any step convert to a response at exactly one boundary
//! ([`handle`]), which also decides logging: error level only for response
//! codes outside {200, 205, 400}.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::multipart::Multipart;
use axum::extract::FromRequest;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{header, HeaderMap, Method, Request, StatusCode};
use pgway_auth::{build_claims, challenge, UserIdentity};
use pgway_cache::CachedResponse;
use pgway_core::endpoint::{RequestHeadersMode, RoutineEndpoint};
use pgway_core::model::{ParamSource, ParamValue, Routine};
use pgway_core::sql::finish_expression_partial;
use pgway_pg::{execute, DbError, NoticeClient, RetryRunner};
use serde_json::Value;
use tracing::{debug, error, info_span, Instrument};

use crate::bind::{bind, headers_json, BindInput, BindOutcome, BoundRequest};
use crate::error::GatewayError;
use crate::proxy;
use crate::state::GatewayState;
use crate::stream::{self, ClientHolder, ResponseShape, StreamCache};
use crate::table::Entry;
use crate::upload::UploadedFile;
use crate::{auth, validate};

/// Entry point invoked by the router for every mapped endpoint.
pub async fn handle(
    state: GatewayState,
    entry: Arc<Entry>,
    path_params: Vec<(String, String)>,
    client_ip: String,
    request: Request<Body>,
) -> Response {
    let span = info_span!(
        "request",
        method = %entry.endpoint.method,
        path = %entry.endpoint.path,
    );
    let result = handle_inner(&state, entry, path_params, client_ip, request)
        .instrument(span)
        .await;
    match result {
        Ok(response) => response,
        Err(err) => {
            let status = err.status();
            if !matches!(status.as_u16(), 200 | 205 | 400) {
                error!(status = status.as_u16(), error = %err, "request failed");
            }
            err.into_response()
        }
    }
}

async fn handle_inner(
    state: &GatewayState,
    entry: Arc<Entry>,
    path_params: Vec<(String, String)>,
    client_ip: String,
    request: Request<Body>,
) -> Result<Response, GatewayError> {
    let headers = request.headers().clone();
    let query_string = request.uri().query().unwrap_or("").to_string();
    let query: Vec<(String, String)> = form_urlencoded::parse(query_string.as_bytes())
        .into_owned()
        .collect();

    // Authentication & authorization.
    let identity = auth::authenticate(state, &headers).await?;
    let basic_challenge = state
        .config
        .auth
        .basic
        .enabled
        .then(|| challenge(&state.config.auth.basic.realm));
    auth::authorize(
        entry.endpoint.requires_authorization,
        &entry.endpoint.authorize_roles,
        identity.as_ref(),
        basic_challenge,
    )?;

    // Body: multipart fields for upload endpoints, a passthrough stream
    // for forwarded uploads, raw bytes otherwise.
    let payload = read_body(
        &entry.endpoint,
        state.config.proxy.forward_uploads,
        request,
    )
    .await?;
    let (body, files, streamed) = match payload {
        RequestBody::None => (None, Vec::new(), None),
        RequestBody::Buffered(bytes) => (Some(bytes), Vec::new(), None),
        RequestBody::Multipart(files) => (None, files, None),
        RequestBody::Streamed(body) => (None, Vec::new(), Some(body)),
    };
    let body_text = body
        .as_ref()
        .and_then(|bytes| std::str::from_utf8(bytes).ok());

    // Binding (may switch to an overload entry).
    let input = BindInput {
        query: &query,
        body: body_text,
        path_params: &path_params,
        headers: &headers,
        identity: identity.as_ref(),
        client_ip: &client_ip,
    };
    let mut bound = match bind(&state.table, entry, &input, state.hasher.as_ref()) {
        BindOutcome::NotFound => return Err(GatewayError::Binding),
        BindOutcome::StrictNull => return Ok(StatusCode::NO_CONTENT.into_response()),
        BindOutcome::Bound(bound) => bound,
    };
    let entry = bound.entry.clone();

    // Validation.
    validate::apply(&entry.endpoint, &bound.parameters)?;

    // Cache interactions before touching the database.
    let cache_key = entry.endpoint.cached.then(|| {
        state.cache.build_key(
            &entry.routine.expression,
            &bound.parameters,
            &entry.endpoint.cached_params,
        )
    });
    if entry.endpoint.invalidate_cache {
        if let Some(key) = &cache_key {
            state.cache.remove(key);
        }
    } else if let Some(key) = &cache_key {
        if let Some(hit) = state.cache.get(key) {
            debug!("cache hit");
            return Ok(replay(hit, &entry.endpoint));
        }
    }

    // Proxy interposition.
    if entry.endpoint.is_proxy {
        let host = entry
            .endpoint
            .proxy_host
            .as_deref()
            .ok_or_else(|| GatewayError::Internal("proxy endpoint without host".to_string()))?;
        let url = proxy::target_url(
            host,
            &entry.endpoint.path,
            &query_string,
            &state.config.proxy,
            identity.as_ref(),
            &client_ip,
        );
        let proxy_body = match streamed {
            Some(body) => Some(reqwest::Body::wrap_stream(body.into_data_stream())),
            None => body.clone().map(reqwest::Body::from),
        };
        let outcome = proxy::forward(
            &state.http,
            &state.config.proxy,
            &entry.endpoint.method,
            &url,
            &headers,
            proxy_body,
        )
        .await?;

        if entry.endpoint.is_passthrough_proxy(&entry.routine) {
            if outcome.status == 200 {
                if let Some(key) = cache_key {
                    state.cache.add_or_update(
                        key,
                        CachedResponse {
                            status: outcome.status,
                            content_type: outcome
                                .content_type
                                .clone()
                                .unwrap_or_else(|| "application/octet-stream".to_string()),
                            body: outcome.body.clone(),
                        },
                        entry.endpoint.cache_expires_in,
                    );
                }
            }
            return Ok(proxy::passthrough_response(outcome));
        }
        proxy::map_into_parameters(&mut bound, &outcome);
    }

    // Login and logout have their own response shapes.
    if entry.endpoint.login {
        return login(state, &bound).await;
    }
    if entry.endpoint.logout {
        return logout(state, &bound).await;
    }

    execute_and_stream(
        state,
        bound,
        identity.as_ref(),
        &headers,
        &client_ip,
        cache_key,
        files,
    )
    .await
}

/// The request payload, read according to the endpoint kind.
enum RequestBody {
    None,
    /// Fully buffered bytes (the primary JSON source, plain proxy bodies).
    Buffered(Bytes),
    /// Parsed multipart fields for locally handled uploads.
    Multipart(Vec<UploadedFile>),
    /// The unread body, handed through to the proxy upstream without
    /// buffering (multipart uploads with forwarding enabled).
    Streamed(Body),
}

/// Read the request body: multipart fields for upload endpoints, a
/// passthrough stream when the payload goes to a proxy upstream, raw bytes
/// otherwise.
async fn read_body(
    endpoint: &RoutineEndpoint,
    forward_uploads: bool,
    request: Request<Body>,
) -> Result<RequestBody, GatewayError> {
    if endpoint.upload && endpoint.is_proxy && forward_uploads {
        return Ok(RequestBody::Streamed(request.into_body()));
    }
    if endpoint.upload && !endpoint.is_proxy {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| GatewayError::Validation {
                status: 400,
                message: format!("invalid multipart payload: {e}"),
            })?;
        let mut files = Vec::new();
        while let Some(field) =
            multipart
                .next_field()
                .await
                .map_err(|e| GatewayError::Validation {
                    status: 400,
                    message: format!("invalid multipart payload: {e}"),
                })?
        {
            let name = field.name().unwrap_or("file").to_string();
            let file_name = field.file_name().map(String::from);
            let content_type = field.content_type().map(String::from);
            let data = field.bytes().await.map_err(|e| GatewayError::Validation {
                status: 400,
                message: format!("upload read failed: {e}"),
            })?;
            files.push(UploadedFile {
                name,
                file_name,
                content_type,
                data,
            });
        }
        return Ok(RequestBody::Multipart(files));
    }

    let body = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|e| GatewayError::Internal(format!("body read: {e}")))?;
    if body.is_empty() {
        return Ok(RequestBody::None);
    }
    Ok(RequestBody::Buffered(body))
}

/// Replay a cached response byte-for-byte.
fn replay(hit: CachedResponse, endpoint: &RoutineEndpoint) -> Response {
    let status = StatusCode::from_u16(hit.status).unwrap_or(StatusCode::OK);
    let mut response =
        (status, [(header::CONTENT_TYPE, hit.content_type)], hit.body).into_response();
    for (name, value) in &endpoint.response_headers {
        if let (Ok(name), Ok(value)) = (
            name.parse::<http::HeaderName>(),
            value.parse::<http::HeaderValue>(),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

/// `set_config` entries written before the main statement.
fn context_entries(
    endpoint: &RoutineEndpoint,
    identity: Option<&UserIdentity>,
    headers: &HeaderMap,
    client_ip: &str,
) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    if endpoint.request_headers_mode == RequestHeadersMode::Context {
        entries.push(("request.headers".to_string(), headers_json(headers)));
    }
    if endpoint.user_context {
        entries.push(("request.ip".to_string(), client_ip.to_string()));
        if let Some(identity) = identity {
            entries.push(("request.claims".to_string(), identity.claims_json()));
            for (claim, value) in &identity.claims {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                entries.push((format!("request.claim.{claim}"), text));
            }
        }
    }
    entries
}

/// Acquire the connection for a request: pooled normally, dedicated with a
/// notice-forwarding task for event-streaming endpoints.
async fn acquire_client(
    state: &GatewayState,
    endpoint: &RoutineEndpoint,
) -> Result<ClientHolder, GatewayError> {
    if endpoint.info_events {
        let config = state.sources.config(endpoint.connection_name.as_deref())?;
        let NoticeClient {
            client,
            mut notices,
        } = pgway_pg::connect_with_notices(config).await?;
        let events = state.events.clone();
        let path = endpoint.path.clone();
        let severity = endpoint.info_severity;
        tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                events.publish(&path, &notice, severity);
            }
        });
        Ok(ClientHolder::Dedicated(client))
    } else {
        let client = state
            .sources
            .acquire(endpoint.connection_name.as_deref())
            .await?;
        Ok(ClientHolder::Pooled(client))
    }
}

async fn execute_and_stream(
    state: &GatewayState,
    mut bound: BoundRequest,
    identity: Option<&UserIdentity>,
    headers: &HeaderMap,
    client_ip: &str,
    cache_key: Option<String>,
    files: Vec<UploadedFile>,
) -> Result<Response, GatewayError> {
    let entry = bound.entry.clone();
    let endpoint = &entry.endpoint;
    let routine = &entry.routine;

    let runner = RetryRunner::new(
        endpoint
            .retry_strategy
            .clone()
            .unwrap_or_else(|| state.config.command.retry.clone()),
        endpoint.command_timeout,
        state.shutdown.child_token(),
    );

    let holder = acquire_client(state, endpoint).await?;

    // Upload handling runs inside a transaction; a failure anywhere after
    // this point rolls back and undoes handler work.
    let mut in_transaction = false;
    let mut upload_metadata: Option<Value> = None;
    let handler_names = if endpoint.upload_handlers.is_empty() {
        state.config.upload.default_handlers.clone()
    } else {
        endpoint.upload_handlers.clone()
    };
    if endpoint.upload {
        holder
            .client()
            .batch_execute("begin")
            .await
            .map_err(DbError::Execute)?;
        in_transaction = true;
        let metadata = match state
            .uploads
            .run(&handler_names, &files, &state.config.upload)
            .await
        {
            Ok(metadata) => metadata,
            Err(err) => {
                let _ = holder.client().batch_execute("rollback").await;
                return Err(err);
            }
        };
        if let Some(idx) = bound.upload_metadata_index {
            let text = metadata.to_string();
            bound.parameters[idx].bind(
                ParamValue::Text(text.clone()),
                Some(text),
                ParamSource::BodyParam,
            );
        }
        upload_metadata = Some(metadata);
    }

    // User-context SET statements precede the main statement.
    let entries = context_entries(endpoint, identity, headers, client_ip);
    if !entries.is_empty() {
        if let Err(err) = execute::set_context(holder.client(), &entries).await {
            if in_transaction {
                let _ = holder.client().batch_execute("rollback").await;
            }
            return Err(err.into());
        }
    }

    let present = bound.present_indices();
    let sql = finish_expression_partial(routine, &present);
    let wire = bound.wire_params();

    let result = run_statement(
        state, endpoint, routine, &runner, holder, &sql, &wire, cache_key, in_transaction,
    )
    .await;

    if result.is_err() {
        if let Some(metadata) = &upload_metadata {
            state
                .uploads
                .undo(&handler_names, metadata, &state.config.upload)
                .await;
        }
    }
    result
}

/// Execute the main statement and shape the response. When a transaction is
/// open it commits on success and rolls back on failure; row-set responses
/// commit before streaming starts (the stream owns the connection
/// afterwards).
#[allow(clippy::too_many_arguments)]
async fn run_statement(
    state: &GatewayState,
    endpoint: &RoutineEndpoint,
    routine: &Routine,
    runner: &RetryRunner,
    holder: ClientHolder,
    sql: &str,
    wire: &[Option<String>],
    cache_key: Option<String>,
    in_transaction: bool,
) -> Result<Response, GatewayError> {
    let policy = &endpoint.error_code_policy;
    let client = holder.client();

    let outcome: Result<Response, GatewayError> = match stream::shape(routine) {
        ResponseShape::Void => runner
            .run(|| execute::execute(client, sql, wire))
            .await
            .map_err(|err| map_db_error(err, policy))
            .map(|_| StatusCode::NO_CONTENT.into_response()),
        ResponseShape::Scalar => {
            match runner
                .run(|| execute::query_opt(client, sql, wire))
                .await
                .map_err(|err| map_db_error(err, policy))
            {
                Err(err) => Err(err),
                Ok(row) => {
                    stream::scalar_response(endpoint, routine, row.as_ref()).map(
                        |(response, cacheable)| {
                            if let (Some(key), Some(cacheable)) = (cache_key.clone(), cacheable)
                            {
                                if !endpoint.raw {
                                    state.cache.add_or_update(
                                        key,
                                        cacheable,
                                        endpoint.cache_expires_in,
                                    );
                                }
                            }
                            response
                        },
                    )
                }
            }
        }
        ResponseShape::RowSet => {
            match runner
                .run(|| execute::query_stream(client, sql, wire))
                .await
                .map_err(|err| map_db_error(err, policy))
            {
                Err(err) => Err(err),
                Ok(rows) => {
                    // Streaming takes ownership of the connection; finish
                    // the transaction first.
                    if in_transaction {
                        client
                            .batch_execute("commit")
                            .await
                            .map_err(DbError::Execute)?;
                    }
                    let stream_cache = match (&cache_key, endpoint.raw) {
                        (Some(key), false) => Some(StreamCache {
                            cache: state.cache.clone(),
                            key: key.clone(),
                            ttl: endpoint.cache_expires_in,
                        }),
                        _ => None,
                    };
                    return Ok(stream::row_set_response(
                        endpoint,
                        routine,
                        holder,
                        rows,
                        stream_cache,
                    ));
                }
            }
        }
    };

    if in_transaction {
        let finish = if outcome.is_ok() { "commit" } else { "rollback" };
        let finished = holder.client().batch_execute(finish).await;
        if outcome.is_ok() {
            finished.map_err(DbError::Execute)?;
        }
    }
    outcome
}

/// Apply the endpoint's error-code policy to a finished database error.
fn map_db_error(err: DbError, policy: &pgway_core::retry::ErrorCodePolicy) -> GatewayError {
    match err {
        DbError::Execute(inner) => pgway_pg::apply_error_code_policy(inner, policy).into(),
        other => other.into(),
    }
}

/// Login endpoints: the single credential row becomes claims; a `status`
/// column overrides the response status, a `message` column the body.
async fn login(state: &GatewayState, bound: &BoundRequest) -> Result<Response, GatewayError> {
    let entry = &bound.entry;
    let client = state
        .sources
        .acquire(entry.endpoint.connection_name.as_deref())
        .await?;
    let present = bound.present_indices();
    let sql = finish_expression_partial(&entry.routine, &present);
    let row = execute::query_opt(&client, &sql, &bound.wire_params())
        .await
        .map_err(DbError::Execute)?;
    let Some(row) = row else {
        return Err(
            pgway_auth::AuthError::InvalidCredentials("no credential row".to_string()).into(),
        );
    };

    let mut status = StatusCode::OK;
    let mut message: Option<String> = None;
    let mut pairs: Vec<(String, Value)> = Vec::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let text: Option<&str> = row
            .try_get(idx)
            .map_err(|e| GatewayError::Internal(format!("credential row: {e}")))?;
        match column.name() {
            "status" => {
                if let Some(code) = text.and_then(|t| t.parse::<u16>().ok()) {
                    status = StatusCode::from_u16(code).unwrap_or(StatusCode::OK);
                }
            }
            "message" => message = text.map(String::from),
            name => {
                if let Some(text) = text {
                    pairs.push((name.to_string(), Value::from(text.to_string())));
                }
            }
        }
    }

    if !status.is_success() {
        return Ok((status, message.unwrap_or_default()).into_response());
    }

    let claims = build_claims(&pairs);
    let token = state.issuer.issue(&claims)?;
    let cookie = format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/",
        state.issuer.cookie_name, token
    );
    let body = serde_json::json!({ "token": token }).to_string();
    Ok((
        status,
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::SET_COOKIE, cookie),
        ],
        body,
    )
        .into_response())
}

/// Logout endpoints execute their void routine and clear the auth cookie.
async fn logout(state: &GatewayState, bound: &BoundRequest) -> Result<Response, GatewayError> {
    let entry = &bound.entry;
    let client = state
        .sources
        .acquire(entry.endpoint.connection_name.as_deref())
        .await?;
    let present = bound.present_indices();
    let sql = finish_expression_partial(&entry.routine, &present);
    execute::execute(&client, &sql, &bound.wire_params())
        .await
        .map_err(DbError::Execute)?;
    let cookie = format!(
        "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0",
        state.issuer.cookie_name
    );
    Ok((StatusCode::NO_CONTENT, [(header::SET_COOKIE, cookie)]).into_response())
}

/// Method filter used by the router when registering an endpoint.
pub fn method_filter(method: &Method) -> axum::routing::MethodFilter {
    use axum::routing::MethodFilter;
    match *method {
        Method::GET => MethodFilter::GET,
        Method::POST => MethodFilter::POST,
        Method::PUT => MethodFilter::PUT,
        Method::DELETE => MethodFilter::DELETE,
        Method::PATCH => MethodFilter::PATCH,
        _ => MethodFilter::POST,
    }
}
