//! The metadata builder: database state in, endpoint table out.
//!
//! Runs once at startup. For each introspected routine it derives the
//! factory endpoint, applies comment annotations and user endpoint
//! handlers, classifies parameters (user claims, client IP, upload
//! metadata, hash-of), enforces the structural rules, and indexes the
//! result by `(method, path)` with overload displacement.

use http::Method;
use pgway_core::annotations::apply_comment;
use pgway_core::endpoint::{RequestParamType, RoutineEndpoint};
use pgway_core::model::Routine;
use pgway_core::naming::to_camel_case;
use pgway_core::options::AuthOptions;
use pgway_pg::introspect;
use pgway_pg::DataSources;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::table::{EndpointTable, Entry};

const MAX_PATH_LENGTH: usize = 2048;

/// A user-supplied hook invoked for every endpoint after annotations are
/// applied. Returning `false` drops the endpoint from the table.
pub type EndpointHandler = Box<dyn Fn(&Routine, &mut RoutineEndpoint) -> bool + Send + Sync>;

/// Build failure: a routine produced an endpoint the table cannot hold.
#[derive(Debug)]
pub enum BuildError {
    Db(pgway_pg::DbError),
    InvalidEndpoint { routine: String, reason: String },
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::Db(err) => write!(f, "metadata query failed: {err}"),
            BuildError::InvalidEndpoint { routine, reason } => {
                write!(f, "invalid endpoint for {routine}: {reason}")
            }
        }
    }
}

impl std::error::Error for BuildError {}

impl From<pgway_pg::DbError> for BuildError {
    fn from(err: pgway_pg::DbError) -> Self {
        BuildError::Db(err)
    }
}

/// Run the introspection query and build the endpoint table.
pub async fn build(
    config: &GatewayConfig,
    sources: &DataSources,
    handlers: &[EndpointHandler],
) -> Result<EndpointTable, BuildError> {
    // Named metadata connection first, the default otherwise.
    let client = sources
        .acquire(config.metadata.connection.as_deref())
        .await?;
    let routines = introspect::discover(&client, &config.metadata).await?;
    drop(client);
    build_from_routines(config, routines, handlers)
}

/// Pure half of [`build`], separated so tests can feed synthetic routines.
pub fn build_from_routines(
    config: &GatewayConfig,
    routines: Vec<Routine>,
    handlers: &[EndpointHandler],
) -> Result<EndpointTable, BuildError> {
    let mut table = EndpointTable::default();
    for mut routine in routines {
        let mut endpoint = RoutineEndpoint::for_routine(&routine, &config.path_prefix);
        endpoint.command_timeout = config.command.timeout;
        endpoint.error_code_policy = config.command.error_codes.clone();

        if let Some(comment) = routine.comment.clone() {
            if let Err(err) = apply_comment(&mut endpoint, &routine, &comment) {
                warn!(routine = %routine.display_name(), error = %err, "annotation rejected, endpoint disabled");
                continue;
            }
        }

        let mut keep = true;
        for handler in handlers {
            if !handler(&routine, &mut endpoint) {
                keep = false;
                break;
            }
        }
        if !keep || endpoint.disabled {
            debug!(routine = %routine.display_name(), "endpoint disabled");
            continue;
        }

        if endpoint.is_proxy && endpoint.proxy_host.is_none() {
            endpoint.proxy_host = config.proxy.host.clone();
        }

        classify_parameters(&mut routine, &endpoint, &config.auth);
        normalize(&mut endpoint).map_err(|reason| BuildError::InvalidEndpoint {
            routine: routine.display_name(),
            reason,
        })?;
        validate(&endpoint, &routine).map_err(|reason| BuildError::InvalidEndpoint {
            routine: routine.display_name(),
            reason,
        })?;

        table.insert(Entry { routine, endpoint });
    }
    info!(endpoints = table.len(), "endpoint table built");
    Ok(table)
}

/// Set the parameter classification flags the binder dispatches on.
fn classify_parameters(routine: &mut Routine, _endpoint: &RoutineEndpoint, auth: &AuthOptions) {
    for param in &mut routine.parameters {
        if param.actual_name == auth.ip_parameter_name {
            param.is_ip_address = true;
        }
        if let Some(claim) = auth.claim_parameters.get(&param.actual_name) {
            param.user_claim = Some(claim.clone());
        }
        if param.actual_name == "_user_claims" {
            param.is_user_claims = true;
        }
        if param.actual_name == "_upload_metadata" {
            param.is_upload_metadata = true;
        }
        // `_password_hash` receives the hash of the `password` source key.
        if let Some(stem) = param
            .actual_name
            .strip_suffix("_hash")
            .map(|s| s.trim_start_matches('_'))
        {
            if !stem.is_empty() && !param.is_upload_metadata {
                param.hash_of = Some(to_camel_case(stem));
            }
        }
    }
}

/// Structural adjustments applied before an endpoint enters the table.
fn normalize(endpoint: &mut RoutineEndpoint) -> Result<(), String> {
    // Upload endpoints always POST with query-string parameters (the body
    // is the multipart payload).
    if endpoint.upload {
        endpoint.method = Method::POST;
        endpoint.request_param_type = RequestParamType::QueryString;
    }
    // A whole-body parameter consumes the body; remaining parameters must
    // come from the query string.
    if endpoint.body_parameter_name.is_some()
        && endpoint.request_param_type == RequestParamType::BodyJson
    {
        endpoint.request_param_type = RequestParamType::QueryString;
    }
    if endpoint.is_proxy && endpoint.proxy_host.is_none() {
        return Err("proxy endpoint without a host and no default configured".to_string());
    }
    Ok(())
}

fn validate(endpoint: &RoutineEndpoint, routine: &Routine) -> Result<(), String> {
    if endpoint.path.is_empty() {
        return Err("empty path".to_string());
    }
    if !endpoint.path.starts_with('/') {
        return Err("path must start with '/'".to_string());
    }
    if endpoint.path.len() > MAX_PATH_LENGTH {
        return Err(format!("path longer than {MAX_PATH_LENGTH}"));
    }
    if endpoint.login {
        if routine.is_void {
            return Err("login endpoint must not return void".to_string());
        }
        if routine.returns_unnamed_set {
            return Err("login endpoint must not return an unnamed record set".to_string());
        }
    }
    if endpoint.logout && !routine.is_void {
        return Err("logout endpoint must return void".to_string());
    }
    Ok(())
}
