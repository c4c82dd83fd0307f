//! The single error type the request handler catches at its boundary, and
//! its mapping to HTTP responses.

use axum::response::{IntoResponse, Response};
use http::{header, StatusCode};
use pgway_auth::AuthError;
use pgway_core::problem::{ProblemDetails, CONTENT_TYPE as PROBLEM_JSON};
use pgway_pg::DbError;

/// Everything that can abort a request between binding and streaming.
#[derive(Debug)]
pub enum GatewayError {
    /// Parameter missing with no default, or extra key present. Empty body.
    Binding,
    /// A validation rule failed: configured status plus plain-text message.
    Validation { status: u16, message: String },
    /// Unauthenticated or role-denied.
    Auth(AuthError),
    /// Basic auth required; carries the `WWW-Authenticate` challenge.
    BasicChallenge(String),
    /// Database failure, already classified.
    Db(DbError),
    /// Upstream proxy timeout.
    ProxyTimeout,
    /// Upstream proxy failure with the status to relay.
    ProxyFailure { status: u16, message: String },
    /// Anything unexpected.
    Internal(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Binding => write!(f, "parameter binding failed"),
            GatewayError::Validation { status, message } => {
                write!(f, "validation failed ({status}): {message}")
            }
            GatewayError::Auth(err) => write!(f, "{err}"),
            GatewayError::BasicChallenge(_) => write!(f, "authentication required"),
            GatewayError::Db(err) => write!(f, "{err}"),
            GatewayError::ProxyTimeout => write!(f, "proxy timeout"),
            GatewayError::ProxyFailure { status, message } => {
                write!(f, "proxy failure ({status}): {message}")
            }
            GatewayError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<DbError> for GatewayError {
    fn from(err: DbError) -> Self {
        GatewayError::Db(err)
    }
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        GatewayError::Auth(err)
    }
}

fn problem_response(problem: ProblemDetails) -> Response {
    let status =
        StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::to_vec(&problem).unwrap_or_default();
    (
        status,
        [(header::CONTENT_TYPE, PROBLEM_JSON)],
        body,
    )
        .into_response()
}

impl GatewayError {
    /// Response status, used to decide error-level logging.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Binding => StatusCode::NOT_FOUND,
            GatewayError::Validation { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            GatewayError::Auth(err) => {
                StatusCode::from_u16(err.to_problem().status).unwrap_or(StatusCode::UNAUTHORIZED)
            }
            GatewayError::BasicChallenge(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Db(err) => StatusCode::from_u16(err.to_problem().status)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            GatewayError::ProxyTimeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::ProxyFailure { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::Binding => StatusCode::NOT_FOUND.into_response(),
            GatewayError::Validation { status, message } => (
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST),
                [(header::CONTENT_TYPE, "text/plain")],
                message,
            )
                .into_response(),
            GatewayError::Auth(err) => problem_response(err.to_problem()),
            GatewayError::BasicChallenge(challenge) => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, challenge)],
            )
                .into_response(),
            GatewayError::Db(err) => problem_response(err.to_problem()),
            GatewayError::ProxyTimeout => problem_response(ProblemDetails::gateway_timeout()),
            GatewayError::ProxyFailure { status, message } => problem_response(
                ProblemDetails::new(status, "Bad Gateway").with_detail(message),
            ),
            GatewayError::Internal(msg) => problem_response(ProblemDetails::internal(msg)),
        }
    }
}
