use pgway_core::problem::ProblemDetails;

/// Authentication and credential errors.
#[derive(Debug)]
pub enum AuthError {
    /// No usable credentials on the request.
    Unauthenticated,
    /// Credentials were present but invalid (bad token, bad password).
    InvalidCredentials(String),
    /// The authenticated user lacks a required role.
    Forbidden,
    /// Token signing/verification failed structurally.
    Token(String),
    /// Password hashing failed.
    Hashing(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Unauthenticated => write!(f, "unauthenticated"),
            AuthError::InvalidCredentials(msg) => write!(f, "invalid credentials: {msg}"),
            AuthError::Forbidden => write!(f, "forbidden"),
            AuthError::Token(msg) => write!(f, "token error: {msg}"),
            AuthError::Hashing(msg) => write!(f, "hashing error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl AuthError {
    /// The RFC-7807 document written for this error. Detail is never
    /// included — credential errors stay opaque to clients.
    pub fn to_problem(&self) -> ProblemDetails {
        match self {
            AuthError::Forbidden => ProblemDetails::forbidden(),
            _ => ProblemDetails::unauthorized(),
        }
    }
}
