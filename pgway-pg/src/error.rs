//! Database error bridging: driver errors → gateway problems.

use pgway_core::problem::ProblemDetails;
use pgway_core::retry::ErrorCodePolicy;

/// Database-side failures as seen by the request layer.
#[derive(Debug)]
pub enum DbError {
    /// Connection string rejected by the driver.
    BadConfig(String),
    /// Could not obtain a connection from the pool.
    Acquire(String),
    /// Driver error from statement execution.
    Execute(tokio_postgres::Error),
    /// An introspection row did not match the 28-column contract.
    Decode(String),
    /// The per-endpoint command timeout elapsed.
    Timeout,
    /// The request was cancelled (client gone, shutdown).
    Cancelled,
    /// The retry strategy was exhausted; carries every attempt error,
    /// innermost last.
    RetryExhausted {
        attempts: usize,
        errors: Vec<tokio_postgres::Error>,
    },
    /// A SQL state matched the endpoint's error-code policy.
    Mapped(ProblemDetails),
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::BadConfig(msg) => write!(f, "invalid connection configuration: {msg}"),
            DbError::Acquire(msg) => write!(f, "could not acquire connection: {msg}"),
            DbError::Execute(err) => write!(f, "database error: {err}"),
            DbError::Decode(msg) => write!(f, "introspection row decode failed: {msg}"),
            DbError::Timeout => write!(f, "command timeout"),
            DbError::Cancelled => write!(f, "cancelled"),
            DbError::RetryExhausted { attempts, errors } => {
                write!(f, "retry exhausted after {attempts} attempts")?;
                if let Some(last) = errors.last() {
                    write!(f, ": {last}")?;
                }
                Ok(())
            }
            DbError::Mapped(problem) => write!(f, "{} ({})", problem.title, problem.status),
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DbError::Execute(err) => Some(err),
            DbError::RetryExhausted { errors, .. } => {
                errors.last().map(|e| e as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// SQL state of a driver error, when the server reported one.
pub fn sql_state(err: &tokio_postgres::Error) -> Option<String> {
    err.as_db_error().map(|db| db.code().code().to_string())
}

/// Apply an endpoint's error-code policy to a driver error; a matching SQL
/// state turns into [`DbError::Mapped`].
pub fn apply_error_code_policy(err: tokio_postgres::Error, policy: &ErrorCodePolicy) -> DbError {
    if let Some(state) = sql_state(&err) {
        if let Some(mapping) = policy.get(&state) {
            return DbError::Mapped(ProblemDetails::from_mapping(mapping, &state));
        }
    }
    DbError::Execute(err)
}

impl DbError {
    /// The RFC-7807 document written for this error.
    pub fn to_problem(&self) -> ProblemDetails {
        match self {
            DbError::Mapped(problem) => problem.clone(),
            DbError::Timeout => ProblemDetails::new(408, "Request Timeout"),
            DbError::Cancelled => ProblemDetails::new(499, "Client Closed Request"),
            DbError::Execute(err) => match sql_state(err) {
                Some(state) => ProblemDetails::internal(state),
                None => ProblemDetails::internal(err.to_string()),
            },
            other => ProblemDetails::internal(other.to_string()),
        }
    }
}
