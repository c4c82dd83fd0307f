//! # pgway-pg — the PostgreSQL driver seam for the pgway gateway
//!
//! Everything that touches `tokio-postgres` lives here: pool construction
//! and connection-string resolution ([`pool`]), the retry runner and error
//! classification ([`retry`], [`error`]), text-format statement execution
//! ([`execute`]), introspection-row decoding ([`introspect`]) and dedicated
//! notice-capturing connections for event-streaming endpoints ([`notice`]).

pub mod error;
pub mod execute;
pub mod introspect;
pub mod notice;
pub mod pool;
pub mod retry;

pub use error::{apply_error_code_policy, sql_state, DbError};
pub use notice::{connect_with_notices, DbNotice, NoticeClient};
pub use pool::DataSources;
pub use retry::{is_retryable, RetryRunner};
