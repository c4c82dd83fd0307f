//! Dedicated connections that surface NOTICE messages.
//!
//! Pooled connections are driven internally by the pool and drop server
//! messages, so endpoints that stream notices execute on a connection opened
//! here: the connection task forwards every `AsyncMessage::Notice` into a
//! channel the SSE router drains.

use futures_util::future::poll_fn;
use tokio::sync::mpsc;
use tokio_postgres::config::Config;
use tokio_postgres::{AsyncMessage, Client, NoTls};
use tracing::debug;

use crate::error::DbError;

/// One NOTICE emitted by the server during statement execution.
#[derive(Clone, Debug, PartialEq)]
pub struct DbNotice {
    /// `DEBUG`, `LOG`, `INFO`, `NOTICE`, `WARNING`…
    pub severity: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

/// A client whose connection task forwards notices.
pub struct NoticeClient {
    pub client: Client,
    pub notices: mpsc::UnboundedReceiver<DbNotice>,
}

/// Open a dedicated connection and start its driver task. Notices arrive on
/// the returned channel in server-emit order; the channel closes when the
/// connection does.
pub async fn connect_with_notices(config: &Config) -> Result<NoticeClient, DbError> {
    let (client, mut connection) = config
        .connect(NoTls)
        .await
        .map_err(|e| DbError::Acquire(e.to_string()))?;
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            match poll_fn(|cx| connection.poll_message(cx)).await {
                Some(Ok(AsyncMessage::Notice(notice))) => {
                    let forwarded = tx.send(DbNotice {
                        severity: notice.severity().to_string(),
                        message: notice.message().to_string(),
                        detail: notice.detail().map(String::from),
                        hint: notice.hint().map(String::from),
                    });
                    if forwarded.is_err() {
                        // Receiver gone; keep driving the connection so the
                        // client side stays usable.
                        continue;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(error = %err, "notice connection error");
                    break;
                }
                None => break,
            }
        }
    });
    Ok(NoticeClient {
        client,
        notices: rx,
    })
}
