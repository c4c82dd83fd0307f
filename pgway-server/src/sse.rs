//! NOTICE streaming over Server-Sent Events.
//!
//! Each endpoint that opts in with `info-events` gets a broadcast channel;
//! request execution publishes the notices its statement raised, and
//! subscribers on the endpoint's event path receive them filtered by
//! severity, scope and roles. Slow subscribers lose messages rather than
//! blocking the broadcast.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::response::sse::Event as SseEvent;
use pgway_core::endpoint::NoticeSeverity;
use pgway_core::options::SseOptions;
use pgway_pg::DbNotice;
use tokio::sync::broadcast;
use tracing::debug;

use crate::table::EndpointTable;

/// One event delivered to subscribers.
#[derive(Clone, Debug)]
pub struct NoticeEvent {
    pub severity: String,
    pub message: String,
}

/// Broadcast channels for every event-streaming endpoint, keyed by the
/// endpoint's (non-suffixed) path.
#[derive(Clone)]
pub struct EventRouter {
    channels: HashMap<String, broadcast::Sender<NoticeEvent>>,
    pub path_suffix: String,
}

impl EventRouter {
    /// Create a channel per `info-events` endpoint in the table. Streaming
    /// can be switched off globally, which leaves every publish a no-op.
    pub fn from_table(table: &EndpointTable, options: &SseOptions) -> EventRouter {
        let mut channels = HashMap::new();
        if options.enabled {
            for entry in table.routable() {
                if entry.endpoint.info_events {
                    let (tx, _) = broadcast::channel(options.channel_capacity.max(1));
                    channels.insert(entry.endpoint.path.clone(), tx);
                }
            }
        }
        EventRouter {
            channels,
            path_suffix: options.path_suffix.clone(),
        }
    }

    /// Publish a database notice to an endpoint's subscribers, applying the
    /// endpoint's minimum severity.
    pub fn publish(&self, path: &str, notice: &DbNotice, min_severity: NoticeSeverity) {
        let Some(tx) = self.channels.get(path) else {
            return;
        };
        if NoticeSeverity::parse(&notice.severity) < min_severity {
            return;
        }
        let event = NoticeEvent {
            severity: notice.severity.clone(),
            message: notice.message.clone(),
        };
        // No receivers is fine; events are fire-and-forget.
        if tx.send(event).is_err() {
            debug!(path, "notice dropped, no subscribers");
        }
    }

    pub fn subscribe(&self, path: &str) -> Option<EventSubscription> {
        self.channels.get(path).map(|tx| EventSubscription {
            rx: tx.subscribe(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

fn to_sse_event(event: NoticeEvent) -> SseEvent {
    SseEvent::default().event(event.severity).data(event.message)
}

/// A subscription stream yielding SSE events — ready for `Sse::new()`.
///
/// Lagged receivers skip to the oldest retained message instead of
/// erroring out.
pub struct EventSubscription {
    rx: broadcast::Receiver<NoticeEvent>,
}

impl futures_core::Stream for EventSubscription {
    type Item = Result<SseEvent, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // Drain ready messages first without registering a waker.
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Poll::Ready(Some(Ok(to_sse_event(event)))),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Closed) => return Poll::Ready(None),
                Err(broadcast::error::TryRecvError::Empty) => break,
            }
        }
        // recv() is cancel-safe: dropping the future between polls does not
        // lose messages.
        let rx = &mut self.rx;
        let mut recv = Box::pin(rx.recv());
        match recv.as_mut().poll(cx) {
            Poll::Ready(Ok(event)) => Poll::Ready(Some(Ok(to_sse_event(event)))),
            Poll::Ready(Err(broadcast::error::RecvError::Closed)) => Poll::Ready(None),
            Poll::Ready(Err(broadcast::error::RecvError::Lagged(_))) => {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Entry;
    use futures_core::Stream;
    use pgway_core::endpoint::RoutineEndpoint;
    use pgway_core::model::{Routine, RoutineType, Volatility};

    fn event_routine() -> Routine {
        Routine {
            routine_type: RoutineType::Function,
            schema: "public".to_string(),
            name: "watch".to_string(),
            comment: None,
            is_strict: false,
            volatility: Volatility::Volatile,
            returns_set: false,
            is_void: true,
            returns_unnamed_set: false,
            returns_record_type: false,
            column_count: 0,
            original_column_names: Vec::new(),
            converted_column_names: Vec::new(),
            column_types: Vec::new(),
            parameters: Vec::new(),
            has_variadic: false,
            expression: String::new(),
            full_definition: String::new(),
            simple_definition: String::new(),
            composite_columns: Default::default(),
            composite_array_columns: Default::default(),
        }
    }

    fn router() -> EventRouter {
        let routine = event_routine();
        let mut endpoint = RoutineEndpoint::for_routine(&routine, "/api");
        endpoint.info_events = true;
        let mut table = EndpointTable::default();
        table.insert(Entry { routine, endpoint });
        EventRouter::from_table(&table, &SseOptions::default())
    }

    fn notice(severity: &str, message: &str) -> DbNotice {
        DbNotice {
            severity: severity.to_string(),
            message: message.to_string(),
            detail: None,
            hint: None,
        }
    }

    async fn next_event(sub: &mut EventSubscription) -> Option<SseEvent> {
        tokio::time::timeout(std::time::Duration::from_millis(100), async {
            std::future::poll_fn(|cx| Pin::new(&mut *sub).poll_next(cx)).await
        })
        .await
        .ok()
        .flatten()
        .map(|r| r.unwrap())
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let router = router();
        let mut sub = router.subscribe("/api/watch").unwrap();
        router.publish("/api/watch", &notice("NOTICE", "hello"), NoticeSeverity::Info);
        let event = next_event(&mut sub).await.expect("should receive event");
        let debug = format!("{event:?}");
        assert!(debug.contains("hello"));
    }

    #[tokio::test]
    async fn severity_filter_drops_low_notices() {
        let router = router();
        let mut sub = router.subscribe("/api/watch").unwrap();
        router.publish("/api/watch", &notice("DEBUG", "noise"), NoticeSeverity::Warning);
        assert!(next_event(&mut sub).await.is_none());
        router.publish("/api/watch", &notice("WARNING", "real"), NoticeSeverity::Warning);
        assert!(next_event(&mut sub).await.is_some());
    }

    #[tokio::test]
    async fn unknown_path_has_no_channel() {
        let router = router();
        assert!(router.subscribe("/api/other").is_none());
    }
}
