//! Standing server-to-client event streams.
//!
//! [`StreamRegistry`] owns every open `GET /mcp` stream. Each stream gets a
//! process-unique id, an initial comment frame, and its own keep-alive timer.
//! The registry holds the only strong sender for a stream, so removing the
//! entry is what closes the client's channel.

use std::{
    convert::Infallible,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

use axum::response::sse::Event;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::Stream;
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info};

use crate::config::{DEFAULT_KEEP_ALIVE_SECS, DEFAULT_STREAM_BUFFER};

pub const CONNECTED_COMMENT: &str = "MCP SSE Stream Connected";
pub const KEEP_ALIVE_COMMENT: &str = "keep-alive";

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Accept header must include text/event-stream")]
    NotAcceptable,
    #[error("server is shutting down")]
    ShuttingDown,
    #[error("failed to encode event: {0}")]
    Encode(#[source] axum::Error),
}

/// Registry-owned record of one open stream.
struct StreamConnection {
    opened_at: DateTime<Utc>,
    last_event_id: Option<String>,
    sink: mpsc::Sender<Event>,
    keep_alive: JoinHandle<()>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub connection_id: u64,
    pub opened_at: DateTime<Utc>,
    pub last_event_id: Option<String>,
}

struct RegistryInner {
    connections: DashMap<u64, StreamConnection>,
    next_id: AtomicU64,
    accepting: AtomicBool,
    keep_alive: Duration,
    buffer: usize,
}

/// Cloning is cheap; all clones share the same connections.
#[derive(Clone)]
pub struct StreamRegistry {
    inner: Arc<RegistryInner>,
}

impl StreamRegistry {
    pub fn new(keep_alive: Duration, buffer: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connections: DashMap::new(),
                next_id: AtomicU64::new(0),
                accepting: AtomicBool::new(true),
                keep_alive: keep_alive.max(Duration::from_millis(1)),
                // The connected comment must always fit.
                buffer: buffer.max(1),
            }),
        }
    }

    /// Opens a standing stream for a client.
    ///
    /// `last_event_id` is recorded for later resumption support; nothing is
    /// replayed.
    pub fn open(
        &self,
        accepts_event_stream: bool,
        last_event_id: Option<String>,
    ) -> Result<EventStream, StreamError> {
        if !accepts_event_stream {
            return Err(StreamError::NotAcceptable);
        }
        if !self.is_accepting() {
            return Err(StreamError::ShuttingDown);
        }

        let connection_id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (sink, receiver) = mpsc::channel(self.inner.buffer);
        let _ = sink.try_send(Event::default().comment(CONNECTED_COMMENT));
        let keep_alive = spawn_keep_alive(connection_id, sink.downgrade(), self.inner.keep_alive);

        self.inner.connections.insert(
            connection_id,
            StreamConnection {
                opened_at: Utc::now(),
                last_event_id: last_event_id.clone(),
                sink,
                keep_alive,
            },
        );

        // Shutdown flips the barrier before draining. Re-checking after the
        // insert means either the drain saw this entry or we withdraw it.
        if !self.is_accepting() {
            self.close(connection_id);
            return Err(StreamError::ShuttingDown);
        }

        info!(
            connection_id,
            last_event_id = last_event_id.as_deref().unwrap_or("none"),
            "stream opened"
        );

        Ok(EventStream {
            connection_id,
            receiver,
            registry: self.clone(),
        })
    }

    /// Removes a stream and cancels its keep-alive timer. Returns `false` if
    /// the stream was already gone.
    pub fn close(&self, connection_id: u64) -> bool {
        match self.inner.connections.remove(&connection_id) {
            Some((_, connection)) => {
                connection.keep_alive.abort();
                info!(connection_id, "stream closed");
                true
            }
            None => false,
        }
    }

    /// Writes one `data:` event to every open stream. Returns how many
    /// streams accepted it; full or closing sinks are skipped.
    ///
    /// The HTTP surface never calls this itself. It is the hook an embedding
    /// application uses for server-initiated messages, through the registry
    /// handle in [`crate::AppState`].
    pub fn push<T: Serialize + ?Sized>(&self, message: &T) -> Result<usize, StreamError> {
        let event = Event::default()
            .json_data(message)
            .map_err(StreamError::Encode)?;

        let delivered = self
            .inner
            .connections
            .iter()
            .filter(|entry| entry.sink.try_send(event.clone()).is_ok())
            .count();
        debug!(delivered, "pushed event to standing streams");
        Ok(delivered)
    }

    /// Stops accepting streams, closes every open one, and returns how many
    /// were closed.
    pub fn shutdown(&self) -> usize {
        self.inner.accepting.store(false, Ordering::SeqCst);

        let mut closed = 0;
        self.inner.connections.retain(|connection_id, connection| {
            connection.keep_alive.abort();
            debug!(connection_id, "stream closed by shutdown");
            closed += 1;
            false
        });
        closed
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Snapshot of the open streams, ordered by id.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut connections = self
            .inner
            .connections
            .iter()
            .map(|entry| ConnectionInfo {
                connection_id: *entry.key(),
                opened_at: entry.opened_at,
                last_event_id: entry.last_event_id.clone(),
            })
            .collect::<Vec<_>>();
        connections.sort_by_key(|connection| connection.connection_id);
        connections
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS),
            DEFAULT_STREAM_BUFFER,
        )
    }
}

fn spawn_keep_alive(
    connection_id: u64,
    sink: mpsc::WeakSender<Event>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // A period too long to schedule means the timer never fires.
        let Some(start) = first_tick(Instant::now(), period) else {
            return;
        };
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(sink) = sink.upgrade() else {
                break;
            };
            // A failed write is not a disconnect; the transport reports that.
            if sink
                .try_send(Event::default().comment(KEEP_ALIVE_COMMENT))
                .is_err()
            {
                debug!(connection_id, "keep-alive skipped");
            }
        }
    })
}

fn first_tick(now: Instant, period: Duration) -> Option<Instant> {
    now.checked_add(period)
}

/// The outbound half of a standing stream, handed to the SSE response.
///
/// The transport drops it when the peer disconnects, which unregisters the
/// stream.
pub struct EventStream {
    connection_id: u64,
    receiver: mpsc::Receiver<Event>,
    registry: StreamRegistry,
}

impl EventStream {
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx).map(|event| event.map(Ok))
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.registry.close(self.connection_id);
    }
}

#[cfg(test)]
mod tests {
    use axum::response::{sse::Sse, IntoResponse};
    use futures_util::StreamExt;
    use http_body_util::BodyExt;
    use serde_json::json;

    use super::*;
    use crate::mcp::rpc::RpcNotification;

    const PERIOD: Duration = Duration::from_secs(30);

    fn registry() -> StreamRegistry {
        StreamRegistry::new(PERIOD, 8)
    }

    async fn next_frame(body: &mut axum::body::Body) -> String {
        let frame = body
            .frame()
            .await
            .expect("stream still open")
            .expect("frame without error");
        let data = frame.into_data().expect("data frame");
        String::from_utf8(data.to_vec()).expect("utf-8 frame")
    }

    #[tokio::test]
    async fn rejects_clients_without_event_stream_accept() {
        let error = registry().open(false, None).err().expect("must reject");
        assert!(matches!(error, StreamError::NotAcceptable));
    }

    #[tokio::test]
    async fn ids_are_monotonic_and_start_at_zero() {
        let registry = registry();
        let streams = (0..3)
            .map(|_| registry.open(true, None).expect("open"))
            .collect::<Vec<_>>();

        let ids = streams.iter().map(EventStream::connection_id).collect::<Vec<_>>();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(registry.active_count(), 3);

        drop(streams);
        let next = registry.open(true, None).expect("open");
        assert_eq!(next.connection_id(), 3);
    }

    #[tokio::test]
    async fn records_last_event_id() {
        let registry = registry();
        let _stream = registry.open(true, Some("evt-41".to_string())).expect("open");

        let connections = registry.connections();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].last_event_id.as_deref(), Some("evt-41"));
    }

    #[tokio::test]
    async fn dropping_the_stream_unregisters_it() {
        let registry = registry();
        let first = registry.open(true, None).expect("open");
        let _second = registry.open(true, None).expect("open");

        drop(first);

        let ids = registry
            .connections()
            .into_iter()
            .map(|connection| connection.connection_id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![1]);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let registry = registry();
        let stream = registry.open(true, None).expect("open");
        let id = stream.connection_id();

        assert!(registry.close(id));
        assert!(!registry.close(id));
        drop(stream);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn closing_ends_the_outbound_stream() {
        let registry = registry();
        let mut stream = registry.open(true, None).expect("open");

        assert!(registry.close(stream.connection_id()));

        assert!(matches!(stream.next().await, Some(Ok(_))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn writes_connected_comment_then_keep_alives() {
        let registry = registry();
        let stream = registry.open(true, None).expect("open");
        let mut body = Sse::new(stream).into_response().into_body();

        assert_eq!(next_frame(&mut body).await, ": MCP SSE Stream Connected\n\n");
        assert_eq!(next_frame(&mut body).await, ": keep-alive\n\n");
        assert_eq!(next_frame(&mut body).await, ": keep-alive\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn closing_one_stream_leaves_other_timers_running() {
        let registry = registry();
        let mut closed = registry.open(true, None).expect("open");
        let mut live = registry.open(true, None).expect("open");

        assert!(registry.close(closed.connection_id()));

        // Connected comment, then nothing more for the closed stream.
        assert!(closed.next().await.is_some());
        assert!(closed.next().await.is_none());

        assert!(live.next().await.is_some());
        let keep_alive = tokio::time::timeout(PERIOD * 2, live.next()).await;
        assert!(matches!(keep_alive, Ok(Some(Ok(_)))));
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_does_not_fire_early() {
        let registry = registry();
        let mut stream = registry.open(true, None).expect("open");
        assert!(stream.next().await.is_some());

        let early = tokio::time::timeout(PERIOD - Duration::from_secs(1), stream.next()).await;
        assert!(early.is_err());
    }

    #[tokio::test]
    async fn push_reaches_every_open_stream() {
        let registry = registry();
        let first = registry.open(true, None).expect("open");
        let second = registry.open(true, None).expect("open");
        let mut first_body = Sse::new(first).into_response().into_body();
        let mut second_body = Sse::new(second).into_response().into_body();

        let delivered = registry
            .push(&RpcNotification::new(
                "notifications/message",
                Some(json!({"level": "info"})),
            ))
            .expect("push");
        assert_eq!(delivered, 2);

        for body in [&mut first_body, &mut second_body] {
            assert_eq!(next_frame(body).await, ": MCP SSE Stream Connected\n\n");
            assert_eq!(
                next_frame(body).await,
                "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{\"level\":\"info\"}}\n\n"
            );
        }
    }

    #[test]
    fn unschedulable_periods_have_no_first_tick() {
        let now = Instant::now();
        assert_eq!(first_tick(now, PERIOD), Some(now + PERIOD));
        assert!(first_tick(now, Duration::MAX).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn huge_keep_alive_period_only_sends_the_connected_comment() {
        let registry = StreamRegistry::new(Duration::MAX, 8);
        let mut stream = registry.open(true, None).expect("open");

        assert!(stream.next().await.is_some());
        let later = tokio::time::timeout(Duration::from_secs(86_400), stream.next()).await;
        assert!(later.is_err());
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn registrations_racing_shutdown_never_survive_the_drain() {
        for _ in 0..50 {
            let registry = registry();
            let openers = (0..8)
                .map(|_| {
                    let registry = registry.clone();
                    tokio::spawn(async move {
                        let mut held = Vec::new();
                        for _ in 0..50 {
                            match registry.open(true, None) {
                                Ok(stream) => held.push(stream),
                                Err(StreamError::ShuttingDown) => break,
                                Err(err) => panic!("unexpected open failure: {err}"),
                            }
                            tokio::task::yield_now().await;
                        }
                        held
                    })
                })
                .collect::<Vec<_>>();

            tokio::task::yield_now().await;
            registry.shutdown();

            // Streams stay alive here, so an empty registry means the drain
            // or the barrier removed them, not their drop guards.
            let mut held = Vec::new();
            for opener in openers {
                held.extend(opener.await.expect("join opener"));
            }
            assert_eq!(registry.active_count(), 0);
            assert!(matches!(
                registry.open(true, None).err(),
                Some(StreamError::ShuttingDown)
            ));
            drop(held);
        }
    }

    #[tokio::test]
    async fn shutdown_closes_everything_and_refuses_new_streams() {
        let registry = registry();
        let mut streams = (0..3)
            .map(|_| registry.open(true, None).expect("open"))
            .collect::<Vec<_>>();

        assert_eq!(registry.shutdown(), 3);
        assert_eq!(registry.active_count(), 0);
        assert!(!registry.is_accepting());

        for stream in &mut streams {
            assert!(stream.next().await.is_some());
            assert!(stream.next().await.is_none());
        }

        let error = registry.open(true, None).err().expect("must refuse");
        assert!(matches!(error, StreamError::ShuttingDown));
    }
}
