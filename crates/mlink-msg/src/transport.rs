//! ---
//! mlink_section: "02-messaging-ipc-data-model"
//! mlink_subsection: "module"
//! mlink_type: "source"
//! mlink_scope: "code"
//! mlink_description: "Transport adapter interface and in-process implementations."
//! mlink_version: "v0.0.0-prealpha"
//! mlink_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;

/// Failures surfaced by transport adapters on the send path.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer side of the link is gone.
    #[error("transport channel closed")]
    Closed,
    /// The adapter could not hand the frame to the underlying stream.
    #[error("transport send failed: {0}")]
    SendFailed(String),
}

/// Adapter over the underlying byte stream.
///
/// The bridge core hands one complete serialized envelope per call; framing
/// (length prefixes, delimiters) is the adapter's contract. Inbound frames
/// reach the core through whatever receive loop the adapter owner wires to
/// [`crate::dispatch::Dispatcher::submit`].
pub trait Transport: Send + Sync {
    /// Send one serialized envelope.
    fn send(&self, frame: String) -> std::result::Result<(), TransportError>;
    /// Human-readable transport name for logging/metrics.
    fn name(&self) -> &'static str;
}

/// In-memory transport backed by a mutex protected queue.
///
/// Single-process only; used by unit tests and loopback integration.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    queue: Arc<Mutex<VecDeque<String>>>,
}

impl InMemoryTransport {
    /// Create a new in-memory transport channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop the next queued frame, if any.
    pub fn try_recv(&self) -> Option<String> {
        let mut guard = self.queue.lock().expect("queue poisoned");
        guard.pop_front()
    }

    /// Number of frames waiting in the queue.
    pub fn len(&self) -> usize {
        let guard = self.queue.lock().expect("queue poisoned");
        guard.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Transport for InMemoryTransport {
    fn send(&self, frame: String) -> std::result::Result<(), TransportError> {
        let mut guard = self.queue.lock().expect("queue poisoned");
        guard.push_back(frame);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

/// One end of a bidirectional in-process link.
///
/// [`InProcessTransport::pair`] models the engine↔platform connection:
/// frames sent on one end arrive on the other, in order, one whole
/// envelope per frame. Integration tests run a real request/reply bridge
/// over a pair without any socket plumbing.
pub struct InProcessTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

impl InProcessTransport {
    /// Create both ends of a crossed link.
    pub fn pair() -> (Arc<InProcessTransport>, Arc<InProcessTransport>) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();
        let left = Arc::new(Self {
            tx: left_tx,
            rx: tokio::sync::Mutex::new(right_rx),
        });
        let right = Arc::new(Self {
            tx: right_tx,
            rx: tokio::sync::Mutex::new(left_rx),
        });
        (left, right)
    }

    /// Receive the next inbound frame; `None` once the peer end is dropped.
    pub async fn recv(&self) -> Option<String> {
        self.rx.lock().await.recv().await
    }
}

impl Transport for InProcessTransport {
    fn send(&self, frame: String) -> std::result::Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    fn name(&self) -> &'static str {
        "in_process"
    }
}

/// Transport that refuses every send, for exercising unroutable paths.
#[derive(Default)]
pub struct FailingTransport;

impl Transport for FailingTransport {
    fn send(&self, _frame: String) -> std::result::Result<(), TransportError> {
        Err(TransportError::SendFailed("link down".to_owned()))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_transport_queues_frames_in_order() {
        let transport = InMemoryTransport::new();
        assert!(transport.is_empty());

        transport.send("one".to_owned()).expect("send one");
        transport.send("two".to_owned()).expect("send two");
        assert_eq!(transport.len(), 2);

        assert_eq!(transport.try_recv().as_deref(), Some("one"));
        assert_eq!(transport.try_recv().as_deref(), Some("two"));
        assert!(transport.try_recv().is_none());
    }

    #[tokio::test]
    async fn in_process_pair_crosses_frames_between_ends() {
        let (engine, platform) = InProcessTransport::pair();

        engine.send("from-engine".to_owned()).expect("engine send");
        platform
            .send("from-platform".to_owned())
            .expect("platform send");

        assert_eq!(platform.recv().await.as_deref(), Some("from-engine"));
        assert_eq!(engine.recv().await.as_deref(), Some("from-platform"));
    }

    #[tokio::test]
    async fn dropped_peer_closes_the_link() {
        let (engine, platform) = InProcessTransport::pair();
        drop(platform);
        // The peer's receiver is gone; sends now report a closed link.
        let err = engine.send("frame".to_owned()).expect_err("closed");
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn failing_transport_reports_send_failure() {
        let transport = FailingTransport;
        let err = transport.send("frame".to_owned()).expect_err("always fails");
        assert!(matches!(err, TransportError::SendFailed(_)));
        assert_eq!(transport.name(), "failing");
    }
}
