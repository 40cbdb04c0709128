//! ---
//! mlink_section: "02-messaging-ipc-data-model"
//! mlink_subsection: "module"
//! mlink_type: "source"
//! mlink_scope: "code"
//! mlink_description: "Correlation-id allocation and pending request/reply matching."
//! mlink_version: "v0.0.0-prealpha"
//! mlink_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::Envelope;
use crate::{ProtocolError, Result};

/// Terminal state delivered through a pending request's completion slot.
#[derive(Debug)]
enum ReplyOutcome {
    Resolved(Envelope),
    Cancelled,
}

/// Handle for one in-flight request/reply exchange.
///
/// Returned by [`CorrelationTracker::register`]; consumed by
/// [`CorrelationTracker::await_reply`]. The deadline arms when the caller
/// starts awaiting.
pub struct PendingReply {
    id: String,
    timeout: Duration,
    rx: oneshot::Receiver<ReplyOutcome>,
}

impl PendingReply {
    /// Correlation id this handle waits on.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Deadline applied when awaiting the reply.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Allocates correlation ids and matches asynchronous replies to their
/// originating requests.
///
/// The pending map is the bridge's only shared mutable state: insert on
/// send, remove on resolve, timeout, or cancel, with the racing paths
/// serialized by one mutex. Whichever path removes the entry decides the
/// exchange outcome; the completion slot is written before the lock is
/// released so the loser observes "already completed" and does nothing
/// further.
#[derive(Clone, Default)]
pub struct CorrelationTracker {
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<ReplyOutcome>>>>,
}

impl CorrelationTracker {
    /// Construct an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id unique among pending and recently-completed requests.
    pub fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Create a pending request entry for the given id.
    ///
    /// Registering an id that is somehow still pending replaces the stale
    /// entry; its waiter resolves as cancelled.
    pub fn register(&self, id: impl Into<String>, timeout: Duration) -> PendingReply {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        if self.pending.lock().insert(id.clone(), tx).is_some() {
            debug!(correlation_id = %id, "replaced stale pending request");
        }
        PendingReply { id, timeout, rx }
    }

    /// Complete the pending request matching `id` with the given reply.
    ///
    /// A duplicate or late reply finds no pending entry; that is logged and
    /// reported as [`ProtocolError::UnknownCorrelation`] so the dispatcher
    /// can drop the message without affecting anything else.
    pub fn resolve(&self, id: &str, reply: Envelope) -> Result<()> {
        let mut pending = self.pending.lock();
        match pending.remove(id) {
            Some(slot) => {
                if slot.send(ReplyOutcome::Resolved(reply)).is_err() {
                    debug!(correlation_id = %id, "reply arrived after its waiter left");
                }
                Ok(())
            }
            None => {
                warn!(correlation_id = %id, "reply does not match any pending request");
                Err(ProtocolError::UnknownCorrelation { id: id.to_owned() })
            }
        }
    }

    /// Remove a pending entry without completing it.
    ///
    /// Used when a send fails before a reply could ever arrive. Returns
    /// whether the entry was still pending.
    pub fn abandon(&self, id: &str) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    /// Suspend until the reply arrives, the deadline elapses, or the
    /// request is cancelled. Only the calling task blocks.
    pub async fn await_reply(&self, pending: PendingReply) -> Result<Envelope> {
        let PendingReply {
            id,
            timeout,
            mut rx,
        } = pending;
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(ReplyOutcome::Resolved(envelope))) => Ok(envelope),
            Ok(Ok(ReplyOutcome::Cancelled)) | Ok(Err(_)) => {
                Err(ProtocolError::RequestCancelled { id })
            }
            Err(_elapsed) => {
                if self.abandon(&id) {
                    Err(ProtocolError::ReplyTimeout { id, timeout })
                } else {
                    // Entry already removed: a resolution raced the deadline
                    // and won. Collect what it delivered.
                    match rx.try_recv() {
                        Ok(ReplyOutcome::Resolved(envelope)) => Ok(envelope),
                        Ok(ReplyOutcome::Cancelled) | Err(_) => {
                            Err(ProtocolError::RequestCancelled { id })
                        }
                    }
                }
            }
        }
    }

    /// Force-resolve every pending request as cancelled.
    ///
    /// Called when the owning capability shuts down so waiting callers fail
    /// promptly instead of blocking until their deadlines.
    pub fn cancel_all(&self) {
        let mut pending = self.pending.lock();
        for (id, slot) in pending.drain() {
            debug!(correlation_id = %id, "cancelling pending request");
            let _ = slot.send(ReplyOutcome::Cancelled);
        }
    }

    /// Number of requests currently awaiting replies.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}
