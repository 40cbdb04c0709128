//! ---
//! mlink_section: "02-messaging-ipc-data-model"
//! mlink_subsection: "module"
//! mlink_type: "source"
//! mlink_scope: "code"
//! mlink_description: "Routing of decoded envelopes to handlers and of outbound envelopes to transports."
//! mlink_version: "v0.0.0-prealpha"
//! mlink_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::codec::EnvelopeCodec;
use crate::correlation::CorrelationTracker;
use crate::logging::{log_message, MessageDirection, MessagingMetricsExporter};
use crate::registry::{SchemaKey, SchemaRegistry};
use crate::transport::{InProcessTransport, Transport};
use crate::types::{Envelope, Header, ProtocolVersion};
use crate::{ProtocolError, Result};

/// Deadline applied when `publish_for_reply` callers pass no timeout.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Inbound frame size ceiling applied before decoding.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Tunables applied at dispatcher construction.
pub struct DispatcherOptions {
    /// Reply deadline used when the caller passes none.
    pub default_reply_timeout: Duration,
    /// Inbound frames larger than this are rejected before decoding.
    pub max_frame_bytes: usize,
    /// Optional Prometheus mirror of the dispatch counters.
    pub exporter: Option<MessagingMetricsExporter>,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            default_reply_timeout: DEFAULT_REPLY_TIMEOUT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            exporter: None,
        }
    }
}

/// Snapshot of dispatch counters used by dashboards and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchMetrics {
    /// Envelopes successfully handed to the transport.
    pub sent: u64,
    /// Envelopes received and decoded from the transport.
    pub received: u64,
    /// Envelopes dropped by decode, dispatch, or send failures.
    pub dropped: u64,
}

struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> DispatchMetrics {
        DispatchMetrics {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

struct DispatcherInner {
    registry: Arc<SchemaRegistry>,
    codec: EnvelopeCodec,
    tracker: CorrelationTracker,
    transport: Arc<dyn Transport>,
    counters: Counters,
    exporter: Option<MessagingMetricsExporter>,
    default_reply_timeout: Duration,
    max_frame_bytes: usize,
}

/// Routes inbound envelopes to handlers and outbound envelopes to the
/// transport.
///
/// Cheaply cloneable: inbound pumps, capability handlers, and shutdown
/// hooks all hold clones sharing one inner state. Per-message failures are
/// logged and dropped without affecting other messages; only registration
/// mistakes and transport breakage escalate.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Construct a dispatcher with default options.
    pub fn new(registry: Arc<SchemaRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self::with_options(registry, transport, DispatcherOptions::default())
    }

    /// Construct a dispatcher with explicit tunables.
    pub fn with_options(
        registry: Arc<SchemaRegistry>,
        transport: Arc<dyn Transport>,
        options: DispatcherOptions,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                codec: EnvelopeCodec::new(registry.clone()),
                registry,
                tracker: CorrelationTracker::new(),
                transport,
                counters: Counters::new(),
                exporter: options.exporter,
                default_reply_timeout: options.default_reply_timeout,
                max_frame_bytes: options.max_frame_bytes,
            }),
        }
    }

    /// Codec bound to this dispatcher's registry.
    pub fn codec(&self) -> &EnvelopeCodec {
        &self.inner.codec
    }

    /// Correlation tracker owning the pending-request map.
    pub fn tracker(&self) -> &CorrelationTracker {
        &self.inner.tracker
    }

    /// Snapshot of the dispatch counters.
    pub fn metrics(&self) -> DispatchMetrics {
        self.inner.counters.snapshot()
    }

    /// Route one inbound frame.
    ///
    /// Replies resolve their pending request; everything else goes to the
    /// handler bound for its (topic, action, version). The handler runs in
    /// its own task so a slow or failing handler never stalls dispatch of
    /// subsequent messages. Errors returned here describe why the frame
    /// was dropped; the dispatcher itself stays serviceable.
    pub async fn submit(&self, frame: &str) -> Result<()> {
        if frame.len() > self.inner.max_frame_bytes {
            self.count_dropped();
            return Err(ProtocolError::MalformedEnvelope {
                reason: format!(
                    "frame of {} bytes exceeds the {} byte limit",
                    frame.len(),
                    self.inner.max_frame_bytes
                ),
            });
        }

        let envelope = match self.inner.codec.decode(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "dropping undecodable inbound frame");
                self.count_dropped();
                return Err(err);
            }
        };
        log_message(MessageDirection::Inbound, &envelope);
        self.count_received();

        if envelope.is_reply() {
            let id = envelope.header.id.clone();
            return match self.inner.tracker.resolve(&id, envelope) {
                Ok(()) => Ok(()),
                Err(err) => {
                    self.count_dropped();
                    Err(err)
                }
            };
        }

        let key = SchemaKey::of(envelope.description(), envelope.header.version);
        // Decode already proved the schema exists; the second lookup only
        // fetches the handler binding.
        let entry = self
            .inner
            .registry
            .lookup(&key.topic, &key.action, key.version)?;
        let Some(handler) = entry.handler() else {
            warn!(schema = %key, "no handler bound; dropping message");
            self.count_dropped();
            return Err(ProtocolError::UnhandledMessage { key });
        };

        let handler = handler.clone();
        let dispatcher = self.clone();
        let wants_reply = envelope.header.message_type.expects_reply();
        let request_header = envelope.header;
        let payload = envelope.payload;
        tokio::spawn(async move {
            match handler.handle(payload).await {
                Ok(Some(reply_payload)) if wants_reply => {
                    if let Err(err) = dispatcher.send_reply(&request_header, reply_payload) {
                        error!(
                            error = %err,
                            correlation_id = %request_header.id,
                            "failed to send reply"
                        );
                    }
                }
                Ok(Some(_)) => {
                    debug!(
                        topic = %request_header.message_description.topic,
                        action = %request_header.message_description.action,
                        "handler returned a payload for a message expecting no reply"
                    );
                }
                Ok(None) => {}
                Err(err) => {
                    error!(
                        error = %err,
                        topic = %request_header.message_description.topic,
                        action = %request_header.message_description.action,
                        "handler failed; message dropped"
                    );
                    dispatcher.count_dropped();
                }
            }
        });
        Ok(())
    }

    /// Publish a fire-and-forget event.
    pub fn publish<T: Serialize>(
        &self,
        topic: &str,
        action: &str,
        version: ProtocolVersion,
        payload: &T,
    ) -> Result<()> {
        let value = serde_json::to_value(payload)?;
        let envelope = Envelope::publish(topic, action, version, value);
        self.send_envelope(&envelope)
    }

    /// Publish a request and suspend until its reply payload arrives.
    ///
    /// A send failure is terminal immediately: the pending entry is
    /// released and the transport error surfaces to the caller. Otherwise
    /// the caller suspends until the reply resolves, the deadline elapses,
    /// or the exchange is cancelled.
    pub async fn publish_for_reply<T: Serialize>(
        &self,
        topic: &str,
        action: &str,
        version: ProtocolVersion,
        payload: &T,
        timeout: Option<Duration>,
    ) -> Result<JsonValue> {
        let value = serde_json::to_value(payload)?;
        let id = self.inner.tracker.next_id();
        let deadline = timeout.unwrap_or(self.inner.default_reply_timeout);
        let pending = self.inner.tracker.register(id.clone(), deadline);
        let envelope = Envelope::publish_for_reply(topic, action, version, id.clone(), value);

        if let Err(err) = self.send_envelope(&envelope) {
            self.inner.tracker.abandon(&id);
            return Err(err);
        }

        let started = Instant::now();
        match self.inner.tracker.await_reply(pending).await {
            Ok(reply) => {
                if let Some(exporter) = &self.inner.exporter {
                    exporter.observe_reply_latency(started.elapsed());
                }
                Ok(reply.payload)
            }
            Err(err) => {
                if matches!(err, ProtocolError::ReplyTimeout { .. }) {
                    if let Some(exporter) = &self.inner.exporter {
                        exporter.observe_reply_timeout();
                    }
                }
                Err(err)
            }
        }
    }

    /// Force-cancel every pending request (capability shutdown).
    pub fn cancel_pending(&self) {
        self.inner.tracker.cancel_all();
    }

    fn send_reply(&self, request: &Header, payload: JsonValue) -> Result<()> {
        let reply = Envelope::reply_to(request, payload);
        self.send_envelope(&reply)
    }

    fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        let frame = self.inner.codec.encode(envelope)?;
        log_message(MessageDirection::Outbound, envelope);
        match self.inner.transport.send(frame) {
            Ok(()) => {
                self.count_sent();
                Ok(())
            }
            Err(err) => {
                warn!(
                    transport = self.inner.transport.name(),
                    error = %err,
                    "transport send failed"
                );
                self.count_dropped();
                Err(ProtocolError::Transport(err))
            }
        }
    }

    fn count_sent(&self) {
        self.inner.counters.sent.fetch_add(1, Ordering::Relaxed);
        if let Some(exporter) = &self.inner.exporter {
            exporter.observe_sent();
        }
    }

    fn count_received(&self) {
        self.inner.counters.received.fetch_add(1, Ordering::Relaxed);
        if let Some(exporter) = &self.inner.exporter {
            exporter.observe_received();
        }
    }

    fn count_dropped(&self) {
        self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
        if let Some(exporter) = &self.inner.exporter {
            exporter.observe_dropped();
        }
    }
}

/// Pump frames from an in-process link into a dispatcher.
///
/// Per-message failures are already logged and dropped inside
/// [`Dispatcher::submit`]; the pump keeps draining. The loop ends when the
/// peer closes the link, at which point the embedding process decides how
/// to escalate.
pub fn spawn_inbound(
    dispatcher: Dispatcher,
    transport: Arc<InProcessTransport>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = transport.recv().await {
            if let Err(err) = dispatcher.submit(&frame).await {
                debug!(error = %err, "inbound frame dropped");
            }
        }
        debug!("inbound transport closed; pump exiting");
    })
}
