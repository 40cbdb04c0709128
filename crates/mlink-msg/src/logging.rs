//! ---
//! mlink_section: "02-messaging-ipc-data-model"
//! mlink_subsection: "module"
//! mlink_type: "source"
//! mlink_scope: "code"
//! mlink_description: "Structured message logging and Prometheus export for bridge activity."
//! mlink_version: "v0.0.0-prealpha"
//! mlink_owner: "tbd"
//! ---
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use tracing::debug;

use crate::types::Envelope;

/// Direction of the message movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Envelope handed to a transport.
    Outbound,
    /// Envelope received from a transport.
    Inbound,
}

/// Emit a structured log entry for message activity.
pub fn log_message(direction: MessageDirection, envelope: &Envelope) {
    debug!(
        message_id = %envelope.header.id,
        topic = %envelope.header.message_description.topic,
        action = %envelope.header.message_description.action,
        version = %envelope.header.version,
        message_type = %envelope.header.message_type,
        direction = ?direction,
        "bridge message activity"
    );
}

/// Prometheus metric handles for bridge activity.
pub struct MessagingMetricsExporter {
    sent: IntCounter,
    received: IntCounter,
    dropped: IntCounter,
    reply_timeouts: IntCounter,
    reply_latency: Histogram,
}

impl MessagingMetricsExporter {
    /// Register bridge metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let sent = IntCounter::with_opts(Opts::new(
            "bridge_messages_sent_total",
            "Envelopes handed to the transport adapter",
        ))?;
        let received = IntCounter::with_opts(Opts::new(
            "bridge_messages_received_total",
            "Envelopes consumed from the transport adapter",
        ))?;
        let dropped = IntCounter::with_opts(Opts::new(
            "bridge_messages_dropped_total",
            "Envelopes dropped by decode, dispatch, or send failures",
        ))?;
        let reply_timeouts = IntCounter::with_opts(Opts::new(
            "bridge_reply_timeouts_total",
            "Requests that elapsed their reply deadline",
        ))?;
        let reply_latency = Histogram::with_opts(HistogramOpts::new(
            "bridge_reply_roundtrip_latency_seconds",
            "Observed latency between request publish and reply resolution",
        ))?;

        registry.register(Box::new(sent.clone()))?;
        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(dropped.clone()))?;
        registry.register(Box::new(reply_timeouts.clone()))?;
        registry.register(Box::new(reply_latency.clone()))?;

        Ok(Self {
            sent,
            received,
            dropped,
            reply_timeouts,
            reply_latency,
        })
    }

    /// Record a sent envelope.
    pub fn observe_sent(&self) {
        self.sent.inc();
    }

    /// Record a received envelope.
    pub fn observe_received(&self) {
        self.received.inc();
    }

    /// Record a dropped envelope.
    pub fn observe_dropped(&self) {
        self.dropped.inc();
    }

    /// Record a request that timed out awaiting its reply.
    pub fn observe_reply_timeout(&self) {
        self.reply_timeouts.inc();
    }

    /// Record reply round-trip latency.
    pub fn observe_reply_latency(&self, duration: Duration) {
        self.reply_latency.observe(duration.as_secs_f64());
    }
}
