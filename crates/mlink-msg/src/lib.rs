//! ---
//! mlink_section: "02-messaging-ipc-data-model"
//! mlink_subsection: "module"
//! mlink_type: "source"
//! mlink_scope: "code"
//! mlink_description: "Bridge protocol core: envelopes, codec, registry, correlation, dispatch."
//! mlink_version: "v0.0.0-prealpha"
//! mlink_owner: "tbd"
//! ---
#![warn(missing_docs)]

pub mod codec;
pub mod correlation;
pub mod dispatch;
pub mod logging;
pub mod registry;
pub mod transport;
pub mod types;

use std::time::Duration;

/// Shared result type for bridge protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Error taxonomy for the bridge protocol.
///
/// Registration-time variants (`DuplicateSchema`) indicate programming
/// errors and abort startup. Per-message variants are recovered locally:
/// the offending message is dropped and logged while processing continues.
/// `ReplyTimeout` and `RequestCancelled` surface to the specific awaiting
/// caller; `Transport` surfaces to the publishing caller.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The outer structure of a frame is missing or ill-typed.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope {
        /// Why the frame was rejected.
        reason: String,
    },
    /// A payload does not satisfy the schema registered for its address.
    #[error("payload does not match schema {key}: {reason}")]
    SchemaMismatch {
        /// Schema the payload was validated against.
        key: SchemaKey,
        /// Why validation failed.
        reason: String,
    },
    /// No schema is registered for the declared (topic, action, version).
    #[error("no schema registered for {key}")]
    UnknownSchema {
        /// Address that failed the lookup.
        key: SchemaKey,
    },
    /// A schema was registered twice for one (topic, action, version).
    #[error("duplicate schema registration for {key}")]
    DuplicateSchema {
        /// Address registered more than once.
        key: SchemaKey,
    },
    /// An inbound message matched a schema with no bound handler.
    #[error("no handler bound for {key}")]
    UnhandledMessage {
        /// Address the message was routed to.
        key: SchemaKey,
    },
    /// A reply arrived for an id with no pending request.
    #[error("no pending request for correlation id {id}")]
    UnknownCorrelation {
        /// Correlation id carried by the stray reply.
        id: String,
    },
    /// A request's reply deadline elapsed.
    #[error("reply for request {id} not received within {timeout:?}")]
    ReplyTimeout {
        /// Correlation id of the expired request.
        id: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// A pending request was force-resolved during shutdown.
    #[error("request {id} cancelled before a reply arrived")]
    RequestCancelled {
        /// Correlation id of the cancelled request.
        id: String,
    },
    /// The transport adapter reported a send failure.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    /// Serialization failed outside the decode classification.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub use codec::EnvelopeCodec;
pub use correlation::{CorrelationTracker, PendingReply};
pub use dispatch::{
    spawn_inbound, DispatchMetrics, Dispatcher, DispatcherOptions, DEFAULT_MAX_FRAME_BYTES,
    DEFAULT_REPLY_TIMEOUT,
};
pub use logging::{log_message, MessageDirection, MessagingMetricsExporter};
pub use registry::{
    FnHandler, MessageHandler, PayloadSchema, SchemaDefinition, SchemaEntry, SchemaKey,
    SchemaRegistry, SchemaRegistryBuilder,
};
pub use transport::{
    FailingTransport, InMemoryTransport, InProcessTransport, Transport, TransportError,
};
pub use types::{
    new_message_id, Envelope, Header, InvalidVersion, MessageDescription, MessageType,
    ProtocolVersion,
};
