//! ---
//! mlink_section: "02-messaging-ipc-data-model"
//! mlink_subsection: "module"
//! mlink_type: "source"
//! mlink_scope: "code"
//! mlink_description: "Envelope and header types for the bridge protocol."
//! mlink_version: "v0.0.0-prealpha"
//! mlink_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Message classification carried in every envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Fire-and-forget event; no reply is expected.
    Publish,
    /// Request that must be answered by a [`MessageType::Reply`] carrying the same id.
    PublishForReply,
    /// Answer correlating to a prior `PublishForReply`.
    Reply,
}

impl MessageType {
    /// Whether a message of this type opens a request/reply exchange.
    pub fn expects_reply(&self) -> bool {
        matches!(self, MessageType::PublishForReply)
    }

    /// Wire token for the message type, as emitted in the header.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Publish => "Publish",
            MessageType::PublishForReply => "PublishForReply",
            MessageType::Reply => "Reply",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised when a header carries an unparseable version string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid protocol version {0:?}: expected \"major.minor\"")]
pub struct InvalidVersion(pub String);

/// Schema version tag, serialized on the wire as `"major.minor"` (e.g. `"3.0"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolVersion {
    /// Major version; a change here is a breaking payload change.
    pub major: u16,
    /// Minor version; additions that older peers may ignore.
    pub minor: u16,
}

impl ProtocolVersion {
    /// Construct a version tag.
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ProtocolVersion {
    type Err = InvalidVersion;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let (major, minor) = raw
            .split_once('.')
            .ok_or_else(|| InvalidVersion(raw.to_owned()))?;
        let major = major
            .parse::<u16>()
            .map_err(|_| InvalidVersion(raw.to_owned()))?;
        let minor = minor
            .parse::<u16>()
            .map_err(|_| InvalidVersion(raw.to_owned()))?;
        Ok(Self { major, minor })
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = InvalidVersion;

    fn try_from(raw: String) -> std::result::Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(version: ProtocolVersion) -> Self {
        version.to_string()
    }
}

/// Two-level address naming a capability and an operation within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageDescription {
    /// Capability name, e.g. `"SpeechRecognizer"`.
    pub topic: String,
    /// Operation name within the capability, e.g. `"StartCapture"`.
    pub action: String,
}

impl MessageDescription {
    /// Construct a description from a topic/action pair.
    pub fn new(topic: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            action: action.into(),
        }
    }
}

impl fmt::Display for MessageDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.topic, self.action)
    }
}

/// Envelope header: correlation id plus the static addressing fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// Schema version of the payload.
    pub version: ProtocolVersion,
    /// Message classification.
    pub message_type: MessageType,
    /// Unique identifier correlating requests and replies.
    pub id: String,
    /// Topic/action address of the message.
    pub message_description: MessageDescription,
}

/// The unit of exchange between the engine and platform processes.
///
/// Envelopes are per-message values: constructed, serialized, and discarded.
/// The payload is type-erased; its shape is determined by the schema
/// registered for (topic, action, version) and the message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation and addressing metadata.
    pub header: Header,
    /// Schema-specific payload value.
    pub payload: JsonValue,
}

impl Envelope {
    /// Construct a fire-and-forget event envelope with a fresh id.
    pub fn publish(
        topic: impl Into<String>,
        action: impl Into<String>,
        version: ProtocolVersion,
        payload: JsonValue,
    ) -> Self {
        Self {
            header: Header {
                version,
                message_type: MessageType::Publish,
                id: new_message_id(),
                message_description: MessageDescription::new(topic, action),
            },
            payload,
        }
    }

    /// Construct a request envelope carrying a caller-allocated correlation id.
    ///
    /// The id comes from the correlation tracker so the pending-request entry
    /// and the wire header cannot drift apart.
    pub fn publish_for_reply(
        topic: impl Into<String>,
        action: impl Into<String>,
        version: ProtocolVersion,
        id: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        Self {
            header: Header {
                version,
                message_type: MessageType::PublishForReply,
                id: id.into(),
                message_description: MessageDescription::new(topic, action),
            },
            payload,
        }
    }

    /// Construct the reply to a request, copying its id and address.
    pub fn reply_to(request: &Header, payload: JsonValue) -> Self {
        Self {
            header: Header {
                version: request.version,
                message_type: MessageType::Reply,
                id: request.id.clone(),
                message_description: request.message_description.clone(),
            },
            payload,
        }
    }

    /// Whether this envelope answers a prior request.
    pub fn is_reply(&self) -> bool {
        self.header.message_type == MessageType::Reply
    }

    /// Topic/action address of the envelope.
    pub fn description(&self) -> &MessageDescription {
        &self.header.message_description
    }
}

/// Allocate a fresh message identifier.
pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}
