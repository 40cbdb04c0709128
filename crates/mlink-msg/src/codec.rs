//! ---
//! mlink_section: "02-messaging-ipc-data-model"
//! mlink_subsection: "module"
//! mlink_type: "source"
//! mlink_scope: "code"
//! mlink_description: "Schema-directed envelope serialization and deserialization."
//! mlink_version: "v0.0.0-prealpha"
//! mlink_owner: "tbd"
//! ---
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::registry::{SchemaKey, SchemaRegistry};
use crate::types::{Envelope, Header, MessageDescription, MessageType, ProtocolVersion};
use crate::{ProtocolError, Result};

/// Tolerant mirror of the wire document.
///
/// Unknown top-level and header keys are ignored for forward compatibility;
/// missing required keys fail the outer parse. Constant header fields are
/// parsed as plain strings here and validated explicitly, so an unparseable
/// version or message type is classified as a malformed envelope rather
/// than a serde detail.
#[derive(Deserialize)]
struct RawEnvelope {
    header: RawHeader,
    payload: JsonValue,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHeader {
    version: String,
    message_type: String,
    id: String,
    message_description: RawDescription,
}

#[derive(Deserialize)]
struct RawDescription {
    topic: String,
    action: String,
}

/// Serializes and deserializes envelopes against a frozen schema registry.
///
/// Encoding is deterministic: header fields emit in a fixed order and
/// payload objects emit with sorted keys, so equal envelopes produce
/// byte-identical frames for golden-file comparison.
#[derive(Clone)]
pub struct EnvelopeCodec {
    registry: Arc<SchemaRegistry>,
}

impl EnvelopeCodec {
    /// Build a codec over the process-wide registry.
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// Registry this codec validates against.
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Encode a well-formed envelope into a single-frame JSON document.
    pub fn encode(&self, envelope: &Envelope) -> Result<String> {
        let normalized = self.validated(envelope)?;
        serde_json::to_string(&normalized).map_err(ProtocolError::Json)
    }

    /// Encode with indentation, for logs and troubleshooting only.
    pub fn encode_pretty(&self, envelope: &Envelope) -> Result<String> {
        let normalized = self.validated(envelope)?;
        serde_json::to_string_pretty(&normalized).map_err(ProtocolError::Json)
    }

    /// Decode one frame into a validated envelope.
    ///
    /// All-or-nothing: failures leave no partially-populated value behind.
    /// The declared (topic, action, version) selects which registered schema
    /// to validate against and nothing else; payloads that fail that schema
    /// are rejected rather than partially decoded.
    pub fn decode(&self, frame: &str) -> Result<Envelope> {
        let raw: RawEnvelope =
            serde_json::from_str(frame).map_err(|err| ProtocolError::MalformedEnvelope {
                reason: err.to_string(),
            })?;

        let version: ProtocolVersion =
            raw.header
                .version
                .parse()
                .map_err(|err: crate::types::InvalidVersion| ProtocolError::MalformedEnvelope {
                    reason: err.to_string(),
                })?;
        let message_type = parse_message_type(&raw.header.message_type)?;
        if raw.header.id.is_empty() {
            return Err(ProtocolError::MalformedEnvelope {
                reason: "header id is empty".to_owned(),
            });
        }

        let description = MessageDescription::new(raw.header.message_description.topic, raw.header.message_description.action);
        let key = SchemaKey::of(&description, version);
        let entry = self
            .registry
            .lookup(&key.topic, &key.action, key.version)?;
        let payload = entry
            .validate_for(message_type, &raw.payload)
            .map_err(|reason| ProtocolError::SchemaMismatch {
                key: key.clone(),
                reason,
            })?;

        Ok(Envelope {
            header: Header {
                version,
                message_type,
                id: raw.header.id,
                message_description: description,
            },
            payload,
        })
    }

    /// Decode a frame the caller already knows the address of.
    ///
    /// The wire is untrusted: beyond the registry lookup performed by
    /// [`EnvelopeCodec::decode`], this re-validates that the declared
    /// description matches the schema the caller is decoding against.
    pub fn decode_expecting(&self, frame: &str, topic: &str, action: &str) -> Result<Envelope> {
        let envelope = self.decode(frame)?;
        let description = envelope.description();
        if description.topic != topic || description.action != action {
            return Err(ProtocolError::SchemaMismatch {
                key: SchemaKey::of(description, envelope.header.version),
                reason: format!("expected message addressed to {topic}.{action}"),
            });
        }
        Ok(envelope)
    }

    fn validated(&self, envelope: &Envelope) -> Result<Envelope> {
        let key = SchemaKey::of(envelope.description(), envelope.header.version);
        let entry = self
            .registry
            .lookup(&key.topic, &key.action, key.version)?;
        let payload = entry
            .validate_for(envelope.header.message_type, &envelope.payload)
            .map_err(|reason| ProtocolError::SchemaMismatch {
                key: key.clone(),
                reason,
            })?;
        Ok(Envelope {
            header: envelope.header.clone(),
            payload,
        })
    }
}

fn parse_message_type(raw: &str) -> Result<MessageType> {
    match raw {
        "Publish" => Ok(MessageType::Publish),
        "PublishForReply" => Ok(MessageType::PublishForReply),
        "Reply" => Ok(MessageType::Reply),
        other => Err(ProtocolError::MalformedEnvelope {
            reason: format!("unknown messageType {other:?}"),
        }),
    }
}
