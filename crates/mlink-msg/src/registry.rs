//! ---
//! mlink_section: "02-messaging-ipc-data-model"
//! mlink_subsection: "module"
//! mlink_type: "source"
//! mlink_scope: "code"
//! mlink_description: "Static schema catalog mapping topic/action/version to codecs and handlers."
//! mlink_version: "v0.0.0-prealpha"
//! mlink_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::types::{MessageDescription, MessageType, ProtocolVersion};
use crate::{ProtocolError, Result};

/// Key identifying one registered payload schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaKey {
    /// Capability name.
    pub topic: String,
    /// Operation name.
    pub action: String,
    /// Schema version spoken for this topic/action.
    pub version: ProtocolVersion,
}

impl SchemaKey {
    /// Construct a key from its parts.
    pub fn new(
        topic: impl Into<String>,
        action: impl Into<String>,
        version: ProtocolVersion,
    ) -> Self {
        Self {
            topic: topic.into(),
            action: action.into(),
            version,
        }
    }

    /// Construct a key from a wire-level description plus version.
    pub fn of(description: &MessageDescription, version: ProtocolVersion) -> Self {
        Self::new(description.topic.clone(), description.action.clone(), version)
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} v{}", self.topic, self.action, self.version)
    }
}

/// Capability-owned callback invoked with a validated inbound payload.
///
/// Returning `Ok(Some(value))` from the handler of a `PublishForReply`
/// request causes the dispatcher to emit the corresponding reply envelope.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one inbound payload.
    async fn handle(&self, payload: JsonValue) -> Result<Option<JsonValue>>;
}

/// Adapter lifting a synchronous closure into a [`MessageHandler`].
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: Fn(JsonValue) -> Result<Option<JsonValue>> + Send + Sync,
{
    /// Wrap a closure as a handler.
    pub fn new(handler: F) -> Self {
        Self(handler)
    }

    /// Wrap a closure as a shared handler reference, ready for registration.
    pub fn shared(handler: F) -> Arc<dyn MessageHandler>
    where
        F: 'static,
    {
        Arc::new(Self(handler))
    }
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(JsonValue) -> Result<Option<JsonValue>> + Send + Sync,
{
    async fn handle(&self, payload: JsonValue) -> Result<Option<JsonValue>> {
        (self.0)(payload)
    }
}

type ValidateFn =
    dyn Fn(&JsonValue) -> std::result::Result<JsonValue, serde_json::Error> + Send + Sync;

/// Validate-and-normalize pair derived from a serde payload type.
///
/// Checking a payload round-trips it through the typed representation, so
/// a successful check also yields the canonical wire value (sorted map keys,
/// defaults applied).
#[derive(Clone)]
pub struct PayloadSchema {
    validate: Arc<ValidateFn>,
}

impl PayloadSchema {
    /// Derive a schema from a payload type.
    pub fn of<T>() -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        Self {
            validate: Arc::new(|value: &JsonValue| {
                let typed: T = serde_json::from_value(value.clone())?;
                serde_json::to_value(&typed)
            }),
        }
    }

    pub(crate) fn check(
        &self,
        value: &JsonValue,
    ) -> std::result::Result<JsonValue, serde_json::Error> {
        (self.validate)(value)
    }
}

impl fmt::Debug for PayloadSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PayloadSchema")
    }
}

/// Registration record handed to the builder: key, payload codecs, handler.
pub struct SchemaDefinition {
    key: SchemaKey,
    request: PayloadSchema,
    reply: Option<PayloadSchema>,
    handler: Option<Arc<dyn MessageHandler>>,
}

impl SchemaDefinition {
    /// Describe the request payload schema for (topic, action, version).
    pub fn new<T>(
        topic: impl Into<String>,
        action: impl Into<String>,
        version: ProtocolVersion,
    ) -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        Self {
            key: SchemaKey::new(topic, action, version),
            request: PayloadSchema::of::<T>(),
            reply: None,
            handler: None,
        }
    }

    /// Declare the reply payload schema for this entry.
    pub fn with_reply<R>(mut self) -> Self
    where
        R: Serialize + DeserializeOwned + 'static,
    {
        self.reply = Some(PayloadSchema::of::<R>());
        self
    }

    /// Bind the handler invoked when a matching message arrives.
    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Key this definition registers under.
    pub fn key(&self) -> &SchemaKey {
        &self.key
    }
}

/// One frozen registry entry.
pub struct SchemaEntry {
    request: PayloadSchema,
    reply: Option<PayloadSchema>,
    handler: Option<Arc<dyn MessageHandler>>,
}

impl fmt::Debug for SchemaEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaEntry")
            .field("request", &self.request)
            .field("reply", &self.reply)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl SchemaEntry {
    /// Validate a payload against the schema selected by the message type.
    ///
    /// Returns the normalized payload value, or the reason it was rejected.
    pub(crate) fn validate_for(
        &self,
        message_type: MessageType,
        payload: &JsonValue,
    ) -> std::result::Result<JsonValue, String> {
        match message_type {
            MessageType::Reply => match &self.reply {
                Some(schema) => schema.check(payload).map_err(|err| err.to_string()),
                None => Err("no reply schema registered".to_owned()),
            },
            MessageType::Publish | MessageType::PublishForReply => {
                self.request.check(payload).map_err(|err| err.to_string())
            }
        }
    }

    /// Handler bound to this entry, if any.
    pub fn handler(&self) -> Option<&Arc<dyn MessageHandler>> {
        self.handler.as_ref()
    }

    /// Whether a reply payload shape was declared.
    pub fn has_reply_schema(&self) -> bool {
        self.reply.is_some()
    }
}

/// Immutable catalog of every (topic, action, version) the process speaks.
///
/// Built once at startup, then shared as `Arc<SchemaRegistry>`; lookups are
/// plain reads of a frozen map and safe under concurrent dispatch.
pub struct SchemaRegistry {
    entries: HashMap<SchemaKey, SchemaEntry>,
}

impl SchemaRegistry {
    /// Start building a registry.
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder {
            entries: HashMap::new(),
        }
    }

    /// Look up the entry for (topic, action, version).
    pub fn lookup(
        &self,
        topic: &str,
        action: &str,
        version: ProtocolVersion,
    ) -> Result<&SchemaEntry> {
        let key = SchemaKey::new(topic, action, version);
        self.entries
            .get(&key)
            .ok_or(ProtocolError::UnknownSchema { key })
    }

    /// Whether the given key is registered.
    pub fn contains(&self, key: &SchemaKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of registered schemas.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry holds no schemas.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Mutable registration phase of the registry lifecycle.
///
/// Registration happens once, before any message is processed. A duplicate
/// key is a programming error and aborts startup.
pub struct SchemaRegistryBuilder {
    entries: HashMap<SchemaKey, SchemaEntry>,
}

impl fmt::Debug for SchemaRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistryBuilder")
            .field("entries", &self.entries)
            .finish()
    }
}

impl SchemaRegistryBuilder {
    /// Add a schema definition, failing on duplicate (topic, action, version).
    pub fn register(&mut self, definition: SchemaDefinition) -> Result<&mut Self> {
        let SchemaDefinition {
            key,
            request,
            reply,
            handler,
        } = definition;
        if self.entries.contains_key(&key) {
            return Err(ProtocolError::DuplicateSchema { key });
        }
        self.entries.insert(
            key,
            SchemaEntry {
                request,
                reply,
                handler,
            },
        );
        Ok(self)
    }

    /// Freeze the registry for the process lifetime.
    pub fn build(self) -> Arc<SchemaRegistry> {
        Arc::new(SchemaRegistry {
            entries: self.entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct Prepare {
        token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Prepared {
        channel: u32,
    }

    fn version() -> ProtocolVersion {
        ProtocolVersion::new(3, 0)
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut builder = SchemaRegistry::builder();
        builder
            .register(SchemaDefinition::new::<Prepare>(
                "AudioOutput",
                "Prepare",
                version(),
            ))
            .expect("first registration");
        let err = builder
            .register(SchemaDefinition::new::<Prepare>(
                "AudioOutput",
                "Prepare",
                version(),
            ))
            .expect_err("duplicate registration");
        assert!(matches!(err, ProtocolError::DuplicateSchema { .. }));
    }

    #[test]
    fn lookup_of_unregistered_schema_fails() {
        let registry = SchemaRegistry::builder().build();
        let err = registry
            .lookup("AudioOutput", "Prepare", version())
            .expect_err("nothing registered");
        assert!(matches!(err, ProtocolError::UnknownSchema { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn same_address_different_versions_coexist() {
        let mut builder = SchemaRegistry::builder();
        builder
            .register(SchemaDefinition::new::<Prepare>(
                "AudioOutput",
                "Prepare",
                ProtocolVersion::new(2, 0),
            ))
            .expect("register v2");
        builder
            .register(SchemaDefinition::new::<Prepare>(
                "AudioOutput",
                "Prepare",
                ProtocolVersion::new(3, 0),
            ))
            .expect("register v3");
        let registry = builder.build();
        assert_eq!(registry.len(), 2);
        assert!(registry
            .lookup("AudioOutput", "Prepare", ProtocolVersion::new(2, 0))
            .is_ok());
    }

    #[test]
    fn payload_schema_normalizes_and_rejects() {
        let schema = PayloadSchema::of::<Prepare>();

        let normalized = schema
            .check(&json!({"token": "t", "extra": 1}))
            .expect("unknown payload fields are tolerated");
        assert_eq!(normalized, json!({"token": "t"}));

        schema
            .check(&json!({"hint": "h"}))
            .expect_err("missing required field");
        schema
            .check(&json!({"token": 7}))
            .expect_err("ill-typed field");
    }

    #[test]
    fn entry_selects_schema_by_message_type() {
        let mut builder = SchemaRegistry::builder();
        builder
            .register(
                SchemaDefinition::new::<Prepare>("AudioOutput", "Prepare", version())
                    .with_reply::<Prepared>(),
            )
            .expect("register");
        let registry = builder.build();
        let entry = registry
            .lookup("AudioOutput", "Prepare", version())
            .expect("registered");

        entry
            .validate_for(MessageType::PublishForReply, &json!({"token": "t"}))
            .expect("request payload valid");
        entry
            .validate_for(MessageType::Reply, &json!({"channel": 4}))
            .expect("reply payload valid");
        entry
            .validate_for(MessageType::Reply, &json!({"token": "t"}))
            .expect_err("reply payload must match reply schema");
    }

    #[test]
    fn reply_without_declared_schema_is_rejected() {
        let mut builder = SchemaRegistry::builder();
        builder
            .register(SchemaDefinition::new::<Prepare>(
                "AudioOutput",
                "Stop",
                version(),
            ))
            .expect("register");
        let registry = builder.build();
        let entry = registry
            .lookup("AudioOutput", "Stop", version())
            .expect("registered");
        assert!(!entry.has_reply_schema());
        entry
            .validate_for(MessageType::Reply, &json!({}))
            .expect_err("no reply schema declared");
    }

    #[tokio::test]
    async fn fn_handler_passes_payload_through() {
        let handler = FnHandler::new(|payload| Ok(Some(payload)));
        let result = handler
            .handle(json!({"token": "t"}))
            .await
            .expect("handler succeeds");
        assert_eq!(result, Some(json!({"token": "t"})));
    }
}
