//! ---
//! mlink_section: "15-testing-qa-runbook"
//! mlink_subsection: "integration-tests"
//! mlink_type: "source"
//! mlink_scope: "code"
//! mlink_description: "Golden wire-format and round-trip validation for the envelope codec."
//! mlink_version: "v0.0.0-prealpha"
//! mlink_owner: "tbd"
//! ---
use mlink_msg::{
    Envelope, EnvelopeCodec, Header, MessageDescription, MessageType, ProtocolError,
    ProtocolVersion, SchemaDefinition, SchemaRegistry,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum Initiator {
    Wakeword,
    TapToTalk,
    HoldToTalk,
}

#[derive(Debug, Serialize, Deserialize)]
struct StartCapture {
    initiator: Initiator,
    #[serde(rename = "keywordBegin")]
    keyword_begin: i64,
    #[serde(rename = "keywordEnd")]
    keyword_end: i64,
    keyword: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SetIndicator {
    #[serde(rename = "persistVisualIndicator")]
    persist_visual_indicator: bool,
    #[serde(rename = "playAudioIndicator")]
    play_audio_indicator: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    asset: Option<String>,
}

fn codec() -> EnvelopeCodec {
    let mut builder = SchemaRegistry::builder();
    builder
        .register(SchemaDefinition::new::<StartCapture>(
            "SpeechRecognizer",
            "StartCapture",
            ProtocolVersion::new(3, 0),
        ))
        .expect("register StartCapture");
    builder
        .register(SchemaDefinition::new::<SetIndicator>(
            "Notifications",
            "SetIndicator",
            ProtocolVersion::new(3, 0),
        ))
        .expect("register SetIndicator");
    EnvelopeCodec::new(builder.build())
}

fn start_capture_envelope(id: &str) -> Envelope {
    Envelope {
        header: Header {
            version: ProtocolVersion::new(3, 0),
            message_type: MessageType::Publish,
            id: id.to_owned(),
            message_description: MessageDescription::new("SpeechRecognizer", "StartCapture"),
        },
        payload: json!({
            "initiator": "WAKEWORD",
            "keywordBegin": 10,
            "keywordEnd": 42,
            "keyword": "ALEXA",
        }),
    }
}

#[test]
fn start_capture_scenario_round_trips_exactly() -> anyhow::Result<()> {
    let codec = codec();
    let envelope = start_capture_envelope("b4c3f1aa-8d0f-4a2e-9b5e-5c63a1f0d9e7");

    let frame = codec.encode(&envelope)?;
    let decoded = codec.decode(&frame)?;

    assert_eq!(
        decoded.header.message_description.topic,
        "SpeechRecognizer"
    );
    assert_eq!(decoded.header.message_description.action, "StartCapture");
    assert_eq!(decoded.header.version, ProtocolVersion::new(3, 0));
    assert_eq!(decoded.header.id, "b4c3f1aa-8d0f-4a2e-9b5e-5c63a1f0d9e7");
    assert_eq!(decoded.payload["initiator"], "WAKEWORD");
    assert_eq!(decoded.payload["keywordBegin"], 10);
    assert_eq!(decoded.payload["keywordEnd"], 42);
    assert_eq!(decoded.payload["keyword"], "ALEXA");
    assert_eq!(decoded, envelope, "round trip preserves structural equality");
    Ok(())
}

#[test]
fn repeated_encodes_are_byte_identical() {
    let codec = codec();
    let envelope = start_capture_envelope("5b1e2a34-0000-4000-8000-000000000042");

    let first = codec.encode(&envelope).expect("first encode");
    let second = codec.encode(&envelope).expect("second encode");
    assert_eq!(first, second);

    // Key order inside payload objects is canonical regardless of the order
    // the producer happened to build the value with.
    let reordered = Envelope {
        payload: json!({
            "keyword": "ALEXA",
            "keywordEnd": 42,
            "keywordBegin": 10,
            "initiator": "WAKEWORD",
        }),
        ..envelope
    };
    assert_eq!(codec.encode(&reordered).expect("encode"), first);
}

#[test]
fn optional_payload_field_absence_survives_the_round_trip() {
    let codec = codec();
    let without_asset = Envelope::publish(
        "Notifications",
        "SetIndicator",
        ProtocolVersion::new(3, 0),
        json!({"persistVisualIndicator": true, "playAudioIndicator": false}),
    );
    let frame = codec.encode(&without_asset).expect("encode");
    assert!(
        !frame.contains("asset"),
        "absent optional field is not materialised"
    );
    let decoded = codec.decode(&frame).expect("decode");
    assert!(decoded.payload.get("asset").is_none());

    let with_asset = Envelope::publish(
        "Notifications",
        "SetIndicator",
        ProtocolVersion::new(3, 0),
        json!({
            "persistVisualIndicator": true,
            "playAudioIndicator": false,
            "asset": "chime",
        }),
    );
    let frame = codec.encode(&with_asset).expect("encode");
    let decoded = codec.decode(&frame).expect("decode");
    assert_eq!(decoded.payload["asset"], "chime");
}

#[test]
fn unregistered_address_never_partially_decodes() {
    let codec = codec();
    let frame = json!({
        "header": {
            "version": "3.0",
            "messageType": "Publish",
            "id": "req-1",
            "messageDescription": {"topic": "Navigation", "action": "StartNavigation"},
        },
        "payload": {"destination": "home"},
    })
    .to_string();

    let err = codec.decode(&frame).expect_err("unknown address");
    assert!(matches!(err, ProtocolError::UnknownSchema { .. }));
}

#[test]
fn version_mismatch_is_a_distinct_schema() {
    let codec = codec();
    let frame = json!({
        "header": {
            "version": "4.0",
            "messageType": "Publish",
            "id": "req-2",
            "messageDescription": {"topic": "SpeechRecognizer", "action": "StartCapture"},
        },
        "payload": {
            "initiator": "WAKEWORD",
            "keywordBegin": 10,
            "keywordEnd": 42,
            "keyword": "ALEXA",
        },
    })
    .to_string();

    let err = codec.decode(&frame).expect_err("v4.0 is not registered");
    assert!(matches!(err, ProtocolError::UnknownSchema { .. }));
}

#[test]
fn enum_payload_fields_use_exact_wire_tokens() {
    let codec = codec();
    let mut envelope = start_capture_envelope("req-3");
    envelope.payload["initiator"] = json!("TAP_TO_TALK");

    let frame = codec.encode(&envelope).expect("encode");
    assert!(frame.contains("\"initiator\":\"TAP_TO_TALK\""));

    envelope.payload["initiator"] = json!("WHISPER");
    let err = codec.encode(&envelope).expect_err("unknown enum token");
    assert!(matches!(err, ProtocolError::SchemaMismatch { .. }));
}
