use std::fmt;

use serde_json::{Map, Value};
use slackwire_core::decode::{discriminator, nested_object, parse_object, DecodeError};

const HELLO: &str = "hello";
const DISCONNECT: &str = "disconnect";
const INTERACTIVE: &str = "interactive";
const SLASH_COMMANDS: &str = "slash_commands";
const EVENTS_API: &str = "events_api";

/// Outer socket-level framing kind, read from the envelope's `type`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EnvelopeType {
    Hello,
    Disconnect,
    Interactive,
    SlashCommands,
    EventsApi,
    Other(String),
}

impl EnvelopeType {
    pub fn parse(value: &str) -> Self {
        match value {
            HELLO => Self::Hello,
            DISCONNECT => Self::Disconnect,
            INTERACTIVE => Self::Interactive,
            SLASH_COMMANDS => Self::SlashCommands,
            EVENTS_API => Self::EventsApi,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Hello => HELLO,
            Self::Disconnect => DISCONNECT,
            Self::Interactive => INTERACTIVE,
            Self::SlashCommands => SLASH_COMMANDS,
            Self::EventsApi => EVENTS_API,
            Self::Other(value) => value.as_str(),
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Self::Hello | Self::Disconnect)
    }
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound socket mode frame. The nested `payload` is left undecoded
/// until the router knows which model it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct SocketModeMessage {
    pub envelope_type: EnvelopeType,
    pub envelope_id: Option<String>,
    pub payload: Option<Value>,
    pub accepts_response_payload: bool,
    pub retry_attempt: Option<u64>,
    pub retry_reason: Option<String>,
    /// Set on `disconnect` frames (`warning`, `refresh_requested`, ...).
    pub reason: Option<String>,
    pub raw: String,
}

impl SocketModeMessage {
    pub fn parse(raw: impl Into<String>) -> Result<Self, DecodeError> {
        let raw = raw.into();
        let object = parse_object(&raw)?;
        let envelope_type = EnvelopeType::parse(discriminator(&object)?);

        Ok(Self {
            envelope_type,
            envelope_id: string_field(&object, "envelope_id"),
            payload: object.get("payload").filter(|value| !value.is_null()).cloned(),
            accepts_response_payload: object
                .get("accepts_response_payload")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            retry_attempt: object.get("retry_attempt").and_then(Value::as_u64),
            retry_reason: string_field(&object, "retry_reason"),
            reason: string_field(&object, "reason"),
            raw,
        })
    }

    /// The nested payload as an object, running the second decode pass when
    /// the platform sent it as an encoded string.
    pub fn payload_object(&self) -> Result<Map<String, Value>, DecodeError> {
        nested_object(self.payload.clone().unwrap_or(Value::Null))
    }

    pub fn is_retry(&self) -> bool {
        self.retry_attempt.is_some_and(|attempt| attempt > 0)
    }
}

/// Best-effort lookup of `envelope_id` in text that failed envelope parsing,
/// so a malformed frame can still be acknowledged.
pub fn salvage_envelope_id(raw: &str) -> Option<String> {
    let object = parse_object(raw).ok()?;
    string_field(&object, "envelope_id")
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).filter(|value| !value.is_empty()).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use slackwire_core::decode::DecodeError;

    use super::{salvage_envelope_id, EnvelopeType, SocketModeMessage};

    #[test]
    fn parses_interactive_envelope_framing() {
        let raw = json!({
            "type": "interactive",
            "envelope_id": "env-1",
            "accepts_response_payload": true,
            "retry_attempt": 1,
            "retry_reason": "timeout",
            "payload": { "type": "block_actions" }
        })
        .to_string();

        let message = SocketModeMessage::parse(raw.clone()).expect("envelope should parse");

        assert_eq!(message.envelope_type, EnvelopeType::Interactive);
        assert_eq!(message.envelope_id.as_deref(), Some("env-1"));
        assert!(message.accepts_response_payload);
        assert!(message.is_retry());
        assert_eq!(message.retry_reason.as_deref(), Some("timeout"));
        assert_eq!(message.raw, raw);
        let payload = message.payload_object().expect("payload object");
        assert_eq!(payload.get("type"), Some(&json!("block_actions")));
    }

    #[test]
    fn string_encoded_payload_is_decoded_in_a_second_pass() {
        let inner = json!({ "type": "view_closed", "is_cleared": false }).to_string();
        let raw = json!({ "type": "interactive", "envelope_id": "env-2", "payload": inner });

        let message = SocketModeMessage::parse(raw.to_string()).expect("envelope should parse");
        let payload = message.payload_object().expect("payload object");

        assert_eq!(payload.get("type"), Some(&json!("view_closed")));
    }

    #[test]
    fn control_frames_carry_no_envelope_id() {
        let hello = SocketModeMessage::parse(r#"{"type":"hello","num_connections":1}"#)
            .expect("hello should parse");
        let disconnect =
            SocketModeMessage::parse(r#"{"type":"disconnect","reason":"refresh_requested"}"#)
                .expect("disconnect should parse");

        assert!(hello.envelope_type.is_control());
        assert_eq!(hello.envelope_id, None);
        assert_eq!(disconnect.envelope_type, EnvelopeType::Disconnect);
        assert_eq!(disconnect.reason.as_deref(), Some("refresh_requested"));
    }

    #[test]
    fn unrecognised_kinds_keep_their_name() {
        let message = SocketModeMessage::parse(r#"{"type":"workflow_step","envelope_id":"e"}"#)
            .expect("envelope should parse");

        assert_eq!(message.envelope_type, EnvelopeType::Other("workflow_step".to_owned()));
        assert_eq!(message.envelope_type.to_string(), "workflow_step");
        assert!(!message.envelope_type.is_control());
    }

    #[test]
    fn missing_payload_is_reported_when_requested() {
        let message = SocketModeMessage::parse(r#"{"type":"interactive","envelope_id":"e"}"#)
            .expect("envelope should parse");

        assert!(matches!(message.payload_object(), Err(DecodeError::NotAnObject { found: "null" })));
    }

    #[test]
    fn salvages_envelope_id_from_frames_without_a_type() {
        assert_eq!(salvage_envelope_id(r#"{"envelope_id":"env-9"}"#).as_deref(), Some("env-9"));
        assert_eq!(salvage_envelope_id("not json"), None);
    }
}
