//! Side-channel message vocabulary and wire envelope.

use serde::{Deserialize, Serialize};

use crate::error::ConsultError;

/// A structured in-call event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChannelMessage {
    Chat { text: String },
    Typing { active: bool },
    EndCall { reason: Option<String> },
    Status { key: String, value: String },
    Custom { kind: String, payload: serde_json::Value },
}

impl ChannelMessage {
    pub fn chat(text: impl Into<String>) -> Self {
        Self::Chat { text: text.into() }
    }

    pub fn status(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Status {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &str {
        match self {
            Self::Chat { .. } => "chat",
            Self::Typing { .. } => "typing",
            Self::EndCall { .. } => "end-call",
            Self::Status { .. } => "status",
            Self::Custom { kind, .. } => kind,
        }
    }
}

/// What actually travels over the channel: a message plus the sender's
/// sequence number.
///
/// ```text
/// {"seq":3,"message":{"type":"chat","text":"hello"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: u64,
    pub message: ChannelMessage,
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>, ConsultError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self, ConsultError> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_tagged_json() {
        let env = Envelope {
            seq: 3,
            message: ChannelMessage::chat("hello"),
        };
        let json = String::from_utf8(env.encode().unwrap()).unwrap();
        assert_eq!(json, r#"{"seq":3,"message":{"type":"chat","text":"hello"}}"#);
    }

    #[test]
    fn decodes_custom_payload() {
        let raw = br#"{"seq":1,"message":{"type":"custom","kind":"vitals","payload":{"bpm":72}}}"#;
        let env = Envelope::decode(raw).unwrap();
        assert_eq!(env.message.kind(), "vitals");
        match env.message {
            ChannelMessage::Custom { payload, .. } => assert_eq!(payload["bpm"], 72),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_type() {
        let err = Envelope::decode(br#"{"seq":1,"message":{"type":"bogus"}}"#).unwrap_err();
        assert!(matches!(err, ConsultError::Engine(_)));
    }

    #[test]
    fn end_call_reason_is_optional() {
        let env = Envelope::decode(br#"{"seq":9,"message":{"type":"end-call","reason":null}}"#)
            .unwrap();
        assert_eq!(env.message, ChannelMessage::EndCall { reason: None });
    }
}
