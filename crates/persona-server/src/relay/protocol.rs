//! Relay wire format: JSON text frames discriminated by `type`.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use persona_core::{Character, CharacterId, CharacterPatch, ValidationErrors};

const INBOUND_TYPES: &[&str] = &["join", "chat", "update", "ping"];

/// A frame sent by a client.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Inbound {
    Join {
        #[serde(rename = "characterId")]
        character_id: CharacterId,
    },
    Chat {
        #[serde(rename = "characterId")]
        character_id: CharacterId,
        message: String,
    },
    Update {
        #[serde(rename = "characterId")]
        character_id: CharacterId,
        #[serde(rename = "characterData")]
        character_data: CharacterPatch,
    },
    Ping,
}

impl Inbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Chat { .. } => "chat",
            Self::Update { .. } => "update",
            Self::Ping => "ping",
        }
    }
}

/// Why an inbound frame was rejected. The `Display` text is what the client sees.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid message format")]
    InvalidJson,
    #[error("Message type is required")]
    MissingType,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Invalid {kind} message: {detail}")]
    InvalidFields { kind: String, detail: String },
    #[error("Message text is required")]
    EmptyMessage,
    #[error("{0}")]
    InvalidPatch(#[from] ValidationErrors),
}

/// Decode and check one inbound frame.
///
/// The type tag is inspected before the body so that an unknown type and a
/// known type with bad fields produce different errors.
pub fn parse(raw: &str) -> Result<Inbound, ProtocolError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| ProtocolError::InvalidJson)?;
    if !value.is_object() {
        return Err(ProtocolError::InvalidJson);
    }
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_string();
    if !INBOUND_TYPES.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind));
    }

    let message: Inbound = serde_json::from_value(value).map_err(|e| ProtocolError::InvalidFields {
        kind,
        detail: e.to_string(),
    })?;

    match &message {
        Inbound::Chat { message: text, .. } if text.trim().is_empty() => Err(ProtocolError::EmptyMessage),
        Inbound::Update { character_data, .. } => {
            character_data.validate()?;
            Ok(message)
        }
        _ => Ok(message),
    }
}

/// A frame sent by the server.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Outbound {
    #[serde(rename_all = "camelCase")]
    ChatResponse {
        character_id: String,
        original_message: String,
        response: String,
        timestamp: String,
    },
    CharacterUpdated {
        character: Character,
    },
    UpdateSuccess {
        message: String,
    },
    Error {
        message: String,
    },
    Pong,
}

impl Outbound {
    /// A chat reply stamped with the current time.
    pub fn chat_response(character_id: CharacterId, original: String, response: String) -> Self {
        Self::ChatResponse {
            character_id: character_id.to_string(),
            original_message: original,
            response,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChatResponse { .. } => "chat-response",
            Self::CharacterUpdated { .. } => "character-updated",
            Self::UpdateSuccess { .. } => "update-success",
            Self::Error { .. } => "error",
            Self::Pong => "pong",
        }
    }

    /// Serialize once so a broadcast shares one buffer across recipients.
    pub fn encode(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_join_with_numeric_string() {
        let msg = parse(r#"{"type":"join","characterId":"42"}"#).unwrap();
        assert_eq!(
            msg,
            Inbound::Join {
                character_id: CharacterId::new(42)
            }
        );
    }

    #[test]
    fn parse_join_with_number() {
        let msg = parse(r#"{"type":"join","characterId":42}"#).unwrap();
        assert_eq!(msg.kind(), "join");
    }

    #[test]
    fn parse_ping_ignores_extra_fields() {
        assert_eq!(parse(r#"{"type":"ping","at":1}"#).unwrap(), Inbound::Ping);
    }

    #[test]
    fn parse_update_keeps_only_present_fields() {
        let msg = parse(r#"{"type":"update","characterId":3,"characterData":{"progress":50,"name":null}}"#).unwrap();
        let Inbound::Update { character_data, .. } = msg else {
            panic!("expected update");
        };
        assert_eq!(character_data.progress, Some(50));
        assert!(character_data.name.is_none());
    }

    #[test]
    fn not_json_is_invalid_format() {
        let err = parse("not json").unwrap_err();
        assert_eq!(err.to_string(), "Invalid message format");
    }

    #[test]
    fn non_object_is_invalid_format() {
        assert!(matches!(parse("[1,2]").unwrap_err(), ProtocolError::InvalidJson));
    }

    #[test]
    fn missing_type() {
        assert!(matches!(
            parse(r#"{"characterId":1}"#).unwrap_err(),
            ProtocolError::MissingType
        ));
    }

    #[test]
    fn unknown_type() {
        let err = parse(r#"{"type":"dance"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Unknown message type: dance");
    }

    #[test]
    fn uncoercible_key_is_rejected() {
        let err = parse(r#"{"type":"join","characterId":"abc"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFields { ref kind, .. } if kind == "join"));
    }

    #[test]
    fn chat_requires_text() {
        assert!(matches!(
            parse(r#"{"type":"chat","characterId":1,"message":"   "}"#).unwrap_err(),
            ProtocolError::EmptyMessage
        ));
        assert!(matches!(
            parse(r#"{"type":"chat","characterId":1}"#).unwrap_err(),
            ProtocolError::InvalidFields { .. }
        ));
    }

    #[test]
    fn update_patch_is_validated() {
        let err = parse(r#"{"type":"update","characterId":1,"characterData":{"progress":500}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPatch(_)));
        assert!(err.to_string().contains("progress"));
    }

    #[test]
    fn chat_response_shape() {
        let frame = Outbound::chat_response(CharacterId::new(7), "hi".into(), "hello".into());
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "chat-response");
        assert_eq!(value["characterId"], "7");
        assert_eq!(value["originalMessage"], "hi");
        assert_eq!(value["response"], "hello");
        let ts = value["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn simple_frames_shape() {
        let pong: Value = serde_json::from_str(&Outbound::Pong.encode().unwrap()).unwrap();
        assert_eq!(pong, json!({"type": "pong"}));

        let err: Value = serde_json::from_str(&Outbound::error("nope").encode().unwrap()).unwrap();
        assert_eq!(err, json!({"type": "error", "message": "nope"}));

        let ok = Outbound::UpdateSuccess {
            message: "done".into(),
        };
        assert_eq!(ok.kind(), "update-success");
        let ok: Value = serde_json::from_str(&ok.encode().unwrap()).unwrap();
        assert_eq!(ok["type"], "update-success");
    }
}
