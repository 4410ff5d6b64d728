// JSON text codec for `SyncMessage`.
//
// Each WebSocket text frame carries exactly one JSON object. `encode` produces
// that text; `decode` accepts raw frame bytes (text or binary frames) and
// either returns a complete message or an error, never a partial value.
//
// Decoding is two-step: the frame is parsed into a `serde_json::Value`, the
// `type` tag is checked against `MESSAGE_KINDS`, and only then is the typed
// message extracted. This lets callers tell a well-formed frame of a kind
// they do not know (`DecodeError::UnknownKind`, safe to ignore) apart from
// a malformed one. Unknown extra fields, such as the `timestamp` some senders
// attach, are ignored.

use serde_json::Value;
use thiserror::Error;

use crate::message::{MESSAGE_KINDS, SyncMessage};

/// Failure to turn a message into wire text.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// JSON has no representation for NaN or infinity; serde_json would
    /// silently write `null`, which no receiver can decode as a seek.
    #[error("seek time {0} is not a finite number")]
    NonFiniteTime(f64),
    #[error("could not serialize message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure to turn a received frame into a message.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("unknown message kind `{0}`")]
    UnknownKind(String),
}

/// Serialize a message to its JSON wire text.
pub fn encode(message: &SyncMessage) -> Result<String, EncodeError> {
    if let SyncMessage::Sync(command) = message {
        if let Some(time) = command.action.time() {
            if !time.is_finite() {
                return Err(EncodeError::NonFiniteTime(time));
            }
        }
    }
    Ok(serde_json::to_string(message)?)
}

/// Parse a received frame.
pub fn decode(frame: &[u8]) -> Result<SyncMessage, DecodeError> {
    let value: Value = serde_json::from_slice(frame)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?;
    if !MESSAGE_KINDS.contains(&kind) {
        return Err(DecodeError::UnknownKind(kind.to_owned()));
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatMessage;
    use crate::types::PlaybackAction;

    fn roundtrip(message: &SyncMessage) {
        let text = encode(message).unwrap();
        let recovered = decode(text.as_bytes()).unwrap();
        assert_eq!(&recovered, message);
    }

    #[test]
    fn roundtrip_every_kind() {
        roundtrip(&SyncMessage::Join {
            group_id: "g1".into(),
            username: "alice".into(),
        });
        roundtrip(&SyncMessage::Chat(ChatMessage {
            group_id: "g1".into(),
            sender: "alice".into(),
            text: "popcorn ready?".into(),
            time: "20:15:03".into(),
        }));
        roundtrip(&SyncMessage::sync("g1", "alice", PlaybackAction::Play));
        roundtrip(&SyncMessage::sync("g1", "alice", PlaybackAction::Pause));
        roundtrip(&SyncMessage::sync("g1", "alice", PlaybackAction::Seek(42.3)));
        roundtrip(&SyncMessage::Notification {
            text: "bob has joined the movie night! 💞".into(),
        });
        roundtrip(&SyncMessage::Error {
            message: "Username and groupId required for join.".into(),
        });
    }

    #[test]
    fn wire_field_names_match_relay_contract() {
        let text = encode(&SyncMessage::sync("g1", "alice", PlaybackAction::Seek(42.3))).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "sync");
        assert_eq!(value["groupId"], "g1");
        assert_eq!(value["sender"], "alice");
        assert_eq!(value["action"], "seek");
        assert_eq!(value["time"], 42.3);
    }

    #[test]
    fn play_is_encoded_without_time() {
        let text = encode(&SyncMessage::sync("g1", "alice", PlaybackAction::Play)).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert!(value.get("time").is_none(), "unexpected time in {text}");
    }

    #[test]
    fn decodes_frames_from_other_senders() {
        let frame = br#"{"type":"sync","action":"seek","time":12.5,"groupId":"g1","sender":"bob","timestamp":1712345678.9}"#;
        assert_eq!(
            decode(frame).unwrap(),
            SyncMessage::sync("g1", "bob", PlaybackAction::Seek(12.5))
        );
    }

    #[test]
    fn seek_without_time_is_malformed() {
        let frame = br#"{"type":"sync","action":"seek","groupId":"g1","sender":"bob"}"#;
        assert!(matches!(decode(frame), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn unknown_kind_is_distinguished() {
        let frame = br#"{"type":"leave","groupId":"g1"}"#;
        match decode(frame) {
            Err(DecodeError::UnknownKind(kind)) => assert_eq!(kind, "leave"),
            other => panic!("expected UnknownKind, got {other:?}"),
        }
    }

    #[test]
    fn missing_type_and_garbage_are_errors() {
        assert!(matches!(
            decode(br#"{"text":"hi"}"#),
            Err(DecodeError::MissingType)
        ));
        assert!(matches!(
            decode(b"not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode(br#"{"type":"chat","groupId":"g1"}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn non_finite_seek_is_not_encodable() {
        let message = SyncMessage::sync("g1", "alice", PlaybackAction::Seek(f64::NAN));
        assert!(matches!(encode(&message), Err(EncodeError::NonFiniteTime(_))));
    }
}
