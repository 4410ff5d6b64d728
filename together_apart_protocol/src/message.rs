// Protocol messages exchanged between watch clients and the relay.
//
// One enum covers both directions: clients send `join`, `chat` and `sync`;
// the relay forwards `chat` and `sync` verbatim to the other members of the
// group and originates `notification` and `error` itself. On the wire every
// message is a JSON object with a `type` discriminator and camelCase fields
// (see `codec.rs`).
//
// `sync` is the only message with a conditional field: `time` is present iff
// the action is a seek. `SyncCommand` stores a `PlaybackAction`, which makes
// the invalid combinations unrepresentable, and converts through the flat
// `RawSync` shape when crossing the wire. Decoding a seek without a time, or a
// play/pause with one, fails instead of producing a half-valid value.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ActionKind, PlaybackAction};

/// Every message kind understood by the protocol, by `type` tag.
pub const MESSAGE_KINDS: [&str; 5] = ["join", "chat", "sync", "notification", "error"];

/// A message on the relay channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncMessage {
    /// First message on every connection: enter a group under a display name.
    Join {
        #[serde(rename = "groupId")]
        group_id: String,
        username: String,
    },
    /// Chat line, relayed to the rest of the group.
    Chat(ChatMessage),
    /// Playback command, relayed to the rest of the group.
    Sync(SyncCommand),
    /// Relay-originated notice (someone joined or left).
    Notification { text: String },
    /// Relay-originated error report. Does not close the connection.
    Error { message: String },
}

impl SyncMessage {
    /// The wire `type` tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::Join { .. } => "join",
            SyncMessage::Chat(_) => "chat",
            SyncMessage::Sync(_) => "sync",
            SyncMessage::Notification { .. } => "notification",
            SyncMessage::Error { .. } => "error",
        }
    }

    pub fn sync(group_id: &str, sender: &str, action: PlaybackAction) -> Self {
        SyncMessage::Sync(SyncCommand {
            group_id: group_id.to_owned(),
            sender: sender.to_owned(),
            action,
        })
    }
}

/// A chat line. `time` is the sender's wall-clock label, not a timestamp the
/// relay interprets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "groupId")]
    pub group_id: String,
    pub sender: String,
    pub text: String,
    pub time: String,
}

/// A playback command from one group member to the others.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSync", into = "RawSync")]
pub struct SyncCommand {
    pub group_id: String,
    pub sender: String,
    pub action: PlaybackAction,
}

/// Flat wire shape of a `sync` message.
#[derive(Serialize, Deserialize)]
struct RawSync {
    #[serde(rename = "groupId")]
    group_id: String,
    sender: String,
    action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<f64>,
}

/// A `sync` whose `time` field disagrees with its action.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncShapeError {
    #[error("seek requires a numeric `time`")]
    SeekWithoutTime,
    #[error("`time` is only valid for seek, not {0}")]
    UnexpectedTime(ActionKind),
}

impl TryFrom<RawSync> for SyncCommand {
    type Error = SyncShapeError;

    fn try_from(raw: RawSync) -> Result<Self, Self::Error> {
        let action = match (raw.action, raw.time) {
            (ActionKind::Seek, Some(time)) => PlaybackAction::Seek(time),
            (ActionKind::Seek, None) => return Err(SyncShapeError::SeekWithoutTime),
            (kind, Some(_)) => return Err(SyncShapeError::UnexpectedTime(kind)),
            (ActionKind::Play, None) => PlaybackAction::Play,
            (ActionKind::Pause, None) => PlaybackAction::Pause,
        };
        Ok(Self {
            group_id: raw.group_id,
            sender: raw.sender,
            action,
        })
    }
}

impl From<SyncCommand> for RawSync {
    fn from(command: SyncCommand) -> Self {
        Self {
            group_id: command.group_id,
            sender: command.sender,
            action: command.action.kind(),
            time: command.action.time(),
        }
    }
}
