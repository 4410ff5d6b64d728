// Playback action types shared by the message enum and both endpoints.
//
// `PlaybackAction` is the value the sync state machine works with: a seek
// always carries its target time, so the "time present iff seek" rule of the
// wire format is enforced by construction rather than checked at every use.
// `ActionKind` is the bare discriminator as it appears on the wire
// (`"play"`, `"pause"`, `"seek"`) and in host configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A playback command applied to, or reported by, a media player.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PlaybackAction {
    Play,
    Pause,
    /// Jump to an absolute position, in seconds from the start of the media.
    Seek(f64),
}

impl PlaybackAction {
    pub fn kind(self) -> ActionKind {
        match self {
            PlaybackAction::Play => ActionKind::Play,
            PlaybackAction::Pause => ActionKind::Pause,
            PlaybackAction::Seek(_) => ActionKind::Seek,
        }
    }

    /// Seek target, if this is a seek.
    pub fn time(self) -> Option<f64> {
        match self {
            PlaybackAction::Seek(time) => Some(time),
            PlaybackAction::Play | PlaybackAction::Pause => None,
        }
    }
}

impl fmt::Display for PlaybackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackAction::Seek(time) => write!(f, "seek to {time:.3}s"),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// Wire discriminator for a playback action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Play,
    Pause,
    Seek,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Play => "play",
            ActionKind::Pause => "pause",
            ActionKind::Seek => "seek",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an action name that is not `play`, `pause` or `seek`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown playback action `{0}` (expected play, pause or seek)")]
pub struct UnknownAction(pub String);

impl FromStr for ActionKind {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "play" => Ok(ActionKind::Play),
            "pause" => Ok(ActionKind::Pause),
            "seek" => Ok(ActionKind::Seek),
            _ => Err(UnknownAction(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_time_follow_variant() {
        assert_eq!(PlaybackAction::Play.kind(), ActionKind::Play);
        assert_eq!(PlaybackAction::Pause.time(), None);
        assert_eq!(PlaybackAction::Seek(42.3).kind(), ActionKind::Seek);
        assert_eq!(PlaybackAction::Seek(42.3).time(), Some(42.3));
    }

    #[test]
    fn parses_action_names_case_insensitively() {
        assert_eq!("play".parse::<ActionKind>(), Ok(ActionKind::Play));
        assert_eq!(" Pause ".parse::<ActionKind>(), Ok(ActionKind::Pause));
        assert_eq!("SEEK".parse::<ActionKind>(), Ok(ActionKind::Seek));
        assert_eq!(
            "rewind".parse::<ActionKind>(),
            Err(UnknownAction("rewind".into()))
        );
    }

    #[test]
    fn display_includes_seek_target() {
        assert_eq!(PlaybackAction::Play.to_string(), "play");
        assert_eq!(PlaybackAction::Seek(1.5).to_string(), "seek to 1.500s");
    }
}
