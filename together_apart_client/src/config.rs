// Client configuration and the immutable session identity.
//
// The host supplies a `ClientConfig` once at startup: where the relay is, which
// group to join under which name, tuning for the sync state machine and the
// reconnect policy, and the optional one-shot instructions (a chat line to
// send, a playback action to perform). `validate` turns it into a `Session`,
// or rejects it before any connection is attempted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use together_apart_protocol::{ActionKind, PlaybackAction, SocketTimeouts};

use crate::error::ConfigError;

/// Who this client is. Fixed for the lifetime of the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub group_id: String,
    /// Display name; doubles as the client id in `sender` fields.
    pub username: String,
}

/// Reconnect schedule: attempt `n` waits `min(unit * 2^n, cap)`, for
/// attempts `1..=max_attempts`. A successful open resets `n` to zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub unit: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(1),
            cap: Duration::from_secs(32),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `attempt` (1-based), or `None` once the
    /// budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        Some(self.unit.saturating_mul(factor).min(self.cap))
    }
}

/// Tuning for the echo-suppressing state machine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyncSettings {
    /// How long a remote action suppresses local notifications if no
    /// completion event clears it first.
    pub guard_timeout: Duration,
    /// Remote seeks closer than this (seconds) to the local position are
    /// skipped.
    pub seek_tolerance: f64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            guard_timeout: Duration::from_millis(100),
            seek_tolerance: 0.5,
        }
    }
}

/// A chat line the host wants sent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingChat {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

/// One-shot instructions from the host, each performed at most once per
/// `WatchClient`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HostInstructions {
    pub outgoing_chat: Option<OutgoingChat>,
    pub playback_action: Option<ActionKind>,
    pub seek_time: Option<f64>,
}

impl HostInstructions {
    /// The requested playback action, with the seek time attached. The seek
    /// time is ignored for play and pause.
    pub fn playback(&self) -> Result<Option<PlaybackAction>, ConfigError> {
        let action = match self.playback_action {
            None => return Ok(None),
            Some(ActionKind::Play) => PlaybackAction::Play,
            Some(ActionKind::Pause) => PlaybackAction::Pause,
            Some(ActionKind::Seek) => match self.seek_time {
                Some(time) if time.is_finite() && time >= 0.0 => PlaybackAction::Seek(time),
                _ => return Err(ConfigError::MissingSeekTime),
            },
        };
        Ok(Some(action))
    }
}

/// Everything a `WatchClient` needs at startup.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub url: String,
    pub group_id: String,
    pub username: String,
    pub sync: SyncSettings,
    pub backoff: BackoffPolicy,
    pub socket: SocketTimeouts,
    pub instructions: HostInstructions,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, group_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            group_id: group_id.into(),
            username: username.into(),
            sync: SyncSettings::default(),
            backoff: BackoffPolicy::default(),
            socket: SocketTimeouts::default(),
            instructions: HostInstructions::default(),
        }
    }

    /// Check the required parameters and build the session identity.
    pub fn validate(&self) -> Result<Session, ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::MissingUrl);
        }
        if self.group_id.trim().is_empty() {
            return Err(ConfigError::MissingGroupId);
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::MissingUsername);
        }
        self.instructions.playback()?;
        Ok(Session {
            group_id: self.group_id.trim().to_owned(),
            username: self.username.trim().to_owned(),
        })
    }
}
