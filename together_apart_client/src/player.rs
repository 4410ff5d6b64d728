// The media player seam.
//
// `MediaPlayer` is what the sync controller drives; `PlayerEvent` is what the
// host reports back when the player's state changes, whether the change came
// from the user or from a command the controller issued. Like a browser
// `<video>` element, a player emits its notifications asynchronously: a call
// to `play()` never re-enters the controller before it returns.
//
// `SimulatedPlayer` is a clock-driven stand-in with a fixed duration. The
// terminal client uses it, and it is handy wherever a real player is not.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::error::PlayerError;

/// Notification emitted by a player after its state changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerEvent {
    Play,
    Pause,
    /// A seek finished.
    Seeked,
    /// Playback reached the end of the media.
    Ended,
}

/// Commands and readouts the controller needs from a player.
pub trait MediaPlayer: Send + Sync {
    fn play(&self) -> Result<(), PlayerError>;
    fn pause(&self) -> Result<(), PlayerError>;
    fn seek(&self, time: f64) -> Result<(), PlayerError>;
    /// Current position in seconds.
    fn current_time(&self) -> f64;
    /// Whether playback stopped because the media ended.
    fn has_ended(&self) -> bool;
}

struct Playhead {
    position: f64,
    playing_since: Option<Instant>,
    ended: bool,
}

/// A player that advances with the wall clock and reports its state changes
/// on a channel.
pub struct SimulatedPlayer {
    duration: f64,
    playhead: Mutex<Playhead>,
    events: Sender<PlayerEvent>,
}

impl SimulatedPlayer {
    /// A paused player at position zero. The receiver yields the player's
    /// notifications in order.
    pub fn new(duration: f64) -> (Self, Receiver<PlayerEvent>) {
        let (tx, rx) = mpsc::channel();
        let player = Self {
            duration: duration.max(0.0),
            playhead: Mutex::new(Playhead {
                position: 0.0,
                playing_since: None,
                ended: false,
            }),
            events: tx,
        };
        (player, rx)
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing_since.is_some()
    }

    /// Detect the end of the media. Call periodically; emits `Pause` then
    /// `Ended` when the playhead runs off the end, as a browser does.
    pub fn tick(&self) {
        let mut playhead = self.lock();
        if playhead.playing_since.is_some() && self.position(&playhead) >= self.duration {
            playhead.position = self.duration;
            playhead.playing_since = None;
            playhead.ended = true;
            drop(playhead);
            self.emit(PlayerEvent::Pause);
            self.emit(PlayerEvent::Ended);
        }
    }

    fn position(&self, playhead: &Playhead) -> f64 {
        let elapsed = playhead
            .playing_since
            .map_or(0.0, |since| since.elapsed().as_secs_f64());
        (playhead.position + elapsed).min(self.duration)
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, Playhead> {
        self.playhead.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MediaPlayer for SimulatedPlayer {
    fn play(&self) -> Result<(), PlayerError> {
        let mut playhead = self.lock();
        if playhead.playing_since.is_some() {
            return Ok(());
        }
        if playhead.ended {
            playhead.position = 0.0;
            playhead.ended = false;
        }
        playhead.playing_since = Some(Instant::now());
        drop(playhead);
        self.emit(PlayerEvent::Play);
        Ok(())
    }

    fn pause(&self) -> Result<(), PlayerError> {
        let mut playhead = self.lock();
        if playhead.playing_since.is_none() {
            return Ok(());
        }
        let position = self.position(&playhead);
        playhead.position = position;
        playhead.playing_since = None;
        drop(playhead);
        self.emit(PlayerEvent::Pause);
        Ok(())
    }

    fn seek(&self, time: f64) -> Result<(), PlayerError> {
        if !time.is_finite() {
            return Err(PlayerError {
                command: "seek",
                reason: format!("invalid position {time}"),
            });
        }
        let mut playhead = self.lock();
        playhead.position = time.clamp(0.0, self.duration);
        playhead.ended = false;
        if playhead.playing_since.is_some() {
            playhead.playing_since = Some(Instant::now());
        }
        drop(playhead);
        self.emit(PlayerEvent::Seeked);
        Ok(())
    }

    fn current_time(&self) -> f64 {
        let playhead = self.lock();
        self.position(&playhead)
    }

    fn has_ended(&self) -> bool {
        self.lock().ended
    }
}
