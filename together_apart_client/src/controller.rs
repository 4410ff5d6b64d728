// Sync controller: the echo-suppressing playback state machine.
//
// Every event flows through here in one of two directions:
//
// - Local path (`on_player_event`): the player reports `play`, `pause`,
//   `seeked` or `ended`. If the echo guard is armed the event is the player's
//   reaction to a remote command and is swallowed; otherwise it is a user
//   action and goes out as a `sync` message.
// - Remote path (`on_remote_message`): a `sync` from another member arms the
//   guard and commands the player; chat, notifications and relay errors are
//   handed to the host.
//
// Guard lifetime: `arm` on every remote action, with a timeout (default
// 100 ms) that clears it if no completion event does. `seeked` clears it
// early. `play` and `pause` notifications do NOT clear it; the window stays
// open until the timeout, so a burst of notifications from one remote
// command is swallowed whole. A seek within tolerance is skipped, and the
// guard is cleared immediately because no `seeked` will follow.
//
// The guard mutex is never held while calling the player, the outbox, or the
// host. Player notifications are asynchronous (see `player.rs`), so commanding
// the player cannot re-enter `on_player_event` while the guard is locked.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info, warn};

use together_apart_protocol::{ActionKind, PlaybackAction, SyncCommand, SyncMessage};

use crate::config::{Session, SyncSettings};
use crate::connection::ConnectionManager;
use crate::error::{PlayerError, SendError};
use crate::guard::{EchoGuard, GuardToken};
use crate::host::{HostEvent, HostEvents};
use crate::player::{MediaPlayer, PlayerEvent};
use crate::timer::Scheduler;

/// Where outgoing messages go. Implemented by `ConnectionManager`.
pub trait Outbox: Send + Sync {
    fn send(&self, message: &SyncMessage) -> Result<(), SendError>;
}

impl Outbox for ConnectionManager {
    fn send(&self, message: &SyncMessage) -> Result<(), SendError> {
        ConnectionManager::send(self, message)
    }
}

pub struct SyncController {
    session: Session,
    settings: SyncSettings,
    player: Arc<dyn MediaPlayer>,
    outbox: Arc<dyn Outbox>,
    scheduler: Arc<dyn Scheduler>,
    host: HostEvents,
    guard: Arc<Mutex<EchoGuard>>,
}

impl SyncController {
    pub fn new(
        session: Session,
        settings: SyncSettings,
        player: Arc<dyn MediaPlayer>,
        outbox: Arc<dyn Outbox>,
        scheduler: Arc<dyn Scheduler>,
        host: HostEvents,
    ) -> Self {
        Self {
            session,
            settings,
            player,
            outbox,
            scheduler,
            host,
            guard: Arc::new(Mutex::new(EchoGuard::new())),
        }
    }

    pub fn guard_armed(&self) -> bool {
        self.lock_guard().is_armed()
    }

    /// A notification from the local player.
    pub fn on_player_event(&self, event: PlayerEvent) {
        let action = match event {
            PlayerEvent::Play => {
                if let Some(remote) = self.lock_guard().armed_for() {
                    debug!(%remote, "local play suppressed");
                    return;
                }
                PlaybackAction::Play
            }
            PlayerEvent::Pause => {
                if self.player.has_ended() {
                    debug!("local pause at end of media ignored");
                    return;
                }
                if let Some(remote) = self.lock_guard().armed_for() {
                    debug!(%remote, "local pause suppressed");
                    return;
                }
                PlaybackAction::Pause
            }
            PlayerEvent::Seeked => {
                if self.lock_guard().clear() {
                    debug!("remote seek completed");
                    return;
                }
                PlaybackAction::Seek(self.player.current_time())
            }
            PlayerEvent::Ended => {
                info!("playback ended");
                return;
            }
        };
        info!(%action, "local action");
        if let Err(err) = self.publish(action) {
            self.report_send_failure(&err);
        }
    }

    /// A decoded message from the relay.
    pub fn on_remote_message(&self, message: SyncMessage) {
        match message {
            SyncMessage::Sync(command) => self.on_remote_sync(command),
            SyncMessage::Chat(chat) => {
                debug!(sender = %chat.sender, "chat received");
                self.host.emit(HostEvent::ReceivedChat(chat));
            }
            SyncMessage::Notification { text } => {
                info!(%text, "relay notification");
                self.host.emit(HostEvent::Notification { text });
            }
            SyncMessage::Error { message } => {
                warn!(%message, "relay reported an error");
                self.host.emit(HostEvent::WebsocketError {
                    message: format!("Server: {message}"),
                });
            }
            SyncMessage::Join { .. } => {
                debug!("ignoring join echoed by relay");
            }
        }
    }

    /// Perform `action` locally, guarded like a remote action, then broadcast
    /// it to the group.
    pub fn initiate(&self, action: PlaybackAction) -> Result<(), SendError> {
        info!(%action, "host requested action");
        self.apply(action);
        self.publish(action)
    }

    /// Disarm the guard and cancel its timeout.
    pub fn shutdown(&self) {
        self.lock_guard().clear();
    }

    pub fn report_send_failure(&self, err: &SendError) {
        warn!(error = %err, "send failed");
        let message = match err {
            SendError::NotConnected => "Connection not open.".to_owned(),
            other => format!("Failed to send message: {other}"),
        };
        self.host.emit(HostEvent::WebsocketError { message });
    }

    fn on_remote_sync(&self, command: SyncCommand) {
        if command.sender == self.session.username {
            debug!(action = %command.action, "ignoring own sync");
            return;
        }
        info!(sender = %command.sender, action = %command.action, "remote action");
        self.apply(command.action);
    }

    /// Arm the guard and command the player.
    fn apply(&self, action: PlaybackAction) {
        let token = self.arm(action.kind());
        let result = match action {
            PlaybackAction::Play => self.player.play(),
            PlaybackAction::Pause => self.player.pause(),
            PlaybackAction::Seek(target) => {
                let current = self.player.current_time();
                if (current - target).abs() > self.settings.seek_tolerance {
                    self.player.seek(target)
                } else {
                    debug!(current, target, "already at target, seek skipped");
                    self.lock_guard().expire(token);
                    Ok(())
                }
            }
        };
        if let Err(err) = result {
            self.on_player_failure(token, &err);
        }
    }

    fn arm(&self, action: ActionKind) -> GuardToken {
        let mut guard = self.lock_guard();
        let token = guard.arm(action);
        let weak: Weak<Mutex<EchoGuard>> = Arc::downgrade(&self.guard);
        let timeout = self.scheduler.schedule(
            self.settings.guard_timeout,
            Box::new(move || {
                if let Some(guard) = weak.upgrade() {
                    let expired = guard
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .expire(token);
                    if expired {
                        debug!(%action, "echo guard timed out");
                    }
                }
            }),
        );
        guard.set_timeout(token, timeout);
        token
    }

    fn on_player_failure(&self, token: GuardToken, err: &PlayerError) {
        warn!(error = %err, "player command failed");
        self.lock_guard().expire(token);
    }

    fn publish(&self, action: PlaybackAction) -> Result<(), SendError> {
        let message = SyncMessage::sync(&self.session.group_id, &self.session.username, action);
        self.outbox.send(&message)
    }

    fn lock_guard(&self) -> MutexGuard<'_, EchoGuard> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
