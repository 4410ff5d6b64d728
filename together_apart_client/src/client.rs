// `WatchClient`: the host-facing facade of the sync core.
//
// Wires a `ConnectionManager` and a `SyncController` together for one
// validated session and translates between them and the host:
//
// - connection events become `HostEvent::Status` / `WebsocketError`;
// - inbound messages go to the controller;
// - the one-shot `HostInstructions` (a chat line, a playback action) run the
//   first time the connection opens. One that the link drops before it is
//   written is retried on the next open; one that was written never runs
//   again, even across reconnects.
//
// The connection holds its handler (`Dispatcher`) strongly, so the
// dispatcher only holds a `Weak` back to the core. Dropping the client stops
// the connection.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::Local;
use tracing::{info, warn};

use together_apart_protocol::{ChatMessage, PlaybackAction, SyncMessage};

use crate::config::{ClientConfig, HostInstructions, OutgoingChat, Session};
use crate::connection::{ConnectionEvent, ConnectionHandler, ConnectionManager, ConnectionState};
use crate::controller::SyncController;
use crate::error::{ConfigError, SendError};
use crate::host::{HostEvent, HostEvents};
use crate::player::{MediaPlayer, PlayerEvent};
use crate::timer::{Scheduler, ThreadScheduler};
use crate::transport::{Connector, WsConnector};

struct Core {
    session: Session,
    connection: Arc<ConnectionManager>,
    controller: SyncController,
    host: HostEvents,
    pending: Mutex<Option<HostInstructions>>,
}

struct Dispatcher {
    core: Weak<Core>,
}

impl ConnectionHandler for Dispatcher {
    fn on_message(&self, message: SyncMessage) {
        if let Some(core) = self.core.upgrade() {
            core.controller.on_remote_message(message);
        }
    }

    fn on_event(&self, event: ConnectionEvent) {
        if let Some(core) = self.core.upgrade() {
            core.on_connection_event(event);
        }
    }
}

/// One member of a watch party.
pub struct WatchClient {
    core: Arc<Core>,
}

impl WatchClient {
    /// Validate `config` and build a client that talks WebSocket to the
    /// relay. Nothing connects until `start`.
    pub fn new(
        config: ClientConfig,
        player: Arc<dyn MediaPlayer>,
    ) -> Result<(Self, Receiver<HostEvent>), ConfigError> {
        let connector = Arc::new(WsConnector::new(config.socket));
        Self::with_parts(config, player, connector, Arc::new(ThreadScheduler))
    }

    /// Like `new`, with the transport and clock supplied by the caller.
    pub fn with_parts(
        config: ClientConfig,
        player: Arc<dyn MediaPlayer>,
        connector: Arc<dyn Connector>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<(Self, Receiver<HostEvent>), ConfigError> {
        let session = config.validate()?;
        let (host, events) = HostEvents::channel();
        let connection = Arc::new(ConnectionManager::new(
            config.url.trim(),
            session.clone(),
            config.backoff,
            connector,
            Arc::clone(&scheduler),
        ));
        let controller = SyncController::new(
            session.clone(),
            config.sync,
            player,
            connection.clone(),
            scheduler,
            host.clone(),
        );
        let core = Arc::new(Core {
            session,
            connection,
            controller,
            host,
            pending: Mutex::new(Some(config.instructions)),
        });
        core.connection.set_handler(Arc::new(Dispatcher {
            core: Arc::downgrade(&core),
        }));
        Ok((Self { core }, events))
    }

    /// Connect to the relay. Pending one-shot instructions run as soon as the
    /// connection opens.
    pub fn start(&self) {
        info!(
            group = %self.core.session.group_id,
            user = %self.core.session.username,
            "starting watch client"
        );
        self.core.connection.connect();
    }

    /// Forward a notification from the local player.
    pub fn on_player_event(&self, event: PlayerEvent) {
        self.core.controller.on_player_event(event);
    }

    /// Send a chat line stamped with the local time.
    pub fn send_chat(&self, text: &str) -> Result<(), SendError> {
        self.core.send_chat(OutgoingChat {
            text: text.to_owned(),
            time: None,
        })
    }

    /// Perform a playback action locally and broadcast it.
    pub fn request_playback(&self, action: PlaybackAction) -> Result<(), SendError> {
        self.core.request_playback(action)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.core.connection.state()
    }

    pub fn guard_armed(&self) -> bool {
        self.core.controller.guard_armed()
    }

    pub fn session(&self) -> &Session {
        &self.core.session
    }

    /// Disconnect for good.
    pub fn stop(&self) {
        // Connection first, so no remote sync can re-arm the guard after it
        // is cleared.
        self.core.connection.stop();
        self.core.controller.shutdown();
    }
}

impl Drop for WatchClient {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Core {
    fn on_connection_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged(state) => {
                self.host.emit(HostEvent::Status { state });
                if state == ConnectionState::Open {
                    self.run_instructions();
                }
            }
            ConnectionEvent::TransportError(_) => {
                self.host.emit(HostEvent::WebsocketError {
                    message: "WebSocket connection error occurred.".into(),
                });
            }
            ConnectionEvent::Exhausted { .. } => {
                self.host.emit(HostEvent::WebsocketError {
                    message: "Disconnected. Could not reconnect.".into(),
                });
            }
        }
    }

    fn run_instructions(&self) {
        let Some(instructions) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        // Failures already reached the host. Whatever the link lost is kept
        // for the next open.
        let mut undelivered = HostInstructions::default();
        if let Some(chat) = instructions.outgoing_chat.clone() {
            if chat.text.trim().is_empty() {
                warn!("ignoring empty one-shot chat");
            } else if let Err(err) = self.send_chat(chat.clone()) {
                if link_lost(&err) {
                    undelivered.outgoing_chat = Some(chat);
                }
            }
        }

        match instructions.playback() {
            Ok(Some(action)) => {
                if let Err(err) = self.request_playback(action) {
                    if link_lost(&err) {
                        undelivered.playback_action = instructions.playback_action;
                        undelivered.seek_time = instructions.seek_time;
                    }
                }
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "ignoring one-shot playback action"),
        }

        if undelivered != HostInstructions::default() {
            info!("one-shot instructions deferred to the next connection");
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if pending.is_none() {
                *pending = Some(undelivered);
            }
        }
    }

    fn send_chat(&self, chat: OutgoingChat) -> Result<(), SendError> {
        let time = chat
            .time
            .clone()
            .unwrap_or_else(|| Local::now().format("%H:%M:%S").to_string());
        let message = SyncMessage::Chat(ChatMessage {
            group_id: self.session.group_id.clone(),
            sender: self.session.username.clone(),
            text: chat.text.clone(),
            time,
        });
        match self.connection.send(&message) {
            Ok(()) => {
                self.host.emit(HostEvent::OutgoingMessageSent(chat));
                Ok(())
            }
            Err(err) => {
                self.controller.report_send_failure(&err);
                Err(err)
            }
        }
    }

    fn request_playback(&self, action: PlaybackAction) -> Result<(), SendError> {
        match self.controller.initiate(action) {
            Ok(()) => {
                self.host.emit(HostEvent::PlaybackActionSent {
                    action: action.kind(),
                });
                Ok(())
            }
            Err(err) => {
                self.controller.report_send_failure(&err);
                Err(err)
            }
        }
    }
}

/// Whether a send failed because the connection is gone, as opposed to the
/// message itself being unsendable.
fn link_lost(err: &SendError) -> bool {
    matches!(err, SendError::NotConnected | SendError::Transport(_))
}
