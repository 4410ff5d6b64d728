// Error types of the watch client.
//
// Only `ConfigError` is ever returned to the host as a hard failure, and only
// before anything has connected. Everything that can go wrong afterwards is
// absorbed by the component that saw it: transport errors drive the reconnect
// policy, send errors become `HostEvent::WebsocketError`, player errors clear
// the echo guard.

use thiserror::Error;

use together_apart_protocol::{EncodeError, SocketError};

/// Startup configuration that cannot produce a working session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing relay url")]
    MissingUrl,
    #[error("missing group id")]
    MissingGroupId,
    #[error("missing username")]
    MissingUsername,
    #[error("seek requested without a valid seek time")]
    MissingSeekTime,
}

/// The connection to the relay failed or could not be opened.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("transport closed")]
    Closed,
}

/// A message could not be handed to the relay.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection not open")]
    NotConnected,
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The media player refused a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("player rejected {command}: {reason}")]
pub struct PlayerError {
    pub command: &'static str,
    pub reason: String,
}
