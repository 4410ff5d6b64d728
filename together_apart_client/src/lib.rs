// together_apart_client — playback sync core for a watch-party member.
//
// Keeps a local media player in step with the rest of a group through the
// relay (`together_apart_relay`). The two hard parts are echo suppression
// (replaying a remote action must not send it back out) and connection
// resilience (bounded, backing-off reconnects that rejoin the group).
//
// Module overview:
// - `client.rs`:     `WatchClient`, the host-facing facade. Wires connection
//                    and controller together, runs one-shot instructions.
// - `connection.rs`: `ConnectionManager`: transport ownership, reader thread,
//                    reconnect backoff, connection epochs.
// - `controller.rs`: `SyncController`, the echo-suppressing state machine
//                    between the player and the relay.
// - `guard.rs`:      `EchoGuard`, the arm/clear/expire window with
//                    generation tokens.
// - `transport.rs`:  `Connector`/`Transport` seam and the WebSocket
//                    implementation.
// - `timer.rs`:      cancellable one-shot timers (`ThreadScheduler`,
//                    `ManualScheduler` for tests).
// - `player.rs`:     `MediaPlayer` seam, `PlayerEvent`, `SimulatedPlayer`.
// - `host.rs`:       `HostEvent`, everything reported back to the host.
// - `config.rs`:     `ClientConfig`, `Session`, `BackoffPolicy`,
//                    `SyncSettings`, `HostInstructions`.
// - `error.rs`:      error enums.
//
// The `watch` binary (`src/bin/watch.rs`) drives a `SimulatedPlayer` from
// stdin and prints host events as JSON lines.

pub mod client;
pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod guard;
pub mod host;
pub mod player;
pub mod timer;
pub mod transport;

pub use client::WatchClient;
pub use config::{BackoffPolicy, ClientConfig, HostInstructions, OutgoingChat, Session, SyncSettings};
pub use connection::{ConnectionEvent, ConnectionHandler, ConnectionManager, ConnectionState};
pub use controller::{Outbox, SyncController};
pub use error::{ConfigError, PlayerError, SendError, TransportError};
pub use host::{HostEvent, HostEvents};
pub use player::{MediaPlayer, PlayerEvent, SimulatedPlayer};
pub use timer::{ManualScheduler, Scheduler, ThreadScheduler, TimerHandle};
pub use transport::{Connector, Transport, WsConnector};
