// together_apart_protocol — wire protocol for the watch-party relay.
//
// This crate defines the message types, the JSON codec, and the WebSocket
// socket wrapper used by the relay (`together_apart_relay`) and watch clients
// (`together_apart_client`). It is shared by both sides and knows nothing
// about media players or reconnection policy.
//
// Module overview:
// - `types.rs`:   `PlaybackAction` (play/pause/seek-with-time) and the bare
//                 `ActionKind` discriminator.
// - `message.rs`: `SyncMessage`, the tagged union of every wire message, plus
//                 `ChatMessage` and `SyncCommand`.
// - `codec.rs`:   `encode`/`decode` between `SyncMessage` and JSON text.
// - `socket.rs`:  `FrameSocket`, a tungstenite WebSocket that one thread can
//                 read while others write, plus `connect`/`accept`.
//
// Design decisions:
// - **JSON text frames.** Browsers and scripts speak the same protocol, so the
//   format stays human-readable.
// - **No async runtime.** Sockets are blocking with short read timeouts,
//   driven by plain threads on both sides.

pub mod codec;
pub mod message;
pub mod socket;
pub mod types;

pub use codec::{DecodeError, EncodeError, decode, encode};
pub use message::{ChatMessage, MESSAGE_KINDS, SyncCommand, SyncMessage, SyncShapeError};
pub use socket::{FrameSocket, Incoming, MAX_MESSAGE_SIZE, SocketError, SocketTimeouts};
pub use types::{ActionKind, PlaybackAction, UnknownAction};
