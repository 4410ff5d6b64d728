// together_apart_relay — group relay for Together Apart watch parties.
//
// The relay is a thin message broker: it accepts WebSocket connections from
// watch clients, puts each one in the group named by its `join`, and forwards
// every `chat` and `sync` frame verbatim to the other members of the
// sender's group. It announces arrivals and departures as `notification`
// messages. It never interprets playback; all sync logic stays on the
// clients.
//
// Module overview:
// - `groups.rs`: `GroupRegistry`: membership, join validation, fan-out, and
//                the join/leave notices. The core data structure that
//                `server.rs` drives.
// - `server.rs`: listener, per-connection reader threads, and the main event
//                loop. Uses `std::net` with a thread-per-reader architecture
//                and an `mpsc` channel to funnel events into the
//                single-threaded `GroupRegistry`.
//
// Dependencies: `together_apart_protocol` (message types, codec, sockets).
//
// The relay can run as a standalone binary (`main.rs`) or be embedded in
// another process (or a test) via the library API (`start_relay`).

pub mod groups;
pub mod server;

pub use groups::{ClientId, GroupRegistry, Outlet, RelayError};
pub use server::{RelayConfig, RelayHandle, start_relay};
