// Events the core reports to its host.
//
// The host (UI, terminal, test harness) owns rendering and acknowledgement.
// The core never calls into it directly; it pushes `HostEvent`s onto a channel
// after each state transition, and the host drains the receiver whenever it
// is ready, the same way `NetClient::poll` style inboxes work.
//
// Serialized as `{"type": ..., "data": ...}` so a host bridging to a web
// frontend can forward events unchanged.

use std::sync::mpsc::{self, Receiver, Sender};

use serde::Serialize;

use together_apart_protocol::{ActionKind, ChatMessage};

use crate::config::OutgoingChat;
use crate::connection::ConnectionState;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HostEvent {
    /// A chat line from another group member, verbatim.
    ReceivedChat(ChatMessage),
    /// Something went wrong that the user should know about.
    WebsocketError { message: String },
    /// The one-shot chat line was handed to the relay.
    OutgoingMessageSent(OutgoingChat),
    /// A host-requested playback action was performed and broadcast.
    PlaybackActionSent { action: ActionKind },
    /// Relay notice, e.g. someone joined or left.
    Notification { text: String },
    /// The connection changed state.
    Status { state: ConnectionState },
}

/// Sending half of the host event channel.
#[derive(Clone, Debug)]
pub struct HostEvents {
    tx: Sender<HostEvent>,
}

impl HostEvents {
    pub fn channel() -> (Self, Receiver<HostEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    /// Deliver an event. A host that stopped listening is not an error.
    pub fn emit(&self, event: HostEvent) {
        let _ = self.tx.send(event);
    }
}
