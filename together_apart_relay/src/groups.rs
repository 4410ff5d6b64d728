// Group registry for the relay.
//
// `GroupRegistry` is the central data structure that `server.rs` drives. It
// tracks which connection belongs to which group under which name, and fans
// messages out to the other members of a group. All mutation happens through
// methods called from the server's single-threaded main loop, so there is no
// internal locking.
//
// Key responsibilities:
// - Membership: `register` validates a join and adds the member; `unregister`
//   removes it and drops the group once empty.
// - Notices: joining and leaving are announced to the rest of the group as
//   `notification` messages.
// - Relaying: `chat` and `sync` frames are forwarded verbatim (the exact text
//   the sender wrote) to every other member of the sender's group. The relay
//   only looks at `type` and `groupId`; it never interprets playback.
//
// Writing to clients goes through the `Outlet` trait. Write errors on a
// single member are logged but do not disturb the others; that member's
// reader thread will notice the broken connection and report a disconnect.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::TcpStream;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use together_apart_protocol::{EncodeError, FrameSocket, SocketError, SyncMessage, encode};

/// Relay-assigned connection id. Never reused within one relay run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Write side of a client connection.
pub trait Outlet: Send + Sync {
    fn send_text(&self, text: String) -> Result<(), SocketError>;
    fn close(&self);
}

impl Outlet for FrameSocket<TcpStream> {
    fn send_text(&self, text: String) -> Result<(), SocketError> {
        FrameSocket::send_text(self, text)
    }

    fn close(&self) {
        FrameSocket::close(self);
    }
}

/// Why the relay refused a join or a frame.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("join requires a username and groupId")]
    InvalidJoin,
    #[error("{0} is not a registered client")]
    UnknownClient(ClientId),
    #[error("frame is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame has no `type` or `groupId`")]
    MissingFields,
    #[error("frame for group `{claimed}` from a member of `{registered}`")]
    GroupMismatch { registered: String, claimed: String },
    #[error("unknown message kind `{0}`")]
    UnknownKind(String),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Reply sent to a client whose join is missing its username or group.
pub const INVALID_JOIN_MESSAGE: &str = "Username and groupId required for join.";

pub fn joined_notice(username: &str) -> String {
    format!("{username} has joined the movie night! 💞")
}

pub fn left_notice(username: &str) -> String {
    format!("{username} has left the movie night. 👋")
}

/// The two fields the relay routes on. Everything else in a frame is opaque.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "groupId")]
    group_id: Option<String>,
}

struct Member {
    username: String,
    group_id: String,
    outlet: Arc<dyn Outlet>,
}

#[derive(Default)]
pub struct GroupRegistry {
    members: BTreeMap<ClientId, Member>,
    groups: BTreeMap<String, BTreeSet<ClientId>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client to a group. On an invalid join the client is sent an
    /// `error` message and not registered.
    pub fn register(
        &mut self,
        id: ClientId,
        group_id: Option<&str>,
        username: Option<&str>,
        outlet: Arc<dyn Outlet>,
    ) -> Result<(), RelayError> {
        let (group_id, username) = match (group_id, username) {
            (Some(group), Some(user)) if !group.is_empty() && !user.is_empty() => (group, user),
            _ => {
                warn!(client = %id, ?group_id, ?username, "invalid join");
                let reply = encode(&SyncMessage::Error {
                    message: INVALID_JOIN_MESSAGE.into(),
                })?;
                if let Err(err) = outlet.send_text(reply) {
                    debug!(client = %id, error = %err, "could not send join error");
                }
                return Err(RelayError::InvalidJoin);
            }
        };

        self.groups
            .entry(group_id.to_owned())
            .or_default()
            .insert(id);
        self.members.insert(
            id,
            Member {
                username: username.to_owned(),
                group_id: group_id.to_owned(),
                outlet,
            },
        );
        info!(client = %id, user = username, group = group_id, "client joined");

        let notice = encode(&SyncMessage::Notification {
            text: joined_notice(username),
        })?;
        self.broadcast(group_id, &notice, Some(id));
        Ok(())
    }

    /// Remove a client and tell the rest of its group. Unknown ids (clients
    /// that never completed a join) are ignored.
    pub fn unregister(&mut self, id: ClientId) {
        let Some(member) = self.members.remove(&id) else {
            debug!(client = %id, "unregistering unknown client");
            return;
        };
        info!(client = %id, user = %member.username, group = %member.group_id, "client left");

        let now_empty = match self.groups.get_mut(&member.group_id) {
            Some(ids) => {
                ids.remove(&id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.groups.remove(&member.group_id);
            info!(group = %member.group_id, "group is empty, removing");
            return;
        }

        match encode(&SyncMessage::Notification {
            text: left_notice(&member.username),
        }) {
            Ok(notice) => {
                self.broadcast(&member.group_id, &notice, None);
            }
            Err(err) => warn!(error = %err, "could not encode leave notice"),
        }
    }

    /// Forward a frame from `id` to the rest of its group. Returns how many
    /// members it was sent to.
    pub fn relay(&self, id: ClientId, frame: &[u8]) -> Result<usize, RelayError> {
        let member = self.members.get(&id).ok_or(RelayError::UnknownClient(id))?;
        let envelope: Envelope = serde_json::from_slice(frame)?;
        let (kind, group_id) = match (envelope.kind, envelope.group_id) {
            (Some(kind), Some(group_id)) => (kind, group_id),
            _ => return Err(RelayError::MissingFields),
        };
        if group_id != member.group_id {
            return Err(RelayError::GroupMismatch {
                registered: member.group_id.clone(),
                claimed: group_id,
            });
        }
        match kind.as_str() {
            "chat" | "sync" => {
                debug!(client = %id, user = %member.username, %kind, group = %group_id, "relaying");
                let text = String::from_utf8_lossy(frame).into_owned();
                Ok(self.broadcast(&group_id, &text, Some(id)))
            }
            _ => Err(RelayError::UnknownKind(kind)),
        }
    }

    /// Send `text` to every member of `group_id` except `except`.
    pub fn broadcast(&self, group_id: &str, text: &str, except: Option<ClientId>) -> usize {
        let Some(ids) = self.groups.get(group_id) else {
            warn!(group = group_id, "broadcast to unknown group");
            return 0;
        };
        let mut sent = 0;
        for id in ids.iter().filter(|id| Some(**id) != except) {
            if let Some(member) = self.members.get(id) {
                match member.outlet.send_text(text.to_owned()) {
                    Ok(()) => sent += 1,
                    Err(err) => warn!(client = %id, error = %err, "send failed"),
                }
            }
        }
        sent
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Usernames in a group, in join order of their connection ids.
    pub fn group_members(&self, group_id: &str) -> Vec<String> {
        self.groups
            .get(group_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.members.get(id))
                    .map(|member| member.username.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Close every member connection and forget them.
    pub fn shutdown(&mut self) {
        for member in self.members.values() {
            member.outlet.close();
        }
        self.members.clear();
        self.groups.clear();
    }
}
