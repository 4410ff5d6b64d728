// Integration smoke test for the relay server.
//
// Starts a relay on localhost and drives it with raw WebSocket clients built
// from the protocol crate's socket and codec: joining, join notices, relaying
// within and across groups, refusal of bad first messages, and departure
// notices. No watch client or player is involved.

use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use together_apart_protocol::socket::connect;
use together_apart_protocol::{FrameSocket, Incoming, SocketTimeouts, SyncMessage, decode, encode};
use together_apart_relay::{RelayConfig, start_relay};

type Client = FrameSocket<TcpStream>;

fn relay() -> (together_apart_relay::RelayHandle, SocketAddr) {
    let config = RelayConfig {
        port: 0, // OS picks a free port
        ..RelayConfig::default()
    };
    start_relay(config).unwrap()
}

fn open(addr: SocketAddr) -> Client {
    connect(&format!("ws://{addr}/"), &SocketTimeouts::default()).unwrap()
}

/// Connect and join; waits briefly so the relay registers the member before
/// the test continues.
fn join(addr: SocketAddr, group: &str, user: &str) -> Client {
    let client = open(addr);
    let join = SyncMessage::Join {
        group_id: group.into(),
        username: user.into(),
    };
    client.send_text(encode(&join).unwrap()).unwrap();
    thread::sleep(Duration::from_millis(100));
    client
}

/// Next frame as text, or `None` if nothing arrives within `wait`.
fn next_text(client: &Client, wait: Duration) -> Option<String> {
    let deadline = Instant::now() + wait;
    while Instant::now() < deadline {
        match client.recv().unwrap() {
            Incoming::Frame(bytes) => return Some(String::from_utf8(bytes).unwrap()),
            Incoming::Idle => continue,
            Incoming::Closed => return None,
        }
    }
    None
}

fn expect_text(client: &Client) -> String {
    next_text(client, Duration::from_secs(5)).expect("timed out waiting for a frame")
}

fn expect_message(client: &Client) -> SyncMessage {
    decode(expect_text(client).as_bytes()).unwrap()
}

/// Whether the relay closed this connection within a few seconds.
fn closed_by_relay(client: &Client) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        match client.recv() {
            Ok(Incoming::Closed) | Err(_) => return true,
            Ok(_) => continue,
        }
    }
    false
}

#[test]
fn group_lifecycle() {
    let (handle, addr) = relay();

    let alice = join(addr, "g1", "alice");
    let bob = join(addr, "g1", "bob");
    let carol = join(addr, "g2", "carol");

    assert_eq!(
        expect_message(&alice),
        SyncMessage::Notification {
            text: "bob has joined the movie night! 💞".into()
        }
    );

    // Relayed verbatim, extra fields and all, to the rest of the group only.
    let sync = r#"{"type":"sync","action":"seek","time":42.3,"groupId":"g1","sender":"alice","timestamp":1712345678.9}"#;
    alice.send_text(sync.into()).unwrap();
    assert_eq!(expect_text(&bob), sync);

    let chat = r#"{"type":"chat","groupId":"g1","sender":"bob","text":"popcorn?","time":"20:15"}"#;
    bob.send_text(chat.into()).unwrap();
    assert_eq!(expect_text(&alice), chat);

    // Frames for another group, without a group, or of unknown type go nowhere.
    alice
        .send_text(r#"{"type":"chat","groupId":"g2","sender":"alice","text":"psst","time":"1"}"#.into())
        .unwrap();
    alice.send_text(r#"{"type":"chat","text":"lost"}"#.into()).unwrap();
    alice.send_text(r#"{"type":"leave","groupId":"g1"}"#.into()).unwrap();
    assert_eq!(next_text(&bob, Duration::from_millis(300)), None);
    assert_eq!(next_text(&carol, Duration::from_millis(100)), None);

    // Departure is announced to whoever is left.
    bob.close();
    assert_eq!(
        expect_message(&alice),
        SyncMessage::Notification {
            text: "bob has left the movie night. 👋".into()
        }
    );

    handle.stop();
    assert!(closed_by_relay(&alice));
}

#[test]
fn invalid_join_is_answered_with_error() {
    let (handle, addr) = relay();

    let client = open(addr);
    client
        .send_text(r#"{"type":"join","groupId":"g1"}"#.into())
        .unwrap();
    assert_eq!(
        expect_message(&client),
        SyncMessage::Error {
            message: "Username and groupId required for join.".into()
        }
    );
    assert!(closed_by_relay(&client));

    handle.stop();
}

#[test]
fn first_message_must_be_a_join() {
    let (handle, addr) = relay();

    let not_join = open(addr);
    not_join
        .send_text(r#"{"type":"chat","groupId":"g1","sender":"x","text":"hi","time":"1"}"#.into())
        .unwrap();
    assert!(closed_by_relay(&not_join));

    let not_json = open(addr);
    not_json.send_text("hello?".into()).unwrap();
    assert!(closed_by_relay(&not_json));

    handle.stop();
}
