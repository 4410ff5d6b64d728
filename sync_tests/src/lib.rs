// Test-only watch-party members for end-to-end sync tests.
//
// `TestWatcher` wraps a real `WatchClient` and a real `SimulatedPlayer` and
// pumps events between them the way the `watch` binary's main loop does:
// player notifications go into the client, host events are collected for
// assertions. `Spy` is a raw WebSocket member of a group that records every
// frame the relay forwards to it, which is how the tests count what each
// watcher actually sent.
//
// The only test-specific code here is the synchronous polling wrappers. All
// networking, sync and player logic uses the same code paths as the binary.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::{Duration, Instant};

use together_apart_client::{
    ClientConfig, ConnectionState, HostEvent, MediaPlayer, PlayerEvent, SimulatedPlayer,
    WatchClient,
};
use together_apart_protocol::socket::connect;
use together_apart_protocol::{FrameSocket, Incoming, SocketTimeouts, SyncMessage, decode, encode};

/// Default timeout for blocking waits.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep between polls.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Guard window used by test watchers. Longer than the default so a slow CI
/// machine still pumps player events inside it.
pub const TEST_GUARD_TIMEOUT: Duration = Duration::from_millis(500);

/// Media length of every simulated player.
pub const TEST_DURATION: f64 = 600.0;

pub fn relay_url(addr: SocketAddr) -> String {
    format!("ws://{addr}/")
}

/// Config for a watcher in `group` with the test guard window.
pub fn watcher_config(addr: SocketAddr, group: &str, username: &str) -> ClientConfig {
    let mut config = ClientConfig::new(relay_url(addr), group, username);
    config.sync.guard_timeout = TEST_GUARD_TIMEOUT;
    config
}

/// A watch client with a simulated player, driven synchronously.
pub struct TestWatcher {
    pub client: WatchClient,
    pub player: Arc<SimulatedPlayer>,
    player_events: Receiver<PlayerEvent>,
    host_events: Receiver<HostEvent>,
    seen: Vec<HostEvent>,
}

impl TestWatcher {
    /// Start a watcher and wait until it has joined.
    pub fn join(addr: SocketAddr, group: &str, username: &str) -> Self {
        Self::start(watcher_config(addr, group, username))
    }

    /// Start a watcher from a full config and wait until it has joined.
    pub fn start(config: ClientConfig) -> Self {
        let mut watcher = Self::start_detached(config);
        watcher.wait_for_state(ConnectionState::Open);
        // Let the relay register the join before anyone else acts.
        thread::sleep(Duration::from_millis(100));
        watcher.pump();
        watcher
    }

    /// Start a watcher without waiting for the connection.
    pub fn start_detached(config: ClientConfig) -> Self {
        let (player, player_events) = SimulatedPlayer::new(TEST_DURATION);
        let player = Arc::new(player);
        let (client, host_events) =
            WatchClient::new(config, player.clone()).expect("invalid watcher config");
        client.start();
        Self {
            client,
            player,
            player_events,
            host_events,
            seen: Vec::new(),
        }
    }

    /// Forward pending player notifications and collect host events.
    pub fn pump(&mut self) {
        self.player.tick();
        for event in self.player_events.try_iter() {
            self.client.on_player_event(event);
        }
        self.seen.extend(self.host_events.try_iter());
    }

    /// Keep pumping for `duration`.
    pub fn pump_for(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            self.pump();
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Pump until `condition` holds.
    pub fn wait_until(&mut self, what: &str, condition: impl Fn(&Self) -> bool) {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            self.pump();
            if condition(self) {
                return;
            }
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn wait_for_state(&mut self, state: ConnectionState) {
        self.wait_until(&format!("connection {}", state.as_str()), |w| {
            w.client.connection_state() == state
        });
    }

    /// Host events collected so far.
    pub fn host_events(&self) -> &[HostEvent] {
        &self.seen
    }

    pub fn saw(&self, event: &HostEvent) -> bool {
        self.seen.contains(event)
    }

    pub fn clear_host_events(&mut self) {
        self.pump();
        self.seen.clear();
    }

    /// The user presses play on the local player.
    pub fn user_play(&mut self) {
        self.player.play().expect("play failed");
        self.pump();
    }

    /// The user presses pause on the local player.
    pub fn user_pause(&mut self) {
        self.player.pause().expect("pause failed");
        self.pump();
    }

    /// The user drags the progress bar.
    pub fn user_seek(&mut self, time: f64) {
        self.player.seek(time).expect("seek failed");
        self.pump();
    }
}

/// A raw group member that records everything the relay forwards to it.
pub struct Spy {
    socket: FrameSocket<TcpStream>,
}

impl Spy {
    pub fn join(addr: SocketAddr, group: &str) -> Self {
        let socket = connect(&relay_url(addr), &SocketTimeouts::default()).expect("spy connect failed");
        let join = SyncMessage::Join {
            group_id: group.into(),
            username: "spy".into(),
        };
        socket
            .send_text(encode(&join).expect("encode join"))
            .expect("spy join failed");
        thread::sleep(Duration::from_millis(100));
        Self { socket }
    }

    /// Every message received within `duration`.
    pub fn collect_for(&self, duration: Duration) -> Vec<SyncMessage> {
        let deadline = Instant::now() + duration;
        let mut messages = Vec::new();
        while Instant::now() < deadline {
            match self.socket.recv().expect("spy read failed") {
                Incoming::Frame(bytes) => messages.push(decode(&bytes).expect("spy decode failed")),
                Incoming::Idle => {}
                Incoming::Closed => break,
            }
        }
        messages
    }

    /// Only the `sync` messages received within `duration`.
    pub fn syncs_for(&self, duration: Duration) -> Vec<SyncMessage> {
        self.collect_for(duration)
            .into_iter()
            .filter(|m| matches!(m, SyncMessage::Sync(_)))
            .collect()
    }
}
