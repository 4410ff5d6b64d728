// Connection manager: owns the relay transport and the reconnect policy.
//
// Lifecycle:
//
//   Disconnected --connect()--> Connecting --open ok--> Open
//        ^                          |                     |
//        |                      open failed          peer closed /
//        |                          |                read error
//        +------ schedule reconnect +---------------------+
//
// On every close (including a failed open) the attempt counter is bumped and
// a reconnect is scheduled on the `Scheduler` after `BackoffPolicy::delay_for`.
// Once the budget is spent, `ConnectionEvent::Exhausted` is reported and
// nothing more is scheduled. A successful open resets the counter and sends
// `Join` before the connection is published as `Open`, so nothing the owner
// sends can overtake it.
//
// Threads: `connect` runs the open on the caller's thread (the reconnect timer
// is just another caller). Each open connection gets a reader thread that
// decodes frames and hands them to the `ConnectionHandler`. All state lives in
// one `Link` behind one mutex, and the mutex is never held while calling the
// connector, the transport, or the handler.
//
// Each open bumps `epoch`; a reader thread reports its close with the epoch it
// was started for, so a reader that outlives its connection cannot tear down
// a newer one. The reconnect timer and an explicit `connect` race harmlessly:
// whichever runs second sees `Connecting`/`Open` and does nothing.
//
// `stop` is terminal: it cancels the reconnect timer, closes the transport,
// and releases the handler (which usually holds an `Arc` back to the owner).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use together_apart_protocol::{DecodeError, Incoming, SyncMessage, decode, encode};

use crate::config::{BackoffPolicy, Session};
use crate::error::SendError;
use crate::timer::{Scheduler, TimerHandle};
use crate::transport::{Connector, Transport};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        }
    }
}

/// Something the owner of the connection should know about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    /// The transport failed to open or broke while open. A reconnect follows
    /// unless the budget is spent.
    TransportError(String),
    /// Every reconnect attempt failed; the manager has given up.
    Exhausted { attempts: u32 },
}

/// Receives decoded inbound messages and connection events. Called from the
/// reader thread, timer threads, and the thread calling `connect`/`stop`.
pub trait ConnectionHandler: Send + Sync {
    fn on_message(&self, message: SyncMessage);
    fn on_event(&self, event: ConnectionEvent);
}

struct Link {
    state: ConnectionState,
    transport: Option<Arc<dyn Transport>>,
    epoch: u64,
    attempt: u32,
    stopped: bool,
    reconnect: Option<TimerHandle>,
}

struct Shared {
    url: String,
    session: Session,
    backoff: BackoffPolicy,
    connector: Arc<dyn Connector>,
    scheduler: Arc<dyn Scheduler>,
    link: Mutex<Link>,
    handler: Mutex<Option<Arc<dyn ConnectionHandler>>>,
}

enum CloseOutcome {
    Retry { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
    Stopped,
}

/// Keeps one relay connection alive for a session.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        session: Session,
        backoff: BackoffPolicy,
        connector: Arc<dyn Connector>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                session,
                backoff,
                connector,
                scheduler,
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    transport: None,
                    epoch: 0,
                    attempt: 0,
                    stopped: false,
                    reconnect: None,
                }),
                handler: Mutex::new(None),
            }),
        }
    }

    /// Install the receiver of inbound messages and events.
    pub fn set_handler(&self, handler: Arc<dyn ConnectionHandler>) {
        *self.shared.lock_handler() = Some(handler);
    }

    /// Open the connection unless it is already open or opening, or the
    /// manager was stopped. Blocks for at most the connect and handshake
    /// timeouts of the transport.
    pub fn connect(&self) {
        self.shared.connect();
    }

    /// Encode and write one message. Fails with `NotConnected` unless the
    /// connection is open.
    pub fn send(&self, message: &SyncMessage) -> Result<(), SendError> {
        let transport = {
            let link = self.shared.lock();
            match (&link.transport, link.state) {
                (Some(transport), ConnectionState::Open) => Arc::clone(transport),
                _ => return Err(SendError::NotConnected),
            }
        };
        let text = encode(message)?;
        transport.send_text(text)?;
        debug!(kind = message.kind(), "sent");
        Ok(())
    }

    /// Cancel any pending reconnect, close the transport, and refuse further
    /// use. Idempotent.
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Consecutive failed connection attempts since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.shared.lock().attempt
    }

    pub fn session(&self) -> &Session {
        &self.shared.session
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

impl Shared {
    fn connect(self: &Arc<Self>) {
        let attempt = {
            let mut link = self.lock();
            if link.stopped {
                debug!("connect ignored, manager stopped");
                return;
            }
            if matches!(
                link.state,
                ConnectionState::Connecting | ConnectionState::Open
            ) {
                debug!(state = link.state.as_str(), "connect ignored");
                return;
            }
            link.state = ConnectionState::Connecting;
            link.reconnect = None;
            link.attempt
        };
        self.notify(ConnectionEvent::StateChanged(ConnectionState::Connecting));
        info!(url = %self.url, attempt, "connecting to relay");

        let transport: Arc<dyn Transport> = match self.connector.open(&self.url) {
            Ok(transport) => Arc::from(transport),
            Err(err) => {
                warn!(url = %self.url, error = %err, "could not open relay connection");
                self.notify(ConnectionEvent::TransportError(err.to_string()));
                self.on_closed(None);
                return;
            }
        };

        let join = SyncMessage::Join {
            group_id: self.session.group_id.clone(),
            username: self.session.username.clone(),
        };
        let joined = encode(&join)
            .map_err(SendError::from)
            .and_then(|text| transport.send_text(text).map_err(SendError::from));
        if let Err(err) = joined {
            warn!(error = %err, "could not send join");
            transport.close();
            self.notify(ConnectionEvent::TransportError(err.to_string()));
            self.on_closed(None);
            return;
        }

        let epoch = {
            let mut link = self.lock();
            if link.stopped || link.state != ConnectionState::Connecting {
                drop(link);
                transport.close();
                return;
            }
            link.epoch += 1;
            link.state = ConnectionState::Open;
            link.attempt = 0;
            link.transport = Some(Arc::clone(&transport));
            link.epoch
        };
        info!(
            group = %self.session.group_id,
            user = %self.session.username,
            "joined group"
        );

        // Report `Open` before the reader exists, so a peer that hangs up at
        // once is always reported as `Open` then `Disconnected`.
        self.notify(ConnectionEvent::StateChanged(ConnectionState::Open));

        let shared = Arc::downgrade(self);
        thread::spawn(move || read_loop(shared, transport, epoch));
    }

    /// A connection ended. `epoch` is `None` for a failed open.
    fn on_closed(self: &Arc<Self>, epoch: Option<u64>) {
        let (closed, outcome) = {
            let mut link = self.lock();
            let closed = match epoch {
                Some(epoch) => {
                    if epoch != link.epoch {
                        return;
                    }
                    match link.transport.take() {
                        Some(transport) => Some(transport),
                        None => return,
                    }
                }
                None => {
                    if link.state != ConnectionState::Connecting {
                        return;
                    }
                    None
                }
            };
            link.state = ConnectionState::Disconnected;
            let outcome = if link.stopped {
                CloseOutcome::Stopped
            } else {
                link.attempt += 1;
                match self.backoff.delay_for(link.attempt) {
                    Some(delay) => {
                        let shared = Arc::downgrade(self);
                        link.reconnect = Some(self.scheduler.schedule(
                            delay,
                            Box::new(move || {
                                if let Some(shared) = shared.upgrade() {
                                    shared.connect();
                                }
                            }),
                        ));
                        CloseOutcome::Retry {
                            attempt: link.attempt,
                            delay,
                        }
                    }
                    None => CloseOutcome::Exhausted {
                        attempts: self.backoff.max_attempts,
                    },
                }
            };
            (closed, outcome)
        };

        if let Some(transport) = closed {
            transport.close();
        }
        self.notify(ConnectionEvent::StateChanged(ConnectionState::Disconnected));
        match outcome {
            CloseOutcome::Retry { attempt, delay } => {
                info!(attempt, delay_secs = delay.as_secs_f64(), "reconnect scheduled");
            }
            CloseOutcome::Exhausted { attempts } => {
                warn!(attempts, "giving up on the relay");
                self.notify(ConnectionEvent::Exhausted { attempts });
            }
            CloseOutcome::Stopped => {}
        }
    }

    fn stop(&self) {
        let transport = {
            let mut link = self.lock();
            if link.stopped {
                return;
            }
            link.stopped = true;
            link.reconnect = None;
            link.state = ConnectionState::Closing;
            link.transport.take()
        };
        self.notify(ConnectionEvent::StateChanged(ConnectionState::Closing));
        if let Some(transport) = transport {
            transport.close();
        }
        self.lock().state = ConnectionState::Disconnected;
        self.notify(ConnectionEvent::StateChanged(ConnectionState::Disconnected));
        self.lock_handler().take();
        info!("connection stopped");
    }

    fn dispatch(&self, bytes: &[u8]) {
        match decode(bytes) {
            Ok(message) => {
                debug!(kind = message.kind(), "received");
                if let Some(handler) = self.handler() {
                    handler.on_message(message);
                }
            }
            Err(DecodeError::UnknownKind(kind)) => {
                warn!(%kind, "dropping message of unknown kind");
            }
            Err(err) => {
                warn!(error = %err, "dropping malformed frame");
            }
        }
    }

    fn notify(&self, event: ConnectionEvent) {
        if let Some(handler) = self.handler() {
            handler.on_event(event);
        }
    }

    fn handler(&self) -> Option<Arc<dyn ConnectionHandler>> {
        self.lock_handler().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_handler(&self) -> MutexGuard<'_, Option<Arc<dyn ConnectionHandler>>> {
        self.handler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reader thread for one open connection. Exits when the transport closes or
/// the manager is gone, then reports the close for its epoch.
fn read_loop(shared: Weak<Shared>, transport: Arc<dyn Transport>, epoch: u64) {
    loop {
        match transport.recv() {
            Ok(Incoming::Frame(bytes)) => match shared.upgrade() {
                Some(shared) => shared.dispatch(&bytes),
                None => break,
            },
            Ok(Incoming::Idle) => {
                if shared.strong_count() == 0 {
                    break;
                }
            }
            Ok(Incoming::Closed) => {
                debug!(epoch, "relay connection closed");
                break;
            }
            Err(err) => {
                warn!(epoch, error = %err, "relay connection failed");
                if let Some(shared) = shared.upgrade() {
                    shared.notify(ConnectionEvent::TransportError(err.to_string()));
                }
                break;
            }
        }
    }
    if let Some(shared) = shared.upgrade() {
        shared.on_closed(Some(epoch));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::timer::ManualScheduler;
    use std::collections::VecDeque;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::time::Instant;
    use together_apart_protocol::{ChatMessage, SocketError};

    struct MockTransport {
        sent: Mutex<Vec<String>>,
        feed: Mutex<Sender<Incoming>>,
        inbound: Mutex<Receiver<Incoming>>,
        closed: AtomicBool,
        /// The peer is gone: reads see `Closed` but writes still succeed.
        hung_up: bool,
    }

    impl MockTransport {
        fn new(hung_up: bool) -> Arc<Self> {
            let (tx, rx) = mpsc::channel();
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                feed: Mutex::new(tx),
                inbound: Mutex::new(rx),
                closed: AtomicBool::new(false),
                hung_up,
            })
        }

        fn push(&self, incoming: Incoming) {
            self.feed.lock().unwrap().send(incoming).unwrap();
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl Transport for Arc<MockTransport> {
        fn send_text(&self, text: String) -> Result<(), TransportError> {
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            self.sent.lock().unwrap().push(text);
            Ok(())
        }

        fn recv(&self) -> Result<Incoming, TransportError> {
            if self.is_closed() || self.hung_up {
                return Ok(Incoming::Closed);
            }
            let inbound = self.inbound.lock().unwrap();
            Ok(inbound
                .recv_timeout(Duration::from_millis(5))
                .unwrap_or(Incoming::Idle))
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Lets a test hold an open in flight: the connector waits on `entered`
    /// once the open has started, then on `release` before finishing it.
    struct OpenGate {
        entered: Barrier,
        release: Barrier,
    }

    /// Opens mock transports; each open succeeds or fails per the script,
    /// falling back to `default_ok` once the script runs out.
    struct MockConnector {
        script: Mutex<VecDeque<bool>>,
        default_ok: bool,
        hang_up: AtomicBool,
        gate: Mutex<Option<Arc<OpenGate>>>,
        opened: Mutex<Vec<Arc<MockTransport>>>,
        attempts: Mutex<u32>,
    }

    impl MockConnector {
        fn new(script: &[bool], default_ok: bool) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                default_ok,
                hang_up: AtomicBool::new(false),
                gate: Mutex::new(None),
                opened: Mutex::new(Vec::new()),
                attempts: Mutex::new(0),
            })
        }

        /// Transports opened from now on lose their peer immediately.
        fn hang_up_on_open(&self) {
            self.hang_up.store(true, Ordering::SeqCst);
        }

        /// Block the next open until the returned gate is released.
        fn hold_next_open(&self) -> Arc<OpenGate> {
            let gate = Arc::new(OpenGate {
                entered: Barrier::new(2),
                release: Barrier::new(2),
            });
            *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
            gate
        }

        fn attempts(&self) -> u32 {
            *self.attempts.lock().unwrap()
        }

        fn transport(&self, index: usize) -> Arc<MockTransport> {
            Arc::clone(&self.opened.lock().unwrap()[index])
        }

        fn opened(&self) -> usize {
            self.opened.lock().unwrap().len()
        }
    }

    impl Connector for MockConnector {
        fn open(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
            *self.attempts.lock().unwrap() += 1;
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                gate.entered.wait();
                gate.release.wait();
            }
            let ok = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.default_ok);
            if !ok {
                return Err(SocketError::Unresolvable(url.to_owned()).into());
            }
            let transport = MockTransport::new(self.hang_up.load(Ordering::SeqCst));
            self.opened.lock().unwrap().push(Arc::clone(&transport));
            Ok(Box::new(transport))
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        messages: Mutex<Vec<SyncMessage>>,
        events: Mutex<Vec<ConnectionEvent>>,
    }

    impl RecordingHandler {
        fn messages(&self) -> Vec<SyncMessage> {
            self.messages.lock().unwrap().clone()
        }

        fn events(&self) -> Vec<ConnectionEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ConnectionHandler for RecordingHandler {
        fn on_message(&self, message: SyncMessage) {
            self.messages.lock().unwrap().push(message);
        }

        fn on_event(&self, event: ConnectionEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct Fixture {
        manager: ConnectionManager,
        connector: Arc<MockConnector>,
        scheduler: Arc<ManualScheduler>,
        handler: Arc<RecordingHandler>,
    }

    fn fixture(script: &[bool], default_ok: bool) -> Fixture {
        let connector = MockConnector::new(script, default_ok);
        let scheduler = Arc::new(ManualScheduler::new());
        let handler = Arc::new(RecordingHandler::default());
        let manager = ConnectionManager::new(
            "ws://relay.test/",
            Session {
                group_id: "g1".into(),
                username: "alice".into(),
            },
            BackoffPolicy::default(),
            connector.clone(),
            scheduler.clone(),
        );
        manager.set_handler(handler.clone());
        Fixture {
            manager,
            connector,
            scheduler,
            handler,
        }
    }

    fn wait_until(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|&s| Duration::from_secs(s)).collect()
    }

    const JOIN: &str = r#"{"type":"join","groupId":"g1","username":"alice"}"#;

    #[test]
    fn connect_sends_join_then_opens() {
        let f = fixture(&[], true);
        f.manager.connect();

        assert_eq!(f.manager.state(), ConnectionState::Open);
        assert_eq!(f.manager.attempt(), 0);
        assert_eq!(f.connector.transport(0).sent(), vec![JOIN.to_owned()]);
        assert_eq!(
            f.handler.events(),
            vec![
                ConnectionEvent::StateChanged(ConnectionState::Connecting),
                ConnectionEvent::StateChanged(ConnectionState::Open),
            ]
        );
    }

    #[test]
    fn connect_while_open_is_a_noop() {
        let f = fixture(&[], true);
        f.manager.connect();
        f.manager.connect();
        assert_eq!(f.connector.attempts(), 1);
        assert_eq!(f.connector.transport(0).sent().len(), 1);
    }

    #[test]
    fn connect_while_connecting_is_a_noop() {
        let f = fixture(&[], true);
        let gate = f.connector.hold_next_open();

        thread::scope(|scope| {
            let first = scope.spawn(|| f.manager.connect());
            gate.entered.wait();
            assert_eq!(f.manager.state(), ConnectionState::Connecting);
            f.manager.connect();
            gate.release.wait();
            first.join().unwrap();
        });

        assert_eq!(f.manager.state(), ConnectionState::Open);
        assert_eq!(f.connector.attempts(), 1);
        assert_eq!(f.connector.transport(0).sent(), vec![JOIN.to_owned()]);
    }

    #[test]
    fn reconnect_timer_and_explicit_connect_open_once() {
        let f = fixture(&[false], true);
        f.manager.connect();
        assert_eq!(f.scheduler.pending_delays(), secs(&[2]));
        let gate = f.connector.hold_next_open();

        thread::scope(|scope| {
            let timer = scope.spawn(|| f.scheduler.advance(Duration::from_secs(2)));
            gate.entered.wait();
            f.manager.connect();
            gate.release.wait();
            assert_eq!(timer.join().unwrap(), 1);
        });

        assert_eq!(f.manager.state(), ConnectionState::Open);
        assert_eq!(f.connector.attempts(), 2);
        assert_eq!(f.connector.opened(), 1);
        assert_eq!(f.connector.transport(0).sent(), vec![JOIN.to_owned()]);
    }

    #[test]
    fn immediate_hang_up_reports_open_before_disconnected() {
        for _ in 0..50 {
            let f = fixture(&[], true);
            f.connector.hang_up_on_open();
            f.manager.connect();

            wait_until("the close to be reported", || f.handler.events().len() >= 3);
            assert_eq!(f.manager.state(), ConnectionState::Disconnected);
            assert_eq!(f.scheduler.pending_delays(), secs(&[2]));
            assert_eq!(
                f.handler.events(),
                vec![
                    ConnectionEvent::StateChanged(ConnectionState::Connecting),
                    ConnectionEvent::StateChanged(ConnectionState::Open),
                    ConnectionEvent::StateChanged(ConnectionState::Disconnected),
                ]
            );
        }
    }

    #[test]
    fn backoff_runs_two_to_thirty_two_then_exhausts() {
        let f = fixture(&[], false);
        f.manager.connect();

        for delay in [2, 4, 8, 16, 32] {
            assert_eq!(f.scheduler.pending_delays(), secs(&[delay]));
            assert_eq!(f.scheduler.advance(Duration::from_secs(delay)), 1);
        }

        assert_eq!(f.scheduler.pending(), 0);
        assert_eq!(f.connector.attempts(), 6);
        assert_eq!(f.manager.state(), ConnectionState::Disconnected);
        let events = f.handler.events();
        assert_eq!(
            events.last(),
            Some(&ConnectionEvent::Exhausted { attempts: 5 })
        );
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ConnectionEvent::Exhausted { .. }))
                .count(),
            1
        );

        // Nothing further happens on its own.
        assert_eq!(f.scheduler.advance(Duration::from_secs(600)), 0);
        assert_eq!(f.connector.attempts(), 6);
    }

    #[test]
    fn successful_open_resets_attempts() {
        let f = fixture(&[false, false, true], false);
        f.manager.connect();
        assert_eq!(f.manager.attempt(), 1);
        f.scheduler.advance(Duration::from_secs(2));
        assert_eq!(f.manager.attempt(), 2);
        f.scheduler.advance(Duration::from_secs(4));
        assert_eq!(f.manager.state(), ConnectionState::Open);
        assert_eq!(f.manager.attempt(), 0);
        assert_eq!(f.scheduler.pending(), 0);
    }

    #[test]
    fn dropped_connection_reconnects_and_rejoins() {
        let f = fixture(&[], true);
        f.manager.connect();
        let first = f.connector.transport(0);

        first.push(Incoming::Closed);
        wait_until("reconnect to be scheduled", || {
            f.scheduler.pending_delays() == secs(&[2])
        });
        assert_eq!(f.manager.state(), ConnectionState::Disconnected);
        wait_until("old transport to close", || first.is_closed());

        f.scheduler.advance(Duration::from_secs(2));
        assert_eq!(f.manager.state(), ConnectionState::Open);
        assert_eq!(f.connector.opened(), 2);
        assert_eq!(f.connector.transport(1).sent(), vec![JOIN.to_owned()]);
    }

    #[test]
    fn send_requires_open_connection() {
        let f = fixture(&[], false);
        let message = SyncMessage::Notification { text: "hi".into() };
        assert!(matches!(
            f.manager.send(&message),
            Err(SendError::NotConnected)
        ));

        f.manager.connect();
        assert!(matches!(
            f.manager.send(&message),
            Err(SendError::NotConnected)
        ));
    }

    #[test]
    fn send_writes_encoded_message() {
        let f = fixture(&[], true);
        f.manager.connect();
        f.manager
            .send(&SyncMessage::sync(
                "g1",
                "alice",
                together_apart_protocol::PlaybackAction::Seek(42.3),
            ))
            .unwrap();
        let sent = f.connector.transport(0).sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1],
            r#"{"type":"sync","groupId":"g1","sender":"alice","action":"seek","time":42.3}"#
        );
    }

    #[test]
    fn bad_frames_are_dropped_and_good_ones_dispatched() {
        let f = fixture(&[], true);
        f.manager.connect();
        let transport = f.connector.transport(0);

        transport.push(Incoming::Frame(b"not json".to_vec()));
        transport.push(Incoming::Frame(br#"{"type":"dance","groupId":"g1"}"#.to_vec()));
        transport.push(Incoming::Frame(
            br#"{"type":"chat","groupId":"g1","sender":"bob","text":"hi","time":"20:15"}"#
                .to_vec(),
        ));

        wait_until("chat to be dispatched", || !f.handler.messages().is_empty());
        assert_eq!(
            f.handler.messages(),
            vec![SyncMessage::Chat(ChatMessage {
                group_id: "g1".into(),
                sender: "bob".into(),
                text: "hi".into(),
                time: "20:15".into(),
            })]
        );
        assert_eq!(f.manager.state(), ConnectionState::Open);
    }

    #[test]
    fn stop_cancels_pending_reconnect() {
        let f = fixture(&[], false);
        f.manager.connect();
        assert_eq!(f.scheduler.pending(), 1);

        f.manager.stop();
        assert_eq!(f.scheduler.pending(), 0);
        assert_eq!(f.scheduler.advance(Duration::from_secs(60)), 0);
        f.manager.connect();
        assert_eq!(f.connector.attempts(), 1);
    }

    #[test]
    fn stop_closes_open_connection_without_reconnecting() {
        let f = fixture(&[], true);
        f.manager.connect();
        let transport = f.connector.transport(0);

        f.manager.stop();
        assert!(transport.is_closed());
        assert_eq!(f.manager.state(), ConnectionState::Disconnected);
        let events = f.handler.events();
        assert_eq!(
            events[events.len() - 2..],
            [
                ConnectionEvent::StateChanged(ConnectionState::Closing),
                ConnectionEvent::StateChanged(ConnectionState::Disconnected),
            ]
        );
        assert!(matches!(
            f.manager.send(&SyncMessage::Notification { text: "x".into() }),
            Err(SendError::NotConnected)
        ));

        // Give the reader time to notice; it must not schedule a reconnect.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(f.scheduler.pending(), 0);
    }
}
