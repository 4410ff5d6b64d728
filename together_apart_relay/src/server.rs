// WebSocket server and main event loop for the relay.
//
// Architecture: thread-per-connection readers with a central `mpsc` channel.
//
// - **Listener thread** (non-blocking `TcpListener::accept()` loop): assigns
//   each new connection a `ClientId` and spawns a connection thread for it.
// - **Connection threads** (one per client): perform the WebSocket handshake,
//   wait for the first frame, which must be a `join`, and report it as
//   `InternalEvent::Joined`. They then stay on as the client's reader,
//   sending `InternalEvent::FrameFrom` for every frame and
//   `InternalEvent::Disconnected` when the socket closes or fails. A first
//   frame that is not JSON, or not a join, closes the connection.
// - **Main thread**: owns the `GroupRegistry`, receives events from the
//   channel, and dispatches them. Uses `recv_timeout` so it can notice the
//   `keep_running` flag even when no client is talking.
//
// The main thread is the only writer to client sockets (through the
// registry). Connection threads only read. `FrameSocket` would allow either,
// but a single writer keeps message order per client trivially correct.
//
// Shutdown: `RelayHandle::stop` clears `keep_running`; the main loop exits,
// closes every member socket, and the reader threads see `Closed` within one
// poll interval.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use together_apart_protocol::socket;
use together_apart_protocol::{FrameSocket, Incoming, SocketTimeouts};

use crate::groups::{ClientId, GroupRegistry, Outlet, RelayError};

/// How long the main loop waits for an event before re-checking
/// `keep_running`.
const MAIN_LOOP_TICK: Duration = Duration::from_millis(50);

/// How long the listener sleeps when no connection is pending.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);

/// Events sent from listener/connection threads to the main thread.
enum InternalEvent {
    Joined {
        id: ClientId,
        socket: Arc<FrameSocket<TcpStream>>,
        group_id: Option<String>,
        username: Option<String>,
    },
    FrameFrom {
        id: ClientId,
        frame: Vec<u8>,
    },
    Disconnected {
        id: ClientId,
    },
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        self.join();
    }

    /// Block until the relay exits on its own.
    pub fn wait(mut self) {
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("relay main loop panicked");
            }
        }
    }
}

/// Configuration for starting a relay server.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub timeouts: SocketTimeouts,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8765,
            timeouts: SocketTimeouts::default(),
        }
    }
}

/// Start the relay on background threads. Returns a handle for stopping it
/// and the actual bound address (useful when port 0 is used to let the OS
/// pick a free port).
pub fn start_relay(config: RelayConfig) -> io::Result<(RelayHandle, SocketAddr)> {
    let listener = TcpListener::bind((config.host.as_str(), config.port))?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;
    let keep_running = Arc::new(AtomicBool::new(true));

    let (tx, rx) = mpsc::channel();
    {
        let keep_running = Arc::clone(&keep_running);
        let timeouts = config.timeouts;
        thread::spawn(move || accept_loop(listener, timeouts, tx, keep_running));
    }
    let thread = {
        let keep_running = Arc::clone(&keep_running);
        thread::spawn(move || run_relay(rx, keep_running))
    };
    info!(%addr, "relay listening");

    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Main relay loop. Runs until `keep_running` is set to false.
fn run_relay(rx: Receiver<InternalEvent>, keep_running: Arc<AtomicBool>) {
    let mut registry = GroupRegistry::new();
    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(MAIN_LOOP_TICK) {
            Ok(event) => {
                handle_event(&mut registry, event);
                // Drain any additional events that arrived during handling.
                while let Ok(event) = rx.try_recv() {
                    handle_event(&mut registry, event);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!(clients = registry.member_count(), "relay shutting down");
    registry.shutdown();
}

/// Dispatch a single event to the registry.
fn handle_event(registry: &mut GroupRegistry, event: InternalEvent) {
    match event {
        InternalEvent::Joined {
            id,
            socket,
            group_id,
            username,
        } => {
            let outlet: Arc<dyn Outlet> = socket.clone();
            if let Err(err) = registry.register(id, group_id.as_deref(), username.as_deref(), outlet) {
                warn!(client = %id, error = %err, "join refused, closing");
                socket.close();
            }
        }
        InternalEvent::FrameFrom { id, frame } => match registry.relay(id, &frame) {
            Ok(count) => debug!(client = %id, recipients = count, "frame relayed"),
            Err(RelayError::UnknownKind(kind)) => {
                warn!(client = %id, %kind, "ignoring message of unknown type");
            }
            Err(err) => warn!(client = %id, error = %err, "ignoring frame"),
        },
        InternalEvent::Disconnected { id } => registry.unregister(id),
    }
}

/// Listener thread: accept connections and hand each to its own thread.
fn accept_loop(
    listener: TcpListener,
    timeouts: SocketTimeouts,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    let mut next_id = 0u64;
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let id = ClientId(next_id);
                next_id += 1;
                debug!(client = %id, %peer, "connection accepted");
                let tx = tx.clone();
                let keep_running = Arc::clone(&keep_running);
                thread::spawn(move || serve_connection(id, stream, timeouts, tx, keep_running));
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_BACKOFF);
            }
            Err(err) => {
                error!(error = %err, "accept failed, listener exiting");
                break;
            }
        }
    }
}

/// Connection thread: handshake, join, then read until the client goes away.
fn serve_connection(
    id: ClientId,
    stream: TcpStream,
    timeouts: SocketTimeouts,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    if let Err(err) = stream.set_nonblocking(false) {
        warn!(client = %id, error = %err, "could not configure stream");
        return;
    }
    let socket = match socket::accept(stream, &timeouts) {
        Ok(socket) => Arc::new(socket),
        Err(err) => {
            debug!(client = %id, error = %err, "handshake failed");
            return;
        }
    };

    let Some(first) = first_frame(&socket, timeouts.handshake, &keep_running) else {
        debug!(client = %id, "no join received");
        socket.close();
        return;
    };
    let join: Value = match serde_json::from_slice(&first) {
        Ok(value) => value,
        Err(err) => {
            warn!(client = %id, error = %err, "first message is not JSON, closing");
            socket.close();
            return;
        }
    };
    if join.get("type").and_then(Value::as_str) != Some("join") {
        warn!(client = %id, "first message was not a join, closing");
        socket.close();
        return;
    }
    let field = |name: &str| join.get(name).and_then(Value::as_str).map(str::to_owned);
    let joined = InternalEvent::Joined {
        id,
        socket: Arc::clone(&socket),
        group_id: field("groupId"),
        username: field("username"),
    };
    if tx.send(joined).is_err() {
        socket.close();
        return;
    }

    while keep_running.load(Ordering::SeqCst) {
        match socket.recv() {
            Ok(Incoming::Frame(frame)) => {
                if tx.send(InternalEvent::FrameFrom { id, frame }).is_err() {
                    break;
                }
            }
            Ok(Incoming::Idle) => {}
            Ok(Incoming::Closed) => break,
            Err(err) => {
                debug!(client = %id, error = %err, "read failed");
                break;
            }
        }
    }
    socket.close();
    let _ = tx.send(InternalEvent::Disconnected { id });
}

/// Wait up to `timeout` for the first frame on a fresh connection.
fn first_frame(
    socket: &FrameSocket<TcpStream>,
    timeout: Duration,
    keep_running: &AtomicBool,
) -> Option<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline && keep_running.load(Ordering::SeqCst) {
        match socket.recv() {
            Ok(Incoming::Frame(frame)) => return Some(frame),
            Ok(Incoming::Idle) => {}
            Ok(Incoming::Closed) | Err(_) => return None,
        }
    }
    None
}
