// WebSocket frame socket shared by the watch client and the relay.
//
// `FrameSocket` wraps a tungstenite `WebSocket` so that one thread can sit in
// a read loop while other threads send. tungstenite's socket is a single
// object for both directions, so it lives behind a mutex and the underlying
// TCP stream is given a short read timeout (`SocketTimeouts::poll`). A read
// that times out releases the lock and reports `Incoming::Idle`, which is the
// reader's chance to check its own stop conditions. Senders announce
// themselves through `writers_waiting` so a busy reader yields the lock
// instead of starving them. Every wait is therefore bounded: a send waits at
// most one poll interval for the lock plus the write timeout.
//
// `connect` and `accept` perform the client and server handshakes over plain
// TCP (`ws://` only; TLS termination is left to a fronting proxy) and apply
// the size limits and timeouts every socket in the system uses.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use tungstenite::client::IntoClientRequest;
use tungstenite::protocol::WebSocketConfig;
use tungstenite::{Message, WebSocket};

/// Maximum accepted message size (1 MB). Chat and sync messages are a few
/// hundred bytes; anything near this limit is garbage or abuse.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Timeouts applied to every socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketTimeouts {
    /// TCP connect timeout (client side).
    pub connect: Duration,
    /// Read/write timeout while the WebSocket handshake is in progress.
    pub handshake: Duration,
    /// Read timeout of the established socket; the reader's polling interval.
    pub poll: Duration,
    /// Write timeout of the established socket.
    pub write: Duration,
}

impl Default for SocketTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            handshake: Duration::from_secs(5),
            poll: Duration::from_millis(25),
            write: Duration::from_secs(5),
        }
    }
}

/// Socket-level failure.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("invalid relay url `{0}`")]
    InvalidUrl(String),
    #[error("unsupported url scheme in `{0}` (only ws:// is supported)")]
    UnsupportedScheme(String),
    #[error("could not resolve `{0}`")]
    Unresolvable(String),
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("socket is closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    WebSocket(#[from] tungstenite::Error),
}

/// Result of one read attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Incoming {
    /// A complete text or binary message.
    Frame(Vec<u8>),
    /// Nothing arrived within the poll interval.
    Idle,
    /// The peer closed the connection, or `close` was called locally.
    Closed,
}

/// A WebSocket that can be read from one thread while others write to it.
pub struct FrameSocket<S: Read + Write> {
    socket: Mutex<WebSocket<S>>,
    writers_waiting: AtomicUsize,
    closed: AtomicBool,
}

impl<S: Read + Write> FrameSocket<S> {
    /// Wrap an established socket. The stream underneath should already have
    /// a read timeout set, otherwise `recv` blocks until data arrives and
    /// senders wait with it.
    pub fn new(socket: WebSocket<S>) -> Self {
        Self {
            socket: Mutex::new(socket),
            writers_waiting: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Send one text message.
    pub fn send_text(&self, text: String) -> Result<(), SocketError> {
        if self.is_closed() {
            return Err(SocketError::Closed);
        }
        self.writers_waiting.fetch_add(1, Ordering::SeqCst);
        let mut socket = self.lock();
        self.writers_waiting.fetch_sub(1, Ordering::SeqCst);
        socket.send(Message::Text(text)).map_err(|err| match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                SocketError::Closed
            }
            other => SocketError::WebSocket(other),
        })
    }

    /// Wait up to one poll interval for the next message.
    pub fn recv(&self) -> Result<Incoming, SocketError> {
        if self.is_closed() {
            return Ok(Incoming::Closed);
        }
        while self.writers_waiting.load(Ordering::SeqCst) > 0 {
            thread::yield_now();
        }
        let result = self.lock().read();
        match result {
            Ok(Message::Text(text)) => Ok(Incoming::Frame(text.into_bytes())),
            Ok(Message::Binary(data)) => Ok(Incoming::Frame(data)),
            Ok(Message::Close(frame)) => {
                debug!(?frame, "peer sent close frame");
                Ok(Incoming::Closed)
            }
            // Ping/pong are answered by tungstenite itself.
            Ok(_) => Ok(Incoming::Idle),
            Err(tungstenite::Error::Io(err)) if is_timeout(&err) => Ok(Incoming::Idle),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(Incoming::Closed)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Start the closing handshake. Idempotent; later `recv` calls report
    /// `Closed` and later sends fail.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut socket = self.lock();
        let _ = socket.close(None);
        let _ = socket.flush();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, WebSocket<S>> {
        self.socket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn socket_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_MESSAGE_SIZE);
    config.max_frame_size = Some(MAX_MESSAGE_SIZE);
    config
}

/// Open a client connection to a `ws://` URL.
pub fn connect(url: &str, timeouts: &SocketTimeouts) -> Result<FrameSocket<TcpStream>, SocketError> {
    let request = url
        .into_client_request()
        .map_err(|_| SocketError::InvalidUrl(url.to_owned()))?;
    let uri = request.uri();
    if uri.scheme_str() != Some("ws") {
        return Err(SocketError::UnsupportedScheme(url.to_owned()));
    }
    let host = uri
        .host()
        .ok_or_else(|| SocketError::InvalidUrl(url.to_owned()))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_owned();
    let port = uri.port_u16().unwrap_or(80);
    let addr = (host.as_str(), port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| SocketError::Unresolvable(format!("{host}:{port}")))?;

    let stream = TcpStream::connect_timeout(&addr, timeouts.connect)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(timeouts.handshake))?;
    stream.set_write_timeout(Some(timeouts.handshake))?;

    let (socket, _response) = tungstenite::client::client_with_config(request, stream, Some(socket_config()))
        .map_err(|err| SocketError::Handshake(err.to_string()))?;
    socket.get_ref().set_read_timeout(Some(timeouts.poll))?;
    socket.get_ref().set_write_timeout(Some(timeouts.write))?;
    Ok(FrameSocket::new(socket))
}

/// Perform the server side of the handshake on an accepted TCP stream.
pub fn accept(stream: TcpStream, timeouts: &SocketTimeouts) -> Result<FrameSocket<TcpStream>, SocketError> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(timeouts.handshake))?;
    stream.set_write_timeout(Some(timeouts.handshake))?;
    let socket = tungstenite::accept_with_config(stream, Some(socket_config()))
        .map_err(|err| SocketError::Handshake(err.to_string()))?;
    socket.get_ref().set_read_timeout(Some(timeouts.poll))?;
    socket.get_ref().set_write_timeout(Some(timeouts.write))?;
    Ok(FrameSocket::new(socket))
}
