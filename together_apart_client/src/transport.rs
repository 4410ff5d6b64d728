// Transport seam between the connection manager and the network.
//
// `Connector` opens a connection; `Transport` is one open connection. The
// manager only ever talks to these traits, so its reconnect and epoch logic
// can be exercised with an in-memory transport in tests, while production
// code uses `WsConnector`, which opens a tungstenite `FrameSocket` over TCP.
//
// A `Transport` is shared between the reader thread (sitting in `recv`) and
// whichever thread calls `send_text`, so it must be `Send + Sync` and `recv`
// must return within a bounded time (`Incoming::Idle`) rather than block
// forever.

use std::net::TcpStream;

use together_apart_protocol::socket;
use together_apart_protocol::{FrameSocket, Incoming, SocketTimeouts};

use crate::error::TransportError;

/// One open connection to the relay.
pub trait Transport: Send + Sync {
    fn send_text(&self, text: String) -> Result<(), TransportError>;
    /// Wait a bounded time for the next inbound frame.
    fn recv(&self) -> Result<Incoming, TransportError>;
    /// Close the connection. Idempotent; a blocked `recv` returns `Closed`
    /// within one poll interval.
    fn close(&self);
}

/// Opens transports to a relay URL.
pub trait Connector: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}

impl Transport for FrameSocket<TcpStream> {
    fn send_text(&self, text: String) -> Result<(), TransportError> {
        FrameSocket::send_text(self, text).map_err(TransportError::from)
    }

    fn recv(&self) -> Result<Incoming, TransportError> {
        FrameSocket::recv(self).map_err(TransportError::from)
    }

    fn close(&self) {
        FrameSocket::close(self);
    }
}

/// Connects over plain `ws://` WebSocket.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector {
    pub timeouts: SocketTimeouts,
}

impl WsConnector {
    pub fn new(timeouts: SocketTimeouts) -> Self {
        Self { timeouts }
    }
}

impl Connector for WsConnector {
    fn open(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        let socket = socket::connect(url, &self.timeouts)?;
        Ok(Box::new(socket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn ws_connector_reaches_a_websocket_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let socket = socket::accept(stream, &SocketTimeouts::default()).unwrap();
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if let Incoming::Frame(bytes) = socket.recv().unwrap() {
                    return bytes;
                }
            }
            panic!("no frame received");
        });

        let transport = WsConnector::default()
            .open(&format!("ws://{addr}/"))
            .unwrap();
        transport.send_text("ping".into()).unwrap();
        assert_eq!(server.join().unwrap(), b"ping");
        transport.close();
        assert_eq!(transport.recv().unwrap(), Incoming::Closed);
    }

    #[test]
    fn ws_connector_reports_refused_connection() {
        // Bind then drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let result = WsConnector::default().open(&format!("ws://{addr}/"));
        assert!(matches!(result, Err(TransportError::Socket(_))));
    }
}
