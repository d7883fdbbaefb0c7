//! Loopback transport for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels to simulate a backend
//! connection. Created via [`create_pair`], which returns a client-side
//! [`LoopbackTransport`] plus a [`LoopbackServer`] handle the test drives:
//! frames the client sends arrive at the server handle, and frames pushed
//! into the server handle arrive at the client.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};

use super::{Connector, Transport, TransportError};

/// In-process transport backed by `tokio::sync::mpsc` channels.
pub struct LoopbackTransport {
    /// Sender for outgoing frames (delivers to the server handle).
    tx: mpsc::Sender<String>,
    /// Receiver for incoming frames (fed by the server handle).
    rx: Mutex<mpsc::Receiver<String>>,
    /// Shared open flag; cleared by either side's close.
    open: Arc<AtomicBool>,
}

/// Test-side handle for one loopback connection.
pub struct LoopbackServer {
    /// Sender for frames delivered to the client; dropped on close.
    tx: Option<mpsc::Sender<String>>,
    /// Receiver of frames the client sent.
    rx: mpsc::Receiver<String>,
    open: Arc<AtomicBool>,
}

/// Create a connected loopback transport and its server-side handle.
///
/// The `buffer` parameter controls the channel capacity for each direction.
#[must_use]
pub fn create_pair(buffer: usize) -> (LoopbackTransport, LoopbackServer) {
    let (client_tx, server_rx) = mpsc::channel(buffer);
    let (server_tx, client_rx) = mpsc::channel(buffer);
    let open = Arc::new(AtomicBool::new(true));

    let transport = LoopbackTransport {
        tx: client_tx,
        rx: Mutex::new(client_rx),
        open: Arc::clone(&open),
    };
    let server = LoopbackServer {
        tx: Some(server_tx),
        rx: server_rx,
        open,
    };
    (transport, server)
}

impl LoopbackServer {
    /// Deliver a frame to the client. Returns `false` once the connection
    /// is closed on either side.
    pub async fn push(&self, frame: impl Into<String>) -> bool {
        match &self.tx {
            Some(tx) => tx.send(frame.into()).await.is_ok(),
            None => false,
        }
    }

    /// Receive the next frame the client sent.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Receive a frame the client already sent, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Simulate a server-side close: the client's reads end and its sends
    /// start failing.
    pub fn close(&mut self) {
        self.open.store(false, Ordering::Relaxed);
        self.tx.take();
    }

    /// Whether the client has closed its side.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}

impl Transport for LoopbackTransport {
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }
        self.tx
            .send(frame.to_owned())
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(frame) if self.open.load(Ordering::Relaxed) => Ok(frame),
            _ => Err(TransportError::ConnectionClosed),
        }
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed) && !self.tx.is_closed()
    }
}

/// Connector that yields a fresh loopback pair on every dial.
///
/// Server handles for each dialed connection arrive on the receiver
/// returned by [`LoopbackConnector::new`], in dial order, which lets tests
/// drive connect→disconnect→connect cycles.
pub struct LoopbackConnector {
    buffer: usize,
    server_handles: mpsc::UnboundedSender<LoopbackServer>,
}

impl LoopbackConnector {
    /// Creates a connector and the stream of server handles it will emit.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, mpsc::UnboundedReceiver<LoopbackServer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                buffer,
                server_handles: tx,
            },
            rx,
        )
    }
}

impl Connector for LoopbackConnector {
    type Conn = LoopbackTransport;

    async fn dial(&self) -> Result<LoopbackTransport, TransportError> {
        let (transport, server) = create_pair(self.buffer);
        self.server_handles
            .send(server)
            .map_err(|_| TransportError::ConnectionClosed)?;
        Ok(transport)
    }
}
