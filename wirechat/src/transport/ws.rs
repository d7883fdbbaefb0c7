//! WebSocket transport for WireChat.
//!
//! Implements the [`Transport`] trait over a WebSocket connection to the
//! chat backend. Frames are JSON text; binary and keepalive frames are not
//! part of the contract and are ignored.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Connector, Transport, TransportError};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for establishing the WebSocket connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket transport implementing the [`Transport`] trait.
///
/// Created via [`WsTransport::connect`], which establishes the connection
/// and spawns a background reader task feeding an internal channel.
pub struct WsTransport {
    /// The backend URL (ws:// or wss://).
    url: String,
    /// Write half of the WebSocket connection (shared for concurrent sends).
    ws_sender: Arc<Mutex<WsSender>>,
    /// Channel of text frames pushed by the background reader task.
    incoming: Mutex<mpsc::Receiver<String>>,
    /// Whether the WebSocket connection is active.
    open: Arc<AtomicBool>,
    /// Handle to the background reader task.
    reader_handle: tokio::task::JoinHandle<()>,
}

impl WsTransport {
    /// Connect to a chat backend WebSocket endpoint.
    ///
    /// Establishes the connection within [`CONNECT_TIMEOUT`] and spawns a
    /// background task that reads incoming frames.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if the connection does not establish in time.
    /// - [`TransportError::Unreachable`] if the URL cannot be resolved or connected.
    /// - [`TransportError::Io`] for TLS failures and other handshake errors.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        // Step 1: Connect to the WebSocket URL with a timeout.
        let (ws_stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url = url, "WebSocket connect timed out");
                TransportError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url = url, err = %e, "WebSocket connect failed");
                map_ws_connect_error(url, e)
            })?;

        // Step 2: Split into write and read halves.
        let (ws_sender, ws_reader) = ws_stream.split();

        // Step 3: Spawn the background reader task.
        let (tx, rx) = mpsc::channel(256);
        let open = Arc::new(AtomicBool::new(true));
        let reader_open = Arc::clone(&open);

        let reader_handle = tokio::spawn(reader_loop(ws_reader, tx, reader_open));

        Ok(Self {
            url: url.to_string(),
            ws_sender: Arc::new(Mutex::new(ws_sender)),
            incoming: Mutex::new(rx),
            open,
            reader_handle,
        })
    }

    /// The backend URL this transport is connected to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for WsTransport {
    /// Send one text frame over the WebSocket.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the connection is
    /// down or the send fails; a failed send marks the transport closed.
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut sender = self.ws_sender.lock().await;
        sender.send(Message::Text(frame.into())).await.map_err(|e| {
            tracing::warn!(err = %e, "WebSocket send failed");
            self.open.store(false, Ordering::Relaxed);
            TransportError::ConnectionClosed
        })?;

        Ok(())
    }

    /// Receive the next text frame from the backend.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the connection has
    /// ended and all buffered frames were drained.
    async fn recv(&self) -> Result<String, TransportError> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    /// Close the connection: sends a Close frame and stops the reader.
    async fn close(&self) {
        if !self.open.swap(false, Ordering::Relaxed) {
            return;
        }
        let mut sender = self.ws_sender.lock().await;
        let _ = sender.send(Message::Close(None)).await;
        self.reader_handle.abort();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}

/// Connector that dials a fixed WebSocket URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Creates a connector for the given ws:// or wss:// URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The URL this connector dials.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    type Conn = WsTransport;

    async fn dial(&self) -> Result<WsTransport, TransportError> {
        WsTransport::connect(&self.url).await
    }
}

/// Background task that reads WebSocket messages and forwards text frames.
///
/// Malformed or unexpected frames are skipped — the task only exits when
/// the connection closes, errors out, or the transport is dropped. Sets
/// `open` to `false` on exit.
async fn reader_loop(mut ws_reader: WsReader, tx: mpsc::Sender<String>, open: Arc<AtomicBool>) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                if tx.send(text.to_string()).await.is_err() {
                    // Receiver dropped — transport was dropped, exit.
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                tracing::info!("WebSocket closed by server");
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => {
                // Keepalives and binary frames are not part of the contract.
            }
            Ok(Message::Frame(_)) => {
                // Raw frames never surface from a read loop.
            }
            Err(e) => {
                tracing::warn!(err = %e, "WebSocket read error");
                break;
            }
        }
    }
    open.store(false, Ordering::Relaxed);
    tracing::debug!("WebSocket reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            // Refused ports and dead addresses mean the backend is not there.
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Unreachable(url.to_owned())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Tls(_) => {
            TransportError::Io(std::io::Error::other(format!("TLS error: {err}")))
        }
        WsError::Http(response) => TransportError::Io(std::io::Error::other(format!(
            "backend HTTP error: status {}",
            response.status()
        ))),
        other => TransportError::Io(std::io::Error::other(format!(
            "connection error: {other}"
        ))),
    }
}
