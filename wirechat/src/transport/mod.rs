//! Transport layer abstraction for `WireChat`.
//!
//! Defines the [`Transport`] trait for an established frame connection and
//! the [`Connector`] trait for dialing one. Concrete implementations:
//! - [`ws::WsTransport`] — WebSocket connection to a chat backend
//! - [`loopback::LoopbackTransport`] — in-process channel-based transport for testing

pub mod loopback;
pub mod ws;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The endpoint could not be reached.
    #[error("endpoint {0} is unreachable")]
    Unreachable(String),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Async transport trait for an established bidirectional frame connection.
///
/// Implementations carry opaque text frames. The transport never inspects
/// frame contents — envelope encoding and event demultiplexing happen at
/// higher layers.
pub trait Transport: Send + Sync + 'static {
    /// Hand one text frame to the underlying connection.
    ///
    /// Returns `Ok(())` when the frame has been handed off. This does NOT
    /// guarantee delivery — the caller must wait for an application-level
    /// acknowledgment.
    fn send(
        &self,
        frame: &str,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Receive the next text frame.
    ///
    /// Blocks asynchronously until a frame arrives or the connection ends.
    fn recv(&self) -> impl std::future::Future<Output = Result<String, TransportError>> + Send;

    /// Close the connection. Safe to call more than once.
    fn close(&self) -> impl std::future::Future<Output = ()> + Send;

    /// Whether the connection is currently open.
    fn is_open(&self) -> bool;
}

/// Dials new [`Transport`] connections.
///
/// The connection manager is generic over this seam, so tests substitute
/// [`loopback::LoopbackConnector`] for the real WebSocket dialer.
pub trait Connector: Send + Sync + 'static {
    /// The connection type this connector produces.
    type Conn: Transport;

    /// Establish a new connection to the configured endpoint.
    fn dial(
        &self,
    ) -> impl std::future::Future<Output = Result<Self::Conn, TransportError>> + Send;
}
