//! `WireChat` test backend library.
//!
//! An axum server speaking the chat backend's two surfaces: the `/ws`
//! WebSocket endpoint with JSON envelopes, and the `/api` REST tree for
//! history, search, read acknowledgments, and token refresh. State is
//! seeded in-process, so integration tests can drive the real client
//! against a deterministic world.

use std::sync::Arc;

pub mod rest;
pub mod state;
pub mod ws;

pub use state::BackendState;

/// Starts the backend on the given address and returns the bound address
/// and a join handle.
///
/// Bind to `127.0.0.1:0` for an OS-assigned port in tests.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
    state: Arc<BackendState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws::upgrade))
        .nest("/api", rest::router())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "test backend server error");
        }
    });

    Ok((bound_addr, handle))
}
