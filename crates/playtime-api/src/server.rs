//! Query API server lifecycle management.
//!
//! [`bind`] resolves and binds the listening socket; [`serve`] runs the
//! Axum server on it until the [`CancellationToken`] is cancelled, then
//! drains in-flight requests. [`start_server`] does both.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// Configuration for the query API server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The host address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// The TCP port to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            port: 5000,
        }
    }
}

impl ServerConfig {
    /// Parse `host:port` into a socket address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address is not valid.
    pub fn socket_addr(&self) -> Result<SocketAddr, ServerError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ServerError::Bind(format!("invalid address: {e}")))
    }
}

/// Bind the listening socket for `config`.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is invalid or in use.
pub async fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let addr = config.socket_addr()?;
    TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))
}

/// Serve requests on `listener` until `token` is cancelled.
///
/// # Errors
///
/// Returns [`ServerError::Serve`] if the server hits a fatal I/O error.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    token: CancellationToken,
) -> Result<(), ServerError> {
    let router = build_router(state);
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "query API listening");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .map_err(|e| ServerError::Serve(format!("serve error: {e}")))?;

    info!("query API stopped");
    Ok(())
}

/// Bind and serve until `token` is cancelled.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind or the server
/// encounters a fatal I/O error.
pub async fn start_server(
    config: &ServerConfig,
    state: Arc<AppState>,
    token: CancellationToken,
) -> Result<(), ServerError> {
    let listener = bind(config).await?;
    serve(listener, state, token).await
}

/// Errors that can occur when starting or running the query API server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}
