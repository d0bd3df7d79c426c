//! Query API startup helper for embedding in the daemon.
//!
//! [`spawn_api`] binds the socket on the caller's task, so a port clash
//! fails startup, and then serves on a background Tokio task.
//!
//! # Usage
//!
//! ```rust,ignore
//! use playtime_api::{spawn_api, AppState, ServerConfig};
//! use std::sync::Arc;
//!
//! let state = Arc::new(AppState::new(store, clock));
//! let handle = spawn_api(&ServerConfig::default(), state, token).await?;
//! // Cancel the token to stop serving, then await the handle.
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::server::{self, ServerConfig, ServerError};
use crate::state::AppState;

/// Errors that can occur when spawning the query API server.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// Bind the query API and serve it on a background task.
///
/// The returned handle completes once `token` is cancelled and in-flight
/// requests have drained.
///
/// # Errors
///
/// Returns [`StartupError::Server`] if the address is invalid or already
/// in use.
pub async fn spawn_api(
    config: &ServerConfig,
    state: Arc<AppState>,
    token: CancellationToken,
) -> Result<JoinHandle<()>, StartupError> {
    let listener = server::bind(config).await?;

    let handle = tokio::spawn(async move {
        if let Err(e) = server::serve(listener, state, token).await {
            tracing::error!(error = %e, "query API exited with error");
        }
    });

    tracing::info!(port = config.port, "query API spawned on background task");

    Ok(handle)
}
