//! Error types for the playtime daemon binary.
//!
//! [`DaemonError`] covers the startup failures that make running the
//! service pointless. Everything after startup is logged and survived.

/// Top-level error for the daemon binary.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: playtime_core::ConfigError,
    },

    /// The query API could not bind.
    #[error("query API error: {source}")]
    Api {
        /// The underlying startup error.
        #[from]
        source: playtime_api::startup::StartupError,
    },

    /// Installing a signal handler failed.
    #[error("signal handler error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
