//! Read-only HTTP query API for the playtime tracker.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **`GET /`** -- number of players online and every known identifier
//! - **`GET /{steamID}`** -- one player's presence, playtime, and profiles
//!
//! # Architecture
//!
//! Handlers take the read side of the shared
//! [`SharedStore`](playtime_core::SharedStore) lock, so a query sees either
//! none or all of an event batch. The per-player body is produced by the
//! same encoder as the snapshot file, so both use one schema.
//!
//! The server stops gracefully when the process-wide cancellation token is
//! cancelled.

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod startup;
pub mod state;

// Re-export primary types for convenience.
pub use error::ApiError;
pub use router::build_router;
pub use server::{start_server, ServerConfig, ServerError};
pub use startup::spawn_api;
pub use state::AppState;
