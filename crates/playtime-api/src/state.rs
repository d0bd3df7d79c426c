//! Shared application state for the query API.

use std::sync::Arc;

use playtime_core::{Clock, SharedStore};

/// State handed to every handler.
///
/// Holds the store lock and the clock used to derive live `ontime` and
/// `offtime` values at request time.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The authoritative entity store.
    pub store: SharedStore,
    /// Time source for live values.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Create state over an existing store and clock.
    pub fn new(store: SharedStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}
