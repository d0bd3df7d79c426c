//! Presence events and the source trait that produces them.
//!
//! An [`EventSource`] turns whatever the game server emits (log lines in
//! production) into discrete [`PresenceEvent`]s. How it does that is
//! entirely its own concern; the poller only asks for the events that
//! appeared since the previous call.
//!
//! [`ScriptedEventSource`] replays pre-built batches and is used to drive
//! the poller in tests.

use std::collections::VecDeque;

use crate::entity::SteamId;

/// A connect or disconnect reported by the game server.
///
/// `profile` names the character involved when the source knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// A player (and optionally one of their characters) came online.
    Connect {
        /// The player.
        steam_id: SteamId,
        /// Character name, when known.
        profile: Option<String>,
    },
    /// A player (and optionally one of their characters) went offline.
    Disconnect {
        /// The player.
        steam_id: SteamId,
        /// Character name, when known.
        profile: Option<String>,
    },
}

impl PresenceEvent {
    /// Shorthand for a [`PresenceEvent::Connect`].
    pub fn connect(steam_id: impl Into<SteamId>, profile: Option<&str>) -> Self {
        Self::Connect {
            steam_id: steam_id.into(),
            profile: profile.map(str::to_owned),
        }
    }

    /// Shorthand for a [`PresenceEvent::Disconnect`].
    pub fn disconnect(steam_id: impl Into<SteamId>, profile: Option<&str>) -> Self {
        Self::Disconnect {
            steam_id: steam_id.into(),
            profile: profile.map(str::to_owned),
        }
    }

    /// The player this event is about.
    pub const fn steam_id(&self) -> &SteamId {
        match self {
            Self::Connect { steam_id, .. } | Self::Disconnect { steam_id, .. } => steam_id,
        }
    }

    /// The character this event is about, if named.
    pub fn profile(&self) -> Option<&str> {
        match self {
            Self::Connect { profile, .. } | Self::Disconnect { profile, .. } => profile.as_deref(),
        }
    }
}

/// Errors an event source can report for a single poll.
///
/// The poller logs these and tries again on the next cycle.
#[derive(Debug, thiserror::Error)]
pub enum EventSourceError {
    /// Reading the underlying feed failed.
    #[error("event source I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The blocking poll task panicked or was cancelled.
    #[error("event source task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Any other source-specific failure.
    #[error("event source error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

/// A producer of presence events.
///
/// Implementations are polled from a single background task, one call per
/// cycle, and must return only events not returned before. Each call runs
/// on Tokio's blocking pool, so it may do blocking I/O.
pub trait EventSource: Send {
    /// Short name used in log output.
    fn name(&self) -> &str;

    /// Events that appeared since the previous call, in order.
    ///
    /// # Errors
    ///
    /// Returns [`EventSourceError`] if the feed could not be read this
    /// cycle.
    fn poll_events(&mut self) -> Result<Vec<PresenceEvent>, EventSourceError>;
}

/// An event source that hands out pre-built batches, one per poll.
///
/// Once the script is exhausted every poll returns an empty batch.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEventSource {
    batches: VecDeque<Vec<PresenceEvent>>,
}

impl ScriptedEventSource {
    /// Create a source that will return `batches` in order.
    pub fn new(batches: impl IntoIterator<Item = Vec<PresenceEvent>>) -> Self {
        Self {
            batches: batches.into_iter().collect(),
        }
    }
}

impl EventSource for ScriptedEventSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn poll_events(&mut self) -> Result<Vec<PresenceEvent>, EventSourceError> {
        Ok(self.batches.pop_front().unwrap_or_default())
    }
}
