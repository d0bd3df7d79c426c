//! The online/offline state machine shared by players and profiles.
//!
//! A [`Presence`] starts offline with no recorded transitions. Connecting
//! moves it online and stamps the session start; disconnecting moves it
//! offline, stamps the session end, and folds the session length into the
//! cumulative total. Duplicate events in either direction leave the record
//! untouched and report it through [`Transition`].
//!
//! # Invariants
//!
//! - `online` implies `connected` is set and is not earlier than
//!   `disconnected`.
//! - `total_playtime` only ever grows, and only on a disconnect.
//! - A live session is never part of `total_playtime`.

use chrono::TimeDelta;

use crate::clock::{seconds, Stamp};

/// What a connect or disconnect did to a [`Presence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Offline to online.
    Connected,
    /// Connect on an entity that was already online. Timers kept.
    AlreadyOnline,
    /// Online to offline, closing a session of the given length.
    Disconnected {
        /// Length of the session that just ended.
        session: TimeDelta,
    },
    /// Disconnect on an entity that was already offline. Nothing changed.
    AlreadyOffline,
}

impl Transition {
    /// Whether the event changed state (as opposed to being a duplicate).
    pub const fn is_change(self) -> bool {
        matches!(self, Self::Connected | Self::Disconnected { .. })
    }
}

/// Presence and playtime record for one entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Presence {
    online: bool,
    connected: Option<Stamp>,
    disconnected: Option<Stamp>,
    /// Seconds of completed sessions.
    total_playtime: f64,
}

impl Presence {
    /// A fresh offline record that has never connected.
    pub const fn new() -> Self {
        Self {
            online: false,
            connected: None,
            disconnected: None,
            total_playtime: 0.0,
        }
    }

    /// Rebuild a record from persisted state.
    ///
    /// An `online` flag without a connect stamp cannot describe a real
    /// session and is dropped, as is a negative or non-finite total.
    pub fn restore(
        online: bool,
        connected: Option<Stamp>,
        disconnected: Option<Stamp>,
        total_playtime: f64,
    ) -> Self {
        let total_playtime = if total_playtime.is_finite() && total_playtime > 0.0 {
            total_playtime
        } else {
            0.0
        };
        Self {
            online: online && connected.is_some(),
            connected,
            disconnected,
            total_playtime,
        }
    }

    /// Whether a session is in progress.
    pub const fn is_online(&self) -> bool {
        self.online
    }

    /// Stamp of the most recent connect, if any.
    pub const fn connected(&self) -> Option<Stamp> {
        self.connected
    }

    /// Stamp of the most recent disconnect, if any.
    pub const fn disconnected(&self) -> Option<Stamp> {
        self.disconnected
    }

    /// Seconds of completed sessions. Excludes the live session.
    pub const fn total_playtime(&self) -> f64 {
        self.total_playtime
    }

    /// Start a session at `now`.
    pub const fn connect(&mut self, now: Stamp) -> Transition {
        if self.online {
            return Transition::AlreadyOnline;
        }
        self.online = true;
        self.connected = Some(now);
        Transition::Connected
    }

    /// End the live session at `now` and add its length to the total.
    pub fn disconnect(&mut self, now: Stamp) -> Transition {
        let Some(start) = self.connected.filter(|_| self.online) else {
            return Transition::AlreadyOffline;
        };
        let session = now
            .monotonic
            .checked_sub(&start.monotonic)
            .unwrap_or_else(TimeDelta::zero)
            .max(TimeDelta::zero());

        self.online = false;
        self.disconnected = Some(now);
        self.total_playtime += seconds(session);
        Transition::Disconnected { session }
    }

    /// Seconds the live session has been running, or 0 when offline.
    pub fn ontime(&self, now: TimeDelta) -> f64 {
        match self.connected {
            Some(start) if self.online => since(now, start),
            _ => 0.0,
        }
    }

    /// Seconds since the last disconnect, or 0 when online or never
    /// disconnected.
    pub fn offtime(&self, now: TimeDelta) -> f64 {
        match self.disconnected {
            Some(end) if !self.online => since(now, end),
            _ => 0.0,
        }
    }
}

fn since(now: TimeDelta, then: Stamp) -> f64 {
    now.checked_sub(&then.monotonic)
        .map_or(0.0, |elapsed| seconds(elapsed).max(0.0))
}
