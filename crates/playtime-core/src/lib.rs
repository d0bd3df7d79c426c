//! Presence tracking and playtime accounting for a game server.
//!
//! This crate owns the state machine that turns a stream of
//! connect/disconnect events into per-player and per-character
//! playtime totals, plus everything needed to keep that state alive
//! across restarts.
//!
//! # Modules
//!
//! - [`clock`] -- Monotonic and wall-clock time source ([`Clock`]) with a
//!   system implementation and a manually driven one for tests.
//! - [`presence`] -- The two-state online/offline record shared by players
//!   and profiles.
//! - [`entity`] -- [`Player`] and [`Profile`] entities and the [`SteamId`]
//!   identifier.
//! - [`store`] -- [`EntityStore`], the single authoritative collection of
//!   players, and the [`SharedStore`] lock used by every collaborator.
//! - [`tracker`] -- [`PresenceTracker`], which applies events to the store.
//! - [`events`] -- [`PresenceEvent`] and the [`EventSource`] trait.
//! - [`poller`] -- Background task draining an [`EventSource`] on a
//!   cancellable interval.
//! - [`snapshot`] -- [`SnapshotCodec`] for the durable JSON snapshot.
//! - [`autosave`] -- Optional periodic snapshot task.
//! - [`shutdown`] -- [`ShutdownCoordinator`] for the stop-then-save sequence.
//! - [`config`] -- Typed YAML configuration.
//!
//! [`Clock`]: clock::Clock
//! [`Player`]: entity::Player
//! [`Profile`]: entity::Profile
//! [`SteamId`]: entity::SteamId
//! [`EntityStore`]: store::EntityStore
//! [`SharedStore`]: store::SharedStore
//! [`PresenceTracker`]: tracker::PresenceTracker
//! [`PresenceEvent`]: events::PresenceEvent
//! [`EventSource`]: events::EventSource
//! [`SnapshotCodec`]: snapshot::SnapshotCodec
//! [`ShutdownCoordinator`]: shutdown::ShutdownCoordinator

pub mod autosave;
pub mod clock;
pub mod config;
pub mod entity;
pub mod events;
pub mod poller;
pub mod presence;
pub mod shutdown;
pub mod snapshot;
pub mod store;
pub mod tracker;

// Re-export primary types for convenience.
pub use autosave::spawn_autosave;
pub use clock::{Clock, ManualClock, Stamp, SystemClock};
pub use config::{ConfigError, EventSourceKind, EventsConfig, ServiceConfig};
pub use entity::{Player, Profile, SteamId};
pub use events::{EventSource, EventSourceError, PresenceEvent};
pub use poller::{spawn_poller, PollerReport, SharedSource};
pub use presence::{Presence, Transition};
pub use shutdown::{ShutdownCoordinator, ShutdownOutcome, ShutdownReport};
pub use snapshot::{LoadOutcome, SnapshotCodec, SnapshotError};
pub use store::{EntityStore, SharedStore, StoreError};
pub use tracker::{ApplyOutcome, PresenceTracker};
