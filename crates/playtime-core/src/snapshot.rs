//! Durable JSON snapshot of the entity store.
//!
//! The snapshot is a single document `{"players": [...]}`. Each player
//! entry carries its presence fields and an ordered list of profiles:
//!
//! ```json
//! {
//!   "steamID": "76561198000000001",
//!   "online": true,
//!   "ontime": 812.4,
//!   "onsince": 1700000000.25,
//!   "offtime": 0.0,
//!   "offsince": null,
//!   "totalPlaytime": 5400.0,
//!   "profiles": [{ "name": "Yrsa", "online": true, "...": "..." }]
//! }
//! ```
//!
//! Durations are seconds, `onsince`/`offsince` are Unix seconds, and an
//! unset timestamp is `null` (`0` is accepted on load for older files).
//! `ontime`/`offtime` are derived at save time and ignored on load.
//!
//! # Re-basing
//!
//! Monotonic readings do not survive a restart. On load each persisted
//! wall-clock timestamp is turned back into a monotonic reading with
//! [`Stamp::rebase`]: `now_monotonic - (now_wall - onsince)`.
//!
//! # Durability
//!
//! [`SnapshotCodec::save`] writes to a sibling `*.tmp` file, flushes and
//! syncs it, and renames it over the target, so a crash mid-write leaves
//! the previous snapshot intact.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{error, info, warn};

use crate::clock::{from_unix_seconds, to_unix_seconds, Clock, Stamp};
use crate::entity::{Player, Profile, SteamId};
use crate::presence::Presence;
use crate::store::EntityStore;

/// Errors that can occur while writing a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// A filesystem operation failed.
    #[error("snapshot I/O error at {path}: {source}")]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The document could not be serialized.
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The blocking write task panicked or was cancelled.
    #[error("snapshot write task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result of [`SnapshotCodec::load`]. Every variant comes with a usable
/// store; only `Loaded` carries data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The file was read and decoded.
    Loaded {
        /// Number of players restored.
        players: usize,
    },
    /// No file at the configured path. Normal on first start.
    FileMissing,
    /// The file exists but could not be read or decoded. It is moved aside
    /// so the next save does not replace it.
    Malformed {
        /// Why the file was rejected.
        reason: String,
        /// Where the rejected file now lives, if moving it succeeded.
        quarantined: Option<PathBuf>,
    },
}

/// Top-level snapshot document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    /// Players in ascending identifier order.
    #[serde(default)]
    pub players: Vec<PlayerRecord>,
}

/// Persisted form of a [`Player`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    /// Player identifier.
    #[serde(rename = "steamID")]
    pub steam_id: SteamId,
    /// Whether a session was live when the snapshot was taken.
    #[serde(default)]
    pub online: bool,
    /// Live session length at save time, in seconds.
    #[serde(default)]
    pub ontime: f64,
    /// Unix seconds of the last connect.
    #[serde(default, deserialize_with = "unset_timestamp")]
    pub onsince: Option<f64>,
    /// Seconds since the last disconnect at save time.
    #[serde(default)]
    pub offtime: f64,
    /// Unix seconds of the last disconnect.
    #[serde(default, deserialize_with = "unset_timestamp")]
    pub offsince: Option<f64>,
    /// Seconds of completed sessions.
    #[serde(rename = "totalPlaytime", default)]
    pub total_playtime: f64,
    /// Owned profiles in first-seen order.
    #[serde(default)]
    pub profiles: Vec<ProfileRecord>,
}

/// Persisted form of a [`Profile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    /// Character name.
    pub name: String,
    /// Whether a session was live when the snapshot was taken.
    #[serde(default)]
    pub online: bool,
    /// Live session length at save time, in seconds.
    #[serde(default)]
    pub ontime: f64,
    /// Unix seconds of the last connect.
    #[serde(default, deserialize_with = "unset_timestamp")]
    pub onsince: Option<f64>,
    /// Seconds since the last disconnect at save time.
    #[serde(default)]
    pub offtime: f64,
    /// Unix seconds of the last disconnect.
    #[serde(default, deserialize_with = "unset_timestamp")]
    pub offsince: Option<f64>,
    /// Seconds of completed sessions.
    #[serde(rename = "totalPlaytime", default)]
    pub total_playtime: f64,
}

/// `null`, `0`, and negative values all mean "never happened".
fn unset_timestamp<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.filter(|secs| secs.is_finite() && *secs > 0.0))
}

/// Encode one player at the instant `now`.
///
/// Used both for the snapshot file and for the per-player API response.
pub fn encode_player(player: &Player, now: Stamp) -> PlayerRecord {
    let presence = player.presence();
    PlayerRecord {
        steam_id: player.steam_id().clone(),
        online: presence.is_online(),
        ontime: presence.ontime(now.monotonic),
        onsince: presence.connected().map(|s| to_unix_seconds(s.wall)),
        offtime: presence.offtime(now.monotonic),
        offsince: presence.disconnected().map(|s| to_unix_seconds(s.wall)),
        total_playtime: presence.total_playtime(),
        profiles: player
            .profiles()
            .iter()
            .map(|profile| encode_profile(profile, now))
            .collect(),
    }
}

fn encode_profile(profile: &Profile, now: Stamp) -> ProfileRecord {
    let presence = profile.presence();
    ProfileRecord {
        name: profile.name().to_owned(),
        online: presence.is_online(),
        ontime: presence.ontime(now.monotonic),
        onsince: presence.connected().map(|s| to_unix_seconds(s.wall)),
        offtime: presence.offtime(now.monotonic),
        offsince: presence.disconnected().map(|s| to_unix_seconds(s.wall)),
        total_playtime: presence.total_playtime(),
    }
}

/// Rebuild a presence record, re-basing persisted wall-clock timestamps
/// onto the current clock.
fn restore_presence(
    online: bool,
    onsince: Option<f64>,
    offsince: Option<f64>,
    total_playtime: f64,
    now: Stamp,
) -> Presence {
    let connected = onsince
        .and_then(from_unix_seconds)
        .map(|wall| Stamp::rebase(now, wall));
    let disconnected = offsince
        .and_then(from_unix_seconds)
        .map(|wall| Stamp::rebase(now, wall));
    // An online entity cannot have gone offline after its session started.
    let online = online
        && match (connected, disconnected) {
            (Some(on), Some(off)) => on.wall >= off.wall,
            (Some(_), None) => true,
            (None, _) => false,
        };
    Presence::restore(online, connected, disconnected, total_playtime)
}

/// Loads and saves the [`EntityStore`] at a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotCodec {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl SnapshotCodec {
    /// Create a codec for `path`, re-basing and deriving live values with
    /// `clock`.
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
        }
    }

    /// The snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The temporary path used while writing.
    pub fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        PathBuf::from(temp)
    }

    /// Read the snapshot file into a fresh store.
    ///
    /// Never fails: a missing or unusable file yields an empty store and
    /// the matching [`LoadOutcome`], which is also logged. An unusable file
    /// is renamed to [`SnapshotCodec::corrupt_path`] first.
    pub fn load(&self) -> (EntityStore, LoadOutcome) {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "snapshot file not found, starting empty");
                return (EntityStore::new(), LoadOutcome::FileMissing);
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "snapshot file unreadable, starting empty");
                return (EntityStore::new(), self.reject(e.to_string()));
            }
        };

        match serde_json::from_str::<SnapshotDocument>(&contents) {
            Ok(document) => {
                let store = self.decode(document);
                info!(
                    path = %self.path.display(),
                    players = store.len(),
                    online = store.count_online(),
                    "snapshot loaded"
                );
                let players = store.len();
                (store, LoadOutcome::Loaded { players })
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "snapshot file malformed, starting empty");
                (EntityStore::new(), self.reject(e.to_string()))
            }
        }
    }

    /// Where a rejected snapshot is moved: `<path>.corrupt-<unix seconds>`.
    pub fn corrupt_path(&self) -> PathBuf {
        let mut corrupt = self.path.clone().into_os_string();
        corrupt.push(format!(".corrupt-{}", self.clock.wall().timestamp()));
        PathBuf::from(corrupt)
    }

    /// Move the unusable file aside and build the outcome for it.
    fn reject(&self, reason: String) -> LoadOutcome {
        let target = self.corrupt_path();
        // Fall back to a copy when the rename is refused.
        let moved = fs::rename(&self.path, &target)
            .or_else(|_| fs::copy(&self.path, &target).map(|_| ()));
        if let Err(e) = moved {
            error!(
                path = %self.path.display(),
                error = %e,
                "could not move rejected snapshot aside, it will be overwritten on save"
            );
            return LoadOutcome::Malformed {
                reason,
                quarantined: None,
            };
        }
        warn!(
            path = %self.path.display(),
            moved_to = %target.display(),
            "rejected snapshot moved aside"
        );
        LoadOutcome::Malformed {
            reason,
            quarantined: Some(target),
        }
    }

    /// Turn a decoded document into a store.
    ///
    /// Duplicate identifiers and profile names keep the first entry. A
    /// profile recorded online under an offline player is loaded offline.
    pub fn decode(&self, document: SnapshotDocument) -> EntityStore {
        let now = self.clock.now();
        let mut store = EntityStore::new();

        for record in document.players {
            let presence = restore_presence(
                record.online,
                record.onsince,
                record.offsince,
                record.total_playtime,
                now,
            );
            if record.online && !presence.is_online() {
                warn!(steam_id = %record.steam_id, "player marked online without a valid session start, loading offline");
            }
            let player_online = presence.is_online();
            let mut player = Player::with_presence(record.steam_id, presence);

            for profile in record.profiles {
                let presence = restore_presence(
                    profile.online && player_online,
                    profile.onsince,
                    profile.offsince,
                    profile.total_playtime,
                    now,
                );
                if let Err(e) = player.add_profile(Profile::with_presence(profile.name, presence)) {
                    warn!(error = %e, "duplicate profile in snapshot, keeping the first");
                }
            }

            if let Err(e) = store.add(player) {
                warn!(error = %e, "duplicate player in snapshot, keeping the first");
            }
        }

        store
    }

    /// Encode the whole store at the current instant.
    pub fn encode(&self, store: &EntityStore) -> SnapshotDocument {
        let now = self.clock.now();
        SnapshotDocument {
            players: store.list().map(|player| encode_player(player, now)).collect(),
        }
    }

    /// Encode and write the store.
    ///
    /// # Errors
    ///
    /// See [`SnapshotCodec::write`].
    pub fn save(&self, store: &EntityStore) -> Result<(), SnapshotError> {
        self.write(&self.encode(store))
    }

    /// Write an already encoded document via temp file and rename.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Io`] if the directory, temp file, or
    /// rename fails, and [`SnapshotError::Serialization`] if encoding
    /// fails. The previous snapshot is untouched in either case.
    pub fn write(&self, document: &SnapshotDocument) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SnapshotError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let temp_path = self.temp_path();
        let result = write_synced(&temp_path, document).and_then(|()| {
            fs::rename(&temp_path, &self.path).map_err(|source| SnapshotError::Io {
                path: self.path.clone(),
                source,
            })
        });

        if result.is_err() {
            // Best effort; the temp file is garbage either way.
            let _ = fs::remove_file(&temp_path);
        } else {
            info!(
                path = %self.path.display(),
                players = document.players.len(),
                "snapshot saved"
            );
        }
        result
    }
}

fn write_synced(path: &Path, document: &SnapshotDocument) -> Result<(), SnapshotError> {
    let io_err = |source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, document)?;
    writer.write_all(b"\n").map_err(io_err)?;
    writer.flush().map_err(io_err)?;
    writer.get_ref().sync_all().map_err(io_err)?;
    Ok(())
}
