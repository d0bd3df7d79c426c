//! Periodic snapshot task.
//!
//! When enabled, the store is encoded under the read lock and written to
//! disk on a blocking thread every interval, so a crash loses at most one
//! interval of playtime. The shutdown snapshot does not depend on this.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::snapshot::{SnapshotCodec, SnapshotError};
use crate::store::SharedStore;

/// Encode the store and write it without holding the lock during I/O.
///
/// # Errors
///
/// Returns [`SnapshotError`] if writing fails or the blocking task could
/// not be joined.
pub async fn save_now(
    codec: &Arc<SnapshotCodec>,
    store: &SharedStore,
) -> Result<(), SnapshotError> {
    let document = {
        let store = store.read().await;
        codec.encode(&store)
    };
    let codec = Arc::clone(codec);
    tokio::task::spawn_blocking(move || codec.write(&document)).await?
}

/// Save every `interval` until `token` is cancelled.
///
/// Returns the number of successful saves.
pub async fn run_autosave(
    codec: Arc<SnapshotCodec>,
    store: SharedStore,
    interval: Duration,
    token: CancellationToken,
) -> u64 {
    let mut saves = 0u64;
    info!(interval_secs = interval.as_secs(), "autosave started");

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
        match save_now(&codec, &store).await {
            Ok(()) => saves = saves.saturating_add(1),
            Err(e) => warn!(error = %e, "autosave failed, keeping in-memory state"),
        }
    }

    info!(saves, "autosave stopped");
    saves
}

/// Spawn [`run_autosave`] on the Tokio runtime.
///
/// The save count is logged when the task stops.
pub fn spawn_autosave(
    codec: Arc<SnapshotCodec>,
    store: SharedStore,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_autosave(codec, store, interval, token).await;
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;

    use super::*;
    use crate::clock::ManualClock;
    use crate::entity::SteamId;
    use crate::store::EntityStore;
    use crate::tracker::PresenceTracker;

    #[tokio::test]
    async fn save_now_writes_current_state() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(
            DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let codec = Arc::new(SnapshotCodec::new(dir.path().join("stats.json"), clock.clone()));
        let store = EntityStore::new().into_shared();
        PresenceTracker::new(clock).connect(&mut *store.write().await, &SteamId::from("1"), None);

        save_now(&codec, &store).await.unwrap();

        let (loaded, _) = codec.load();
        assert_eq!(loaded.count_online(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn autosave_runs_on_interval_until_cancelled() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(
            DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let codec = Arc::new(SnapshotCodec::new(dir.path().join("stats.json"), clock));
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_autosave(
            codec.clone(),
            EntityStore::new().into_shared(),
            Duration::from_secs(30),
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(70)).await;
        token.cancel();
        let saves = handle.await.unwrap();

        assert_eq!(saves, 2);
        assert!(codec.path().exists());
    }
}
