//! Background task that feeds events into the store.
//!
//! The poller drains its [`EventSource`] once per cycle, then waits for the
//! configured interval or for cancellation, whichever comes first. A cycle
//! that has started always runs to completion, so cancelling never leaves a
//! batch half-applied.
//!
//! Events are fetched on the blocking pool outside the store lock and
//! applied as one batch under the write lock. Queries therefore see either
//! none or all of a batch.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{EventSource, EventSourceError};
use crate::store::SharedStore;
use crate::tracker::PresenceTracker;

/// An event source that can be moved onto the blocking pool for a poll.
pub type SharedSource = Arc<Mutex<Box<dyn EventSource>>>;

/// Counters collected over the lifetime of a poller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerReport {
    /// Completed poll cycles.
    pub cycles: u64,
    /// Events applied to the store.
    pub events_applied: u64,
    /// Events that were duplicates (no state change).
    pub duplicates: u64,
    /// Cycles where the source reported an error.
    pub source_errors: u64,
}

/// Run one poll cycle: fetch, lock, apply.
///
/// Returns the number of events applied and how many of those were
/// duplicates.
///
/// # Errors
///
/// Returns the source's error if it could not be read; the store is not
/// touched in that case.
pub async fn poll_once(
    source: &SharedSource,
    store: &SharedStore,
    tracker: &PresenceTracker,
) -> Result<(u64, u64), EventSourceError> {
    let polled = Arc::clone(source);
    let (name, events) = tokio::task::spawn_blocking(move || {
        let mut source = polled.lock().unwrap_or_else(PoisonError::into_inner);
        (source.name().to_owned(), source.poll_events())
    })
    .await?;
    let events = events?;
    if events.is_empty() {
        return Ok((0, 0));
    }

    let mut store = store.write().await;
    let mut applied = 0u64;
    let mut duplicates = 0u64;
    for event in &events {
        let outcome = tracker.apply(&mut store, event);
        applied = applied.saturating_add(1);
        if !outcome.changed_state() {
            duplicates = duplicates.saturating_add(1);
        }
    }
    debug!(
        source = %name,
        applied,
        duplicates,
        online = store.count_online(),
        online_profiles = store.count_online_profiles(),
        "applied event batch"
    );
    Ok((applied, duplicates))
}

/// Poll `source` every `interval` until `token` is cancelled.
///
/// The first cycle runs immediately. Source errors are logged and the
/// next cycle retries.
pub async fn run_poller(
    source: Box<dyn EventSource>,
    store: SharedStore,
    tracker: PresenceTracker,
    interval: Duration,
    token: CancellationToken,
) -> PollerReport {
    let mut report = PollerReport::default();
    let name = source.name().to_owned();
    let source: SharedSource = Arc::new(Mutex::new(source));
    info!(
        source = %name,
        interval_secs = interval.as_secs(),
        "event poller started"
    );

    while !token.is_cancelled() {
        match poll_once(&source, &store, &tracker).await {
            Ok((applied, duplicates)) => {
                report.events_applied = report.events_applied.saturating_add(applied);
                report.duplicates = report.duplicates.saturating_add(duplicates);
            }
            Err(e) => {
                report.source_errors = report.source_errors.saturating_add(1);
                warn!(source = %name, error = %e, "event source poll failed, retrying next cycle");
            }
        }
        report.cycles = report.cycles.saturating_add(1);

        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }

    info!(
        cycles = report.cycles,
        events_applied = report.events_applied,
        duplicates = report.duplicates,
        source_errors = report.source_errors,
        "event poller stopped"
    );
    report
}

/// Spawn [`run_poller`] on the Tokio runtime.
///
/// The counters are logged when the task stops; use [`run_poller`] directly to
/// keep them.
pub fn spawn_poller(
    source: Box<dyn EventSource>,
    store: SharedStore,
    tracker: PresenceTracker,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_poller(source, store, tracker, interval, token).await;
    })
}
