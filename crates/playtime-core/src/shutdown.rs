//! Coordinated stop-then-save sequence.
//!
//! The [`ShutdownCoordinator`] owns the [`CancellationToken`] every
//! background task watches. [`ShutdownCoordinator::shutdown`] runs the
//! sequence once:
//!
//! 1. Cancel the token (poller, autosave and HTTP server observe it).
//! 2. Join registered tasks, all against a single deadline. Tasks still
//!    running at the deadline are aborted.
//! 3. Encode the store under the read lock and write the snapshot.
//!
//! Cancelling before taking the lock means the final snapshot never races
//! a half-applied event batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::autosave::save_now;
use crate::snapshot::SnapshotCodec;
use crate::store::SharedStore;

/// What a completed shutdown did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks that finished before the deadline.
    pub tasks_joined: usize,
    /// Tasks aborted at the deadline.
    pub tasks_timed_out: usize,
    /// Whether the final snapshot was written.
    pub snapshot_saved: bool,
    /// Players in the final snapshot.
    pub players: usize,
}

/// Result of [`ShutdownCoordinator::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// This call ran the sequence.
    Completed(ShutdownReport),
    /// An earlier call already ran it; nothing was done.
    AlreadyShutDown,
}

impl ShutdownOutcome {
    /// The report, if this call ran the sequence.
    pub const fn report(self) -> Option<ShutdownReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::AlreadyShutDown => None,
        }
    }
}

/// Stops background tasks and writes the final snapshot.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    store: SharedStore,
    codec: Arc<SnapshotCodec>,
    join_timeout: Duration,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    done: AtomicBool,
}

impl ShutdownCoordinator {
    /// Create a coordinator with a fresh cancellation token.
    pub fn new(store: SharedStore, codec: Arc<SnapshotCodec>, join_timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            store,
            codec,
            join_timeout,
            tasks: Mutex::new(Vec::new()),
            done: AtomicBool::new(false),
        }
    }

    /// The token background tasks should watch.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Register a task to be joined during shutdown.
    pub fn register_task(&self, name: impl Into<String>, handle: JoinHandle<()>) {
        let name = name.into();
        info!(task = %name, "registered background task");
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, handle));
    }

    /// Run the shutdown sequence. Only the first call does anything.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        if self.done.swap(true, Ordering::AcqRel) {
            info!("shutdown already completed, ignoring");
            return ShutdownOutcome::AlreadyShutDown;
        }

        info!("shutdown requested, stopping background tasks");
        self.token.cancel();

        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let now = tokio::time::Instant::now();
        // Overflow only happens for absurd timeouts; treat those as "now".
        let deadline = now.checked_add(self.join_timeout).unwrap_or(now);
        let mut report = ShutdownReport::default();

        for (name, mut handle) in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {
                    report.tasks_joined = report.tasks_joined.saturating_add(1);
                }
                Ok(Err(e)) => {
                    report.tasks_joined = report.tasks_joined.saturating_add(1);
                    warn!(task = %name, error = %e, "background task ended abnormally");
                }
                Err(_) => {
                    report.tasks_timed_out = report.tasks_timed_out.saturating_add(1);
                    warn!(task = %name, "background task missed the join deadline, aborting");
                    handle.abort();
                }
            }
        }

        report.players = self.store.read().await.len();
        match save_now(&self.codec, &self.store).await {
            Ok(()) => report.snapshot_saved = true,
            Err(e) => error!(error = %e, "final snapshot failed"),
        }

        info!(
            tasks_joined = report.tasks_joined,
            tasks_timed_out = report.tasks_timed_out,
            snapshot_saved = report.snapshot_saved,
            players = report.players,
            "shutdown complete"
        );
        ShutdownOutcome::Completed(report)
    }
}
