//! Playtime tracker daemon.
//!
//! Wires the presence tracker to a Valheim server log or its systemd
//! journal, serves the query API, and keeps the snapshot file in step with
//! memory.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `playtime-config.yaml` (or `PLAYTIME_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Create the system clock
//! 4. Load the snapshot into the entity store
//! 5. Create the shutdown coordinator
//! 6. Spawn the event poller (log file or systemd journal)
//! 7. Spawn autosave, if enabled
//! 8. Bind and spawn the query API
//! 9. Wait for SIGTERM or Ctrl-C, then stop tasks and save

mod error;
mod journal;
mod log_line;
mod log_tail;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use playtime_api::{spawn_api, AppState, ServerConfig};
use playtime_core::{
    spawn_autosave, spawn_poller, Clock, EventSource, EventSourceKind, EventsConfig,
    PresenceTracker, ServiceConfig, ShutdownCoordinator, ShutdownOutcome, SnapshotCodec,
    SystemClock,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::DaemonError;
use crate::journal::JournalSource;
use crate::log_tail::ValheimLogSource;

/// Application entry point for the daemon.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded, the query API cannot
/// bind, or signal handlers cannot be installed.
#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    // 1. Load configuration.
    let config = ServiceConfig::load(None)?;

    // 2. Initialize structured logging. RUST_LOG wins over the config.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!(
        snapshot = %config.snapshot.path.display(),
        source = ?config.events.source,
        poll_interval_secs = config.events.poll_interval_secs,
        port = config.server.port,
        "playtime-daemon starting"
    );

    // 3. Clock.
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    // 4. Restore state.
    let codec = Arc::new(SnapshotCodec::new(
        config.snapshot.path.clone(),
        Arc::clone(&clock),
    ));
    let (store, outcome) = codec.load();
    info!(?outcome, players = store.len(), "entity store ready");
    let store = store.into_shared();

    // 5. Shutdown coordinator.
    let coordinator = ShutdownCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&codec),
        config.shutdown.join_timeout(),
    );

    // 6. Event poller.
    let source = event_source(&config.events, &config.snapshot.path);
    coordinator.register_task(
        "poller",
        spawn_poller(
            source,
            Arc::clone(&store),
            PresenceTracker::new(Arc::clone(&clock)),
            config.events.poll_interval(),
            coordinator.token(),
        ),
    );

    // 7. Autosave.
    if let Some(interval) = config.snapshot.autosave_interval() {
        coordinator.register_task(
            "autosave",
            spawn_autosave(
                Arc::clone(&codec),
                Arc::clone(&store),
                interval,
                coordinator.token(),
            ),
        );
    }

    // 8. Query API.
    let server_config = ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
    };
    let state = Arc::new(AppState::new(Arc::clone(&store), Arc::clone(&clock)));
    let api = match spawn_api(&server_config, state, coordinator.token()).await {
        Ok(handle) => handle,
        Err(e) => {
            // Background tasks are already running; stop them cleanly.
            coordinator.shutdown().await;
            return Err(e.into());
        }
    };
    coordinator.register_task("query-api", api);

    // 9. Run until told to stop.
    wait_for_termination().await?;

    if let ShutdownOutcome::Completed(report) = coordinator.shutdown().await {
        info!(
            snapshot_saved = report.snapshot_saved,
            players = report.players,
            "playtime-daemon shutdown complete"
        );
    }

    Ok(())
}

/// Build the configured event source. Read positions are kept in side
/// files next to the snapshot.
fn event_source(events: &EventsConfig, snapshot: &Path) -> Box<dyn EventSource> {
    match events.source {
        EventSourceKind::File => {
            let source = ValheimLogSource::new(&events.log_path, events.start_at_end)
                .with_offset_file(side_file(snapshot, ".logpos"));
            info!(
                path = %source.path().display(),
                offset = source.offset(),
                "tailing server log"
            );
            Box::new(source)
        }
        EventSourceKind::Journal => {
            let source = JournalSource::new(&events.unit, events.start_at_end)
                .with_cursor_file(side_file(snapshot, ".journal-cursor"));
            info!(
                unit = source.unit(),
                resumed = source.cursor().is_some(),
                "reading systemd journal"
            );
            Box::new(source)
        }
    }
}

/// `snapshot` with `suffix` appended to its file name.
fn side_file(snapshot: &Path, suffix: &str) -> PathBuf {
    let mut path = snapshot.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

/// Resolve on SIGTERM or Ctrl-C.
#[cfg(unix)]
async fn wait_for_termination() -> Result<(), DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("received Ctrl-C");
        }
        _ = terminate.recv() => info!("received SIGTERM"),
    }
    Ok(())
}

/// Resolve on Ctrl-C.
#[cfg(not(unix))]
async fn wait_for_termination() -> Result<(), DaemonError> {
    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C");
    Ok(())
}
