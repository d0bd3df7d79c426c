//! Event source that reads a systemd unit's journal.
//!
//! Each poll runs `journalctl` for the unit, limited to the current boot,
//! and asks for the entries after the last cursor it saw. Message text goes
//! through the same [`LogInterpreter`] as the file tail. With
//! `--show-cursor` the output ends in `-- cursor: <cursor>`, which becomes
//! the starting point of the next poll and can be persisted to a side file.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use playtime_core::{EventSource, EventSourceError, PresenceEvent};
use tracing::{debug, info, warn};

use crate::log_line::LogInterpreter;

const CURSOR_PREFIX: &str = "-- cursor: ";

/// Follows the journal of one systemd unit.
#[derive(Debug)]
pub struct JournalSource {
    program: PathBuf,
    unit: String,
    cursor_file: Option<PathBuf>,
    cursor: Option<String>,
    start_at_end: bool,
    started: bool,
    interpreter: LogInterpreter,
}

impl JournalSource {
    /// Read the journal of `unit`. With `start_at_end`, entries already in
    /// the journal when the first poll runs are skipped.
    pub fn new(unit: impl Into<String>, start_at_end: bool) -> Self {
        Self {
            program: PathBuf::from("journalctl"),
            unit: unit.into(),
            cursor_file: None,
            cursor: None,
            start_at_end,
            started: false,
            interpreter: LogInterpreter::new(),
        }
    }

    /// Persist the cursor to `cursor_file` whenever it moves, and resume
    /// from it now if it holds one.
    ///
    /// A stored cursor takes precedence over `start_at_end`.
    #[must_use]
    pub fn with_cursor_file(mut self, cursor_file: impl Into<PathBuf>) -> Self {
        let cursor_file = cursor_file.into();
        if let Some(cursor) = read_cursor(&cursor_file) {
            info!(path = %cursor_file.display(), "resuming journal from stored cursor");
            self.cursor = Some(cursor);
            self.started = true;
        }
        self.cursor_file = Some(cursor_file);
        self
    }

    /// Run `program` instead of `journalctl` from `PATH`.
    #[cfg(test)]
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// The unit being followed.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Cursor of the last entry read, if any.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Whether the next output only positions the cursor.
    const fn skipping_history(&self) -> bool {
        !self.started && self.start_at_end && self.cursor.is_none()
    }

    /// Arguments for the next `journalctl` run.
    fn query_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--unit={}", self.unit),
            "--boot".to_owned(),
            "--output=cat".to_owned(),
            "--no-pager".to_owned(),
            "--quiet".to_owned(),
            "--show-cursor".to_owned(),
        ];
        if let Some(cursor) = &self.cursor {
            args.push(format!("--after-cursor={cursor}"));
        } else if self.skipping_history() {
            args.push("--lines=1".to_owned());
        }
        args
    }

    /// Turn one `journalctl` output into events and advance the cursor.
    fn ingest(&mut self, output: &str) -> Vec<PresenceEvent> {
        let skipping = self.skipping_history();
        self.started = true;

        let mut events = Vec::new();
        let mut cursor = None;
        for line in output.lines() {
            if let Some(found) = line.strip_prefix(CURSOR_PREFIX) {
                cursor = Some(found.trim().to_owned());
            } else if !skipping {
                self.interpreter.interpret(line, &mut events);
            }
        }

        if skipping {
            info!(unit = %self.unit, "skipping existing journal entries");
        }
        if let Some(cursor) = cursor.filter(|found| self.cursor.as_ref() != Some(found)) {
            self.cursor = Some(cursor);
            self.store_cursor();
        }
        events
    }

    fn store_cursor(&self) {
        let (Some(cursor_file), Some(cursor)) = (&self.cursor_file, &self.cursor) else {
            return;
        };
        if let Err(e) = fs::write(cursor_file, cursor) {
            warn!(path = %cursor_file.display(), error = %e, "failed to store journal cursor");
        }
    }
}

impl EventSource for JournalSource {
    fn name(&self) -> &'static str {
        "systemd-journal"
    }

    fn poll_events(&mut self) -> Result<Vec<PresenceEvent>, EventSourceError> {
        let output = Command::new(&self.program).args(self.query_args()).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EventSourceError::Internal {
                message: format!("journalctl exited with {}: {}", output.status, stderr.trim()),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(unit = %self.unit, bytes = stdout.len(), "read journal");
        Ok(self.ingest(&stdout))
    }
}

fn read_cursor(path: &Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    let cursor = contents.trim();
    (!cursor.is_empty()).then(|| cursor.to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const ALICE: &str = "76561198000000001";

    fn output(lines: &[&str], cursor: &str) -> String {
        let mut text = lines.join("\n");
        text.push('\n');
        text.push_str(CURSOR_PREFIX);
        text.push_str(cursor);
        text.push('\n');
        text
    }

    #[test]
    fn first_query_positions_at_the_tail() {
        let source = JournalSource::new("valheim-server.service", true);
        let args = source.query_args();
        assert!(args.contains(&"--unit=valheim-server.service".to_owned()));
        assert!(args.contains(&"--boot".to_owned()));
        assert!(args.contains(&"--lines=1".to_owned()));
        assert!(!args.iter().any(|a| a.starts_with("--after-cursor")));
    }

    #[test]
    fn skipped_history_still_sets_the_cursor() {
        let mut source = JournalSource::new("valheim-server.service", true);
        let events = source.ingest(&output(
            &[format!("Got connection SteamID {ALICE}").as_str()],
            "s=abc;i=10",
        ));

        assert!(events.is_empty());
        assert_eq!(source.cursor(), Some("s=abc;i=10"));
        assert!(source
            .query_args()
            .contains(&"--after-cursor=s=abc;i=10".to_owned()));
    }

    #[test]
    fn entries_after_the_cursor_become_events() {
        let mut source = JournalSource::new("valheim-server.service", false);
        assert!(!source.query_args().contains(&"--lines=1".to_owned()));

        let events = source.ingest(&output(
            &[
                format!("02/15/2024 20:01:02: Got connection SteamID {ALICE}").as_str(),
                "02/15/2024 20:01:09: Got character ZDOID from Yrsa : 12:1",
                "02/15/2024 20:01:10: unrelated noise",
            ],
            "s=abc;i=12",
        ));
        assert_eq!(
            events,
            vec![
                PresenceEvent::connect(ALICE, None),
                PresenceEvent::connect(ALICE, Some("Yrsa")),
            ]
        );

        // No new entries: no cursor line, cursor kept.
        assert!(source.ingest("").is_empty());
        assert_eq!(source.cursor(), Some("s=abc;i=12"));
    }

    #[test]
    fn cursor_file_survives_restart() {
        let dir = TempDir::new().unwrap();
        let cursor_file = dir.path().join("stats.json.journal-cursor");

        let mut first = JournalSource::new("valheim-server.service", false)
            .with_cursor_file(&cursor_file);
        first.ingest(&output(&[], "s=abc;i=40"));

        let second =
            JournalSource::new("valheim-server.service", true).with_cursor_file(&cursor_file);
        assert_eq!(second.cursor(), Some("s=abc;i=40"));
        assert!(second
            .query_args()
            .contains(&"--after-cursor=s=abc;i=40".to_owned()));
    }

    #[test]
    fn missing_journalctl_is_a_source_error() {
        let dir = TempDir::new().unwrap();
        let mut source = JournalSource::new("valheim-server.service", false)
            .with_program(dir.path().join("no-such-journalctl"));
        assert!(matches!(
            source.poll_events(),
            Err(EventSourceError::Io { .. })
        ));
    }
}
