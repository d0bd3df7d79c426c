//! Event source that tails a Valheim dedicated server log.
//!
//! Each poll reads the bytes appended since the previous poll and hands
//! every complete line to a [`LogInterpreter`]. A trailing line without a
//! newline is kept until the rest of it arrives. When the file shrinks
//! (rotation or truncation) reading restarts from the top.
//!
//! The read position can be persisted to a small side file so a restart
//! resumes where the previous process stopped. The stored position never
//! includes a partial line.

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use playtime_core::{EventSource, EventSourceError, PresenceEvent};
use tracing::{debug, info, warn};

use crate::log_line::LogInterpreter;

/// Tails a server log file and reports presence events.
#[derive(Debug)]
pub struct ValheimLogSource {
    path: PathBuf,
    offset_file: Option<PathBuf>,
    offset: u64,
    start_at_end: bool,
    started: bool,
    pending: Vec<u8>,
    interpreter: LogInterpreter,
}

impl ValheimLogSource {
    /// Tail `path`. With `start_at_end`, content already in the file when
    /// the first poll runs is skipped.
    pub fn new(path: impl Into<PathBuf>, start_at_end: bool) -> Self {
        Self {
            path: path.into(),
            offset_file: None,
            offset: 0,
            start_at_end,
            started: false,
            pending: Vec::new(),
            interpreter: LogInterpreter::new(),
        }
    }

    /// Persist the read position to `offset_file` after every poll, and
    /// resume from it now if it holds a position.
    ///
    /// A stored position takes precedence over `start_at_end`.
    #[must_use]
    pub fn with_offset_file(mut self, offset_file: impl Into<PathBuf>) -> Self {
        let offset_file = offset_file.into();
        if let Some(offset) = read_offset(&offset_file) {
            info!(path = %offset_file.display(), offset, "resuming log tail from stored position");
            self.offset = offset;
            self.started = true;
        }
        self.offset_file = Some(offset_file);
        self
    }

    /// The log file being tailed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte position of the next unread byte.
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Position just past the last complete line.
    fn committed_offset(&self) -> u64 {
        let buffered = u64::try_from(self.pending.len()).unwrap_or(u64::MAX);
        self.offset.saturating_sub(buffered)
    }

    fn read_appended(&mut self) -> Result<Vec<u8>, EventSourceError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "log file not present yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();

        if !self.started {
            self.started = true;
            if self.start_at_end {
                info!(path = %self.path.display(), offset = len, "skipping existing log content");
                self.offset = len;
                self.store_offset();
                return Ok(Vec::new());
            }
        }

        if len < self.offset {
            warn!(
                path = %self.path.display(),
                previous_offset = self.offset,
                len,
                "log file shrank, reading from the start"
            );
            self.offset = 0;
            self.pending.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let read = u64::try_from(buf.len()).unwrap_or(u64::MAX);
        self.offset = self.offset.saturating_add(read);
        Ok(buf)
    }

    fn store_offset(&self) {
        if let Some(offset_file) = &self.offset_file {
            if let Err(e) = fs::write(offset_file, self.committed_offset().to_string()) {
                warn!(path = %offset_file.display(), error = %e, "failed to store log position");
            }
        }
    }

    /// Split complete lines off the pending buffer.
    fn take_lines(&mut self, appended: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(appended);
        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(last_newline.saturating_add(1));
        let complete = std::mem::replace(&mut self.pending, rest);
        complete
            .split(|&b| b == b'\n')
            .map(|line| String::from_utf8_lossy(line).trim_end_matches('\r').to_owned())
            .filter(|line| !line.is_empty())
            .collect()
    }
}

impl EventSource for ValheimLogSource {
    fn name(&self) -> &'static str {
        "valheim-log"
    }

    fn poll_events(&mut self) -> Result<Vec<PresenceEvent>, EventSourceError> {
        let appended = self.read_appended()?;
        if appended.is_empty() {
            return Ok(Vec::new());
        }

        let lines = self.take_lines(&appended);
        self.store_offset();
        let mut events = Vec::new();
        for line in lines {
            self.interpreter.interpret(&line, &mut events);
        }
        Ok(events)
    }
}

fn read_offset(path: &Path) -> Option<u64> {
    let contents = fs::read_to_string(path).ok()?;
    match contents.trim().parse() {
        Ok(offset) => Some(offset),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable log position");
            None
        }
    }
}
