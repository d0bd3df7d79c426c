//! Valheim server log lines and the presence events they imply.
//!
//! | Log line | Event |
//! |----------|-------|
//! | `Got connection SteamID <id>` | `Connect(id)` |
//! | `Got character ZDOID from <name> : <zdoid>` | `Connect(oldest pending id, name)` |
//! | `Closing socket <id>` | `Disconnect(id, active profile of id)` |
//!
//! Handshakes are queued in arrival order and each spawning character is
//! credited to the oldest one still waiting. A `0:0` ZDOID marks a death,
//! and the fresh ZDOID that follows it is a respawn of the same character,
//! not a new session.

use std::collections::{HashMap, VecDeque};

use playtime_core::{PresenceEvent, SteamId};
use tracing::{debug, warn};

const CONNECTION_MARKER: &str = "Got connection SteamID ";
const CHARACTER_MARKER: &str = "Got character ZDOID from ";
const CLOSING_MARKER: &str = "Closing socket ";
const DEATH_ZDOID: &str = "0:0";

/// One recognised log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLine<'a> {
    /// A client handshake carrying its Steam identifier.
    Connection(&'a str),
    /// A character spawned into the world.
    Character {
        /// Character name.
        name: &'a str,
        /// The character's world object id.
        zdoid: &'a str,
    },
    /// A client socket was closed.
    Closing(&'a str),
}

/// Classify one log line, or `None` if it is not a presence line.
pub fn parse_line(line: &str) -> Option<LogLine<'_>> {
    if let Some((_, rest)) = line.split_once(CONNECTION_MARKER) {
        return steam_id_token(rest).map(LogLine::Connection);
    }
    if let Some((_, rest)) = line.split_once(CHARACTER_MARKER) {
        let (name, zdoid) = rest.rsplit_once(" : ")?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        return Some(LogLine::Character {
            name,
            zdoid: zdoid.trim(),
        });
    }
    if let Some((_, rest)) = line.split_once(CLOSING_MARKER) {
        return steam_id_token(rest).map(LogLine::Closing);
    }
    None
}

/// First whitespace-delimited token, if it looks like a Steam id.
fn steam_id_token(rest: &str) -> Option<&str> {
    let token = rest.split_whitespace().next()?;
    let numeric = token.bytes().all(|b| b.is_ascii_digit());
    (numeric && token.bytes().any(|b| b != b'0')).then_some(token)
}

/// Turns a stream of server log lines into presence events.
///
/// Shared by every source that reads the server's output, whatever the
/// transport.
#[derive(Debug, Default)]
pub struct LogInterpreter {
    /// Handshakes still waiting for their character, oldest first.
    pending: VecDeque<SteamId>,
    /// Character currently played by each connected player.
    active: HashMap<SteamId, String>,
    /// Players whose character died and has not respawned yet.
    dead: Vec<SteamId>,
}

impl LogInterpreter {
    /// An interpreter with no connections in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the events implied by `line` to `events`.
    pub fn interpret(&mut self, line: &str, events: &mut Vec<PresenceEvent>) {
        match parse_line(line) {
            Some(LogLine::Connection(id)) => {
                let steam_id = SteamId::from(id);
                if !self.pending.contains(&steam_id) {
                    self.pending.push_back(steam_id.clone());
                }
                events.push(PresenceEvent::Connect {
                    steam_id,
                    profile: None,
                });
            }
            Some(LogLine::Character { name, zdoid }) => self.character(name, zdoid, events),
            Some(LogLine::Closing(id)) => {
                let steam_id = SteamId::from(id);
                self.pending.retain(|pending| *pending != steam_id);
                self.dead.retain(|dead| *dead != steam_id);
                let profile = self.active.remove(&steam_id);
                events.push(PresenceEvent::Disconnect { steam_id, profile });
            }
            None => {}
        }
    }

    fn character(&mut self, name: &str, zdoid: &str, events: &mut Vec<PresenceEvent>) {
        if zdoid == DEATH_ZDOID {
            self.died(name);
            return;
        }

        let respawned = self
            .dead
            .iter()
            .position(|id| self.active.get(id).is_some_and(|active| active == name));
        if let Some(index) = respawned {
            let steam_id = self.dead.swap_remove(index);
            debug!(steam_id = %steam_id, profile = name, "character respawned");
            return;
        }

        let Some(steam_id) = self.pending.pop_front() else {
            self.unmatched(name);
            return;
        };
        if self.active.get(&steam_id).is_some_and(|active| active == name) {
            debug!(steam_id = %steam_id, profile = name, "character already active");
            return;
        }
        self.active.insert(steam_id.clone(), name.to_owned());
        events.push(PresenceEvent::connect(steam_id, Some(name)));
    }

    fn died(&mut self, name: &str) {
        let Some(steam_id) = self.owner_of(name, |id| !self.dead.contains(id)) else {
            debug!(profile = name, "death of a character nobody is playing");
            return;
        };
        debug!(steam_id = %steam_id, profile = name, "character died");
        self.dead.push(steam_id);
    }

    /// A spawn with no handshake waiting: a respawn whose death line was
    /// missed, or noise.
    fn unmatched(&self, name: &str) {
        let Some(steam_id) = self.owner_of(name, |_| true) else {
            warn!(profile = name, "character spawned with no pending connection, ignoring");
            return;
        };
        debug!(steam_id = %steam_id, profile = name, "character respawned");
    }

    /// A connected player playing `name` that also satisfies `filter`.
    fn owner_of(&self, name: &str, filter: impl Fn(&SteamId) -> bool) -> Option<SteamId> {
        self.active
            .iter()
            .filter(|(id, active)| active.as_str() == name && filter(*id))
            .map(|(id, _)| id)
            .min()
            .cloned()
    }
}
