//! Players, their character profiles, and the player identifier.
//!
//! A [`Player`] is an account identified by its [`SteamId`]. Each player
//! owns an ordered list of [`Profile`]s (in-game characters) with names
//! unique within that player. Both carry their own [`Presence`] record.
//!
//! Presence records are only mutable inside the crate; the tracker is the
//! sole writer.

use serde::{Deserialize, Serialize};

use crate::clock::Stamp;
use crate::presence::Presence;
use crate::store::StoreError;

/// A player's Steam identifier, kept verbatim as it appears in server logs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SteamId(String);

impl SteamId {
    /// Wrap a raw identifier.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for SteamId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SteamId {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl From<String> for SteamId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// A named in-game character belonging to exactly one [`Player`].
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    name: String,
    presence: Presence,
}

impl Profile {
    /// A new offline profile.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_presence(name, Presence::new())
    }

    /// A profile with restored presence state.
    pub fn with_presence(name: impl Into<String>, presence: Presence) -> Self {
        Self {
            name: name.into(),
            presence,
        }
    }

    /// Character name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Presence and playtime.
    pub const fn presence(&self) -> &Presence {
        &self.presence
    }

    pub(crate) const fn presence_mut(&mut self) -> &mut Presence {
        &mut self.presence
    }
}

/// An account on the server and the characters it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    steam_id: SteamId,
    presence: Presence,
    profiles: Vec<Profile>,
}

impl Player {
    /// A new offline player with no profiles.
    pub const fn new(steam_id: SteamId) -> Self {
        Self::with_presence(steam_id, Presence::new())
    }

    /// A player with restored presence state and no profiles yet.
    pub const fn with_presence(steam_id: SteamId, presence: Presence) -> Self {
        Self {
            steam_id,
            presence,
            profiles: Vec::new(),
        }
    }

    /// The player's identifier.
    pub const fn steam_id(&self) -> &SteamId {
        &self.steam_id
    }

    /// Presence and playtime at the account level.
    pub const fn presence(&self) -> &Presence {
        &self.presence
    }

    pub(crate) const fn presence_mut(&mut self) -> &mut Presence {
        &mut self.presence
    }

    /// Owned profiles in the order they were first seen.
    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    /// Number of profiles owned by this player.
    pub const fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    /// Look up a profile by name.
    pub fn find_profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Look up a profile by name for modification.
    pub fn find_profile_mut(&mut self, name: &str) -> Option<&mut Profile> {
        self.profiles.iter_mut().find(|p| p.name == name)
    }

    /// Append a profile.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateProfile`] if this player already owns
    /// a profile with the same name.
    pub fn add_profile(&mut self, profile: Profile) -> Result<(), StoreError> {
        if self.find_profile(&profile.name).is_some() {
            return Err(StoreError::DuplicateProfile {
                steam_id: self.steam_id.clone(),
                name: profile.name,
            });
        }
        self.profiles.push(profile);
        Ok(())
    }

    /// The named profile, created offline if it does not exist yet. The
    /// flag is `true` when it was created.
    #[allow(clippy::indexing_slicing)] // index is from position() or the push
    pub(crate) fn profile_or_create(&mut self, name: &str) -> (&mut Profile, bool) {
        let existing = self.profiles.iter().position(|p| p.name == name);
        let index = existing.unwrap_or_else(|| {
            self.profiles.push(Profile::new(name));
            self.profiles.len().saturating_sub(1)
        });
        (&mut self.profiles[index], existing.is_none())
    }

    /// Disconnect every online profile except `keep`, returning the names
    /// that were closed.
    pub(crate) fn close_profiles(&mut self, keep: Option<&str>, now: Stamp) -> Vec<String> {
        self.profiles
            .iter_mut()
            .filter(|p| p.presence.is_online() && keep != Some(p.name.as_str()))
            .filter_map(|p| p.presence.disconnect(now).is_change().then(|| p.name.clone()))
            .collect()
    }
}
