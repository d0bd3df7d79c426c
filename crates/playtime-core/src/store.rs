//! The authoritative in-memory collection of players.
//!
//! There is exactly one [`EntityStore`] per process. It is created at
//! startup (empty or from a snapshot), wrapped in a [`SharedStore`] lock,
//! and handed by reference to the poller, the query service, and the
//! shutdown coordinator. Every read and write goes through that lock.
//!
//! The online count is always derived by scanning presence flags so it can
//! never drift from the entities themselves.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::entity::{Player, SteamId};

/// The store behind its single lock.
pub type SharedStore = Arc<RwLock<EntityStore>>;

/// Errors raised when inserting entities.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A player with this identifier is already registered.
    #[error("player {0} already exists")]
    DuplicatePlayer(SteamId),

    /// The player already owns a profile with this name.
    #[error("player {steam_id} already has a profile named {name:?}")]
    DuplicateProfile {
        /// Owning player.
        steam_id: SteamId,
        /// The clashing profile name.
        name: String,
    },
}

/// All known players, keyed and ordered by [`SteamId`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityStore {
    players: BTreeMap<SteamId, Player>,
}

impl EntityStore {
    /// An empty store.
    pub const fn new() -> Self {
        Self {
            players: BTreeMap::new(),
        }
    }

    /// Wrap this store in the shared lock.
    pub fn into_shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    /// Look up a player.
    pub fn find(&self, steam_id: &SteamId) -> Option<&Player> {
        self.players.get(steam_id)
    }

    /// Look up a player for modification.
    pub fn find_mut(&mut self, steam_id: &SteamId) -> Option<&mut Player> {
        self.players.get_mut(steam_id)
    }

    /// Register a player.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicatePlayer`] if the identifier is taken;
    /// the existing entry is left untouched.
    pub fn add(&mut self, player: Player) -> Result<(), StoreError> {
        let steam_id = player.steam_id().clone();
        if self.players.contains_key(&steam_id) {
            return Err(StoreError::DuplicatePlayer(steam_id));
        }
        self.players.insert(steam_id, player);
        Ok(())
    }

    /// The player with this identifier, registered offline if unseen. The
    /// flag is `true` when it was registered by this call.
    pub(crate) fn get_or_register(&mut self, steam_id: &SteamId) -> (&mut Player, bool) {
        let registered = !self.players.contains_key(steam_id);
        let player = self
            .players
            .entry(steam_id.clone())
            .or_insert_with(|| Player::new(steam_id.clone()));
        (player, registered)
    }

    /// Number of players currently online.
    pub fn count_online(&self) -> usize {
        self.players
            .values()
            .filter(|p| p.presence().is_online())
            .count()
    }

    /// Number of profiles currently online, across all players.
    pub fn count_online_profiles(&self) -> usize {
        self.players
            .values()
            .flat_map(Player::profiles)
            .filter(|p| p.presence().is_online())
            .count()
    }

    /// All players in ascending identifier order.
    pub fn list(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// All identifiers in ascending order.
    pub fn steam_ids(&self) -> impl Iterator<Item = &SteamId> {
        self.players.keys()
    }

    /// Number of registered players.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Whether no players are registered.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn add_rejects_duplicate_steam_id() {
        let mut store = EntityStore::new();
        store.add(Player::new(SteamId::from("7"))).unwrap();

        let err = store.add(Player::new(SteamId::from("7"))).unwrap_err();
        assert!(matches!(err, StoreError::DuplicatePlayer(ref id) if id.as_str() == "7"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn list_is_ordered_by_steam_id() {
        let mut store = EntityStore::new();
        for id in ["30", "10", "20"] {
            store.add(Player::new(SteamId::from(id))).unwrap();
        }
        let ids: Vec<&str> = store.list().map(|p| p.steam_id().as_str()).collect();
        assert_eq!(ids, ["10", "20", "30"]);
    }

    #[test]
    fn get_or_register_only_registers_once() {
        let mut store = EntityStore::new();
        let id = SteamId::from("42");
        assert!(store.get_or_register(&id).1);
        assert!(!store.get_or_register(&id).1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn find_mut_allows_adding_profiles() {
        let mut store = EntityStore::new();
        let id = SteamId::from("5");
        store.add(Player::new(id.clone())).unwrap();

        store
            .find_mut(&id)
            .unwrap()
            .add_profile(crate::entity::Profile::new("Yrsa"))
            .unwrap();
        assert_eq!(store.find(&id).unwrap().profile_count(), 1);
        assert!(store.find_mut(&SteamId::from("6")).is_none());
    }

    #[test]
    fn find_unknown_is_none() {
        let store = EntityStore::new();
        assert!(store.find(&SteamId::from("nope")).is_none());
        assert!(store.is_empty());
        assert_eq!(store.count_online(), 0);
    }
}
