//! Applies presence events to the entity store.
//!
//! The [`PresenceTracker`] is the only writer of presence state. Every
//! event is routed through the owning player:
//!
//! - Unknown players are registered on first sight.
//! - A named profile that the player does not own yet is created under
//!   that player. This is logged as a soft error and never rejected.
//! - The player transitions whether or not a profile is named.
//! - A player has at most one live profile. Connecting a different
//!   character closes the previous one, and a player going offline closes
//!   every live profile.
//!
//! Duplicate events (connect while online, disconnect while offline) are
//! no-ops that log a warning for the entity the event targets. When a
//! profile-scoped connect arrives for a player that is already online, the
//! player-level duplicate is expected and only logged at debug.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::entity::SteamId;
use crate::events::PresenceEvent;
use crate::presence::{Presence, Transition};
use crate::store::EntityStore;

/// What applying one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// The player was registered by this event.
    pub player_registered: bool,
    /// The named profile was created by this event.
    pub profile_created: bool,
    /// Transition at the player level.
    pub player: Transition,
    /// Transition of the named profile, if the event named one.
    pub profile: Option<Transition>,
    /// Other profiles whose live sessions were closed as a side effect.
    pub closed_profiles: Vec<String>,
}

impl ApplyOutcome {
    /// Whether anything other than a duplicate was observed.
    pub fn changed_state(&self) -> bool {
        self.player.is_change()
            || self.profile.is_some_and(Transition::is_change)
            || self.player_registered
            || self.profile_created
            || !self.closed_profiles.is_empty()
    }
}

/// The presence state machine driver.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    clock: Arc<dyn Clock>,
}

impl PresenceTracker {
    /// Create a tracker reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// The clock this tracker stamps transitions with.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Apply one event.
    pub fn apply(&self, store: &mut EntityStore, event: &PresenceEvent) -> ApplyOutcome {
        match event {
            PresenceEvent::Connect { steam_id, profile } => {
                self.connect(store, steam_id, profile.as_deref())
            }
            PresenceEvent::Disconnect { steam_id, profile } => {
                self.disconnect(store, steam_id, profile.as_deref())
            }
        }
    }

    /// Bring a player (and optionally one of their profiles) online.
    pub fn connect(
        &self,
        store: &mut EntityStore,
        steam_id: &SteamId,
        profile: Option<&str>,
    ) -> ApplyOutcome {
        let now = self.clock.now();
        let (player, player_registered) = store.get_or_register(steam_id);
        if player_registered {
            info!(steam_id = %steam_id, "registered new player");
        }

        let player_transition = player.presence_mut().connect(now);
        let mut outcome = ApplyOutcome {
            player_registered,
            profile_created: false,
            player: player_transition,
            profile: None,
            closed_profiles: Vec::new(),
        };

        let Some(name) = profile else {
            if player_transition == Transition::AlreadyOnline {
                warn!(steam_id = %steam_id, "connect for player already online, keeping session start");
            } else {
                info!(steam_id = %steam_id, "player connected");
            }
            return outcome;
        };

        if player_transition == Transition::AlreadyOnline {
            debug!(steam_id = %steam_id, profile = name, "player already online, connecting profile");
        }

        outcome.closed_profiles = player.close_profiles(Some(name), now);
        for closed in &outcome.closed_profiles {
            info!(steam_id = %steam_id, profile = closed.as_str(), "closed previous profile session");
        }

        let (entry, created) = player.profile_or_create(name);
        if created {
            warn!(steam_id = %steam_id, profile = name, "unknown profile, creating it");
        }
        let transition = entry.presence_mut().connect(now);
        if transition == Transition::AlreadyOnline {
            warn!(steam_id = %steam_id, profile = name, "connect for profile already online, keeping session start");
        } else {
            info!(steam_id = %steam_id, profile = name, "profile connected");
        }

        outcome.profile_created = created;
        outcome.profile = Some(transition);
        outcome
    }

    /// Take a player (and optionally one of their profiles) offline.
    ///
    /// Any profile still online when the player goes offline is closed at
    /// the same instant.
    pub fn disconnect(
        &self,
        store: &mut EntityStore,
        steam_id: &SteamId,
        profile: Option<&str>,
    ) -> ApplyOutcome {
        let now = self.clock.now();
        let (player, player_registered) = store.get_or_register(steam_id);
        if player_registered {
            info!(steam_id = %steam_id, "registered new player");
        }

        let mut profile_created = false;
        let profile_transition = profile.map(|name| {
            let (entry, created) = player.profile_or_create(name);
            profile_created = created;
            if created {
                warn!(steam_id = %steam_id, profile = name, "unknown profile, creating it");
            }
            let transition = entry.presence_mut().disconnect(now);
            log_disconnect(steam_id, Some(name), transition);
            transition
        });

        let closed_profiles = player.close_profiles(None, now);
        for closed in &closed_profiles {
            info!(steam_id = %steam_id, profile = closed.as_str(), "closed profile session with player");
        }

        let player_transition = player.presence_mut().disconnect(now);
        log_disconnect(steam_id, None, player_transition);

        ApplyOutcome {
            player_registered,
            profile_created,
            player: player_transition,
            profile: profile_transition,
            closed_profiles,
        }
    }

    /// Seconds the live session of `presence` has been running.
    pub fn ontime(&self, presence: &Presence) -> f64 {
        presence.ontime(self.clock.monotonic())
    }

    /// Seconds since `presence` last went offline.
    pub fn offtime(&self, presence: &Presence) -> f64 {
        presence.offtime(self.clock.monotonic())
    }
}

fn log_disconnect(steam_id: &SteamId, profile: Option<&str>, transition: Transition) {
    match transition {
        Transition::Disconnected { session } => info!(
            steam_id = %steam_id,
            profile,
            session_secs = session.num_seconds(),
            "disconnected"
        ),
        Transition::AlreadyOffline => {
            warn!(steam_id = %steam_id, profile, "disconnect for entity already offline, ignoring");
        }
        Transition::Connected | Transition::AlreadyOnline => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{DateTime, TimeDelta, Utc};
    use proptest::prelude::*;

    use super::*;
    use crate::clock::ManualClock;
    use crate::entity::{Player, Profile};

    fn setup() -> (Arc<ManualClock>, PresenceTracker, EntityStore) {
        let clock = Arc::new(ManualClock::new(
            DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let tracker = PresenceTracker::new(clock.clone());
        (clock, tracker, EntityStore::new())
    }

    fn total(store: &EntityStore, id: &str) -> f64 {
        store
            .find(&SteamId::from(id))
            .unwrap()
            .presence()
            .total_playtime()
    }

    fn profile_total(store: &EntityStore, id: &str, name: &str) -> f64 {
        store
            .find(&SteamId::from(id))
            .unwrap()
            .find_profile(name)
            .unwrap()
            .presence()
            .total_playtime()
    }

    #[test]
    fn playtime_example_from_two_sessions() {
        let (clock, tracker, mut store) = setup();
        let p1 = SteamId::from("P1");

        tracker.connect(&mut store, &p1, None);
        clock.advance(TimeDelta::seconds(120));
        tracker.disconnect(&mut store, &p1, None);
        assert!((total(&store, "P1") - 120.0).abs() < 1e-6);

        clock.advance(TimeDelta::seconds(600));
        tracker.connect(&mut store, &p1, None);
        clock.advance(TimeDelta::seconds(30));

        let player = store.find(&p1).unwrap();
        assert!((tracker.ontime(player.presence()) - 30.0).abs() < 1e-6);
        assert!((total(&store, "P1") - 120.0).abs() < 1e-6);

        tracker.disconnect(&mut store, &p1, None);
        assert!((total(&store, "P1") - 150.0).abs() < 1e-6);
    }

    #[test]
    fn connect_registers_unknown_player_and_profile() {
        let (_, tracker, mut store) = setup();
        let outcome = tracker.connect(&mut store, &SteamId::from("9"), Some("Yrsa"));

        assert!(outcome.player_registered);
        assert!(outcome.profile_created);
        assert_eq!(outcome.player, Transition::Connected);
        assert_eq!(outcome.profile, Some(Transition::Connected));

        let player = store.find(&SteamId::from("9")).unwrap();
        assert!(player.presence().is_online());
        assert!(player.find_profile("Yrsa").unwrap().presence().is_online());
    }

    #[test]
    fn right_after_connect_ontime_positive_offtime_zero() {
        let (clock, tracker, mut store) = setup();
        let id = SteamId::from("1");
        tracker.connect(&mut store, &id, None);
        clock.advance(TimeDelta::seconds(5));
        tracker.disconnect(&mut store, &id, None);
        clock.advance(TimeDelta::seconds(5));
        tracker.connect(&mut store, &id, None);

        let presence = store.find(&id).unwrap().presence();
        assert!(presence.is_online());
        assert!(tracker.ontime(presence) >= 0.0);
        assert!(tracker.offtime(presence).abs() < 1e-9);
    }

    #[test]
    fn duplicate_connect_does_not_reset_timer() {
        let (clock, tracker, mut store) = setup();
        let id = SteamId::from("1");
        tracker.connect(&mut store, &id, None);
        clock.advance(TimeDelta::seconds(40));

        let outcome = tracker.connect(&mut store, &id, None);
        assert_eq!(outcome.player, Transition::AlreadyOnline);
        assert!(!outcome.changed_state());

        clock.advance(TimeDelta::seconds(20));
        tracker.disconnect(&mut store, &id, None);
        assert!((total(&store, "1") - 60.0).abs() < 1e-6);
    }

    #[test]
    fn disconnect_of_never_connected_player_is_noop() {
        let (_, tracker, mut store) = setup();
        let mut known = Player::new(SteamId::from("1"));
        known.add_profile(Profile::new("Yrsa")).unwrap();
        store.add(known).unwrap();

        let outcome = tracker.disconnect(&mut store, &SteamId::from("1"), None);
        assert_eq!(outcome.player, Transition::AlreadyOffline);
        assert!(!outcome.changed_state());
        assert!(total(&store, "1").abs() < 1e-9);
        assert!(store.find(&SteamId::from("1")).unwrap().presence().disconnected().is_none());
    }

    #[test]
    fn switching_profiles_closes_the_previous_one() {
        let (clock, tracker, mut store) = setup();
        let id = SteamId::from("1");
        tracker.connect(&mut store, &id, Some("Yrsa"));
        clock.advance(TimeDelta::seconds(100));

        let outcome = tracker.connect(&mut store, &id, Some("Bjorn"));
        assert_eq!(outcome.player, Transition::AlreadyOnline);
        assert_eq!(outcome.closed_profiles, vec!["Yrsa".to_owned()]);
        assert!((profile_total(&store, "1", "Yrsa") - 100.0).abs() < 1e-6);

        clock.advance(TimeDelta::seconds(50));
        tracker.disconnect(&mut store, &id, None);
        assert!((profile_total(&store, "1", "Bjorn") - 50.0).abs() < 1e-6);
        assert!((total(&store, "1") - 150.0).abs() < 1e-6);
    }

    #[test]
    fn player_disconnect_closes_live_profiles() {
        let (clock, tracker, mut store) = setup();
        let id = SteamId::from("1");
        tracker.connect(&mut store, &id, Some("Yrsa"));
        clock.advance(TimeDelta::seconds(10));

        let outcome = tracker.disconnect(&mut store, &id, None);
        assert_eq!(outcome.closed_profiles, vec!["Yrsa".to_owned()]);
        let player = store.find(&id).unwrap();
        assert!(!player.find_profile("Yrsa").unwrap().presence().is_online());
        assert_eq!(store.count_online_profiles(), 0);
    }

    #[test]
    fn profile_disconnect_for_unknown_name_creates_it_offline() {
        let (_, tracker, mut store) = setup();
        let id = SteamId::from("1");
        tracker.connect(&mut store, &id, None);

        let outcome = tracker.disconnect(&mut store, &id, Some("Ghost"));
        assert!(outcome.profile_created);
        assert_eq!(outcome.profile, Some(Transition::AlreadyOffline));
        assert!(matches!(outcome.player, Transition::Disconnected { .. }));
        assert!(store.find(&id).unwrap().find_profile("Ghost").is_some());
    }

    #[test]
    fn apply_dispatches_on_event_kind() {
        let (clock, tracker, mut store) = setup();
        tracker.apply(&mut store, &PresenceEvent::connect("5", Some("Astrid")));
        clock.advance(TimeDelta::seconds(7));
        tracker.apply(&mut store, &PresenceEvent::disconnect("5", Some("Astrid")));

        assert!((profile_total(&store, "5", "Astrid") - 7.0).abs() < 1e-6);
        assert!((total(&store, "5") - 7.0).abs() < 1e-6);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Connect(u8, Option<&'static str>),
        Disconnect(u8, Option<&'static str>),
        Wait(u16),
    }

    fn character() -> impl Strategy<Value = Option<&'static str>> {
        proptest::option::of(proptest::sample::select(vec!["Yrsa", "Bjorn", "Astrid"]))
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0u8..4, character()).prop_map(|(n, name)| Step::Connect(n, name)),
            (0u8..4, character()).prop_map(|(n, name)| Step::Disconnect(n, name)),
            (1u16..600).prop_map(Step::Wait),
        ]
    }

    proptest! {
        #[test]
        fn total_equals_sum_of_completed_sessions(steps in proptest::collection::vec(step(), 0..60)) {
            let (clock, tracker, mut store) = setup();
            let id = SteamId::from("solo");
            let mut expected = 0i64;
            let mut started: Option<i64> = None;
            let mut elapsed = 0i64;

            for step in steps {
                match step {
                    Step::Connect(..) => {
                        tracker.connect(&mut store, &id, None);
                        started.get_or_insert(elapsed);
                    }
                    Step::Disconnect(..) => {
                        tracker.disconnect(&mut store, &id, None);
                        if let Some(start) = started.take() {
                            expected += elapsed - start;
                        }
                    }
                    Step::Wait(secs) => {
                        clock.advance(TimeDelta::seconds(i64::from(secs)));
                        elapsed += i64::from(secs);
                    }
                }
            }

            let actual = store.find(&id).map_or(0.0, |p| p.presence().total_playtime());
            prop_assert!((actual - expected as f64).abs() < 1e-6);
        }

        #[test]
        fn online_count_matches_flags(steps in proptest::collection::vec(step(), 0..80)) {
            let (clock, tracker, mut store) = setup();
            let mut online = std::collections::BTreeSet::new();

            for step in steps {
                match step {
                    Step::Connect(n, name) => {
                        tracker.connect(&mut store, &SteamId::new(n.to_string()), name);
                        online.insert(n);
                    }
                    Step::Disconnect(n, name) => {
                        tracker.disconnect(&mut store, &SteamId::new(n.to_string()), name);
                        online.remove(&n);
                    }
                    Step::Wait(secs) => clock.advance(TimeDelta::seconds(i64::from(secs))),
                }
                let flagged = store.list().filter(|p| p.presence().is_online()).count();
                prop_assert_eq!(store.count_online(), flagged);
                prop_assert_eq!(store.count_online(), online.len());
            }
        }

        #[test]
        fn profiles_follow_their_player(steps in proptest::collection::vec(step(), 0..80)) {
            let (clock, tracker, mut store) = setup();

            for step in steps {
                match step {
                    Step::Connect(n, name) => {
                        tracker.connect(&mut store, &SteamId::new(n.to_string()), name);
                    }
                    Step::Disconnect(n, name) => {
                        tracker.disconnect(&mut store, &SteamId::new(n.to_string()), name);
                    }
                    Step::Wait(secs) => clock.advance(TimeDelta::seconds(i64::from(secs))),
                }
                for player in store.list() {
                    let live = player
                        .profiles()
                        .iter()
                        .filter(|p| p.presence().is_online())
                        .count();
                    prop_assert!(live <= 1, "{} has {} live profiles", player.steam_id(), live);
                    if !player.presence().is_online() {
                        prop_assert_eq!(live, 0);
                    }
                }
                let live_total: usize = store
                    .list()
                    .map(|p| p.profiles().iter().filter(|p| p.presence().is_online()).count())
                    .sum();
                prop_assert_eq!(store.count_online_profiles(), live_total);
            }
        }
    }
}
