//! Time sources for presence tracking.
//!
//! Every transition records two readings: a monotonic one used for all
//! duration arithmetic, and a wall-clock one that is shown to API clients
//! and persisted in the snapshot. Monotonic readings are offsets from the
//! clock's own origin and do not survive a restart; the snapshot codec
//! re-derives them from the wall-clock timestamps on load.
//!
//! Monotonic readings are signed ([`TimeDelta`]) because a session that
//! started before the process did re-bases to a point before the origin.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};

/// A pair of readings taken at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    /// Offset from the clock origin. Only comparable with readings from
    /// the same clock.
    pub monotonic: TimeDelta,
    /// Wall-clock time in UTC.
    pub wall: DateTime<Utc>,
}

impl Stamp {
    /// Re-derive a monotonic reading for a wall-clock instant in the past,
    /// relative to `now`.
    ///
    /// The result is `now.monotonic - (now.wall - wall)`. A `wall` that lies
    /// in the future (clock skew between runs) is treated as `now`.
    pub fn rebase(now: Self, wall: DateTime<Utc>) -> Self {
        let elapsed = now.wall.signed_duration_since(wall).max(TimeDelta::zero());
        let monotonic = now
            .monotonic
            .checked_sub(&elapsed)
            .unwrap_or(now.monotonic);
        Self { monotonic, wall }
    }
}

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic reading: never decreases between calls.
    fn monotonic(&self) -> TimeDelta;

    /// Current wall-clock time.
    fn wall(&self) -> DateTime<Utc>;

    /// Both readings at once.
    fn now(&self) -> Stamp {
        Stamp {
            monotonic: self.monotonic(),
            wall: self.wall(),
        }
    }
}

/// The process clock: [`Instant`] for monotonic time, [`Utc::now`] for
/// wall time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose monotonic origin is the moment of construction.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic(&self) -> TimeDelta {
        TimeDelta::from_std(self.origin.elapsed()).unwrap_or_else(|_| TimeDelta::zero())
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Both readings advance together, so durations measured on the monotonic
/// side always agree with the wall-clock side.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Stamp>,
}

impl ManualClock {
    /// Create a clock at monotonic zero and the given wall time.
    pub const fn new(wall: DateTime<Utc>) -> Self {
        Self::starting_at(TimeDelta::zero(), wall)
    }

    /// Create a clock at an arbitrary monotonic reading.
    pub const fn starting_at(monotonic: TimeDelta, wall: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(Stamp { monotonic, wall }),
        }
    }

    /// Move both readings forward by `by`.
    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        now.monotonic = now.monotonic.checked_add(&by).unwrap_or(now.monotonic);
        now.wall = now.wall.checked_add_signed(by).unwrap_or(now.wall);
    }
}

impl Clock for ManualClock {
    fn monotonic(&self) -> TimeDelta {
        self.now().monotonic
    }

    fn wall(&self) -> DateTime<Utc> {
        self.now().wall
    }

    fn now(&self) -> Stamp {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Convert a duration to fractional seconds.
#[allow(clippy::cast_precision_loss)]
pub fn seconds(delta: TimeDelta) -> f64 {
    delta.num_microseconds().map_or_else(
        || delta.num_milliseconds() as f64 / 1_000.0,
        |micros| micros as f64 / 1_000_000.0,
    )
}

/// Convert a wall-clock instant to fractional Unix seconds.
#[allow(clippy::cast_precision_loss)]
pub fn to_unix_seconds(wall: DateTime<Utc>) -> f64 {
    wall.timestamp_micros() as f64 / 1_000_000.0
}

/// Convert fractional Unix seconds to a wall-clock instant.
///
/// Returns `None` for non-finite values and for anything at or before the
/// epoch, which older snapshots used to mean "never".
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn from_unix_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    let whole = secs.trunc();
    let nanos = ((secs - whole) * 1_000_000_000.0).round().clamp(0.0, 999_999_999.0);
    DateTime::from_timestamp(whole as i64, nanos as u32)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn epoch_plus(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn manual_clock_advances_both_readings() {
        let clock = ManualClock::new(epoch_plus(0));
        clock.advance(TimeDelta::seconds(90));

        assert_eq!(clock.monotonic(), TimeDelta::seconds(90));
        assert_eq!(clock.wall(), epoch_plus(90));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.monotonic();
        let second = clock.monotonic();
        assert!(second >= first);
    }

    #[test]
    fn rebase_subtracts_wall_elapsed() {
        let now = Stamp {
            monotonic: TimeDelta::seconds(5),
            wall: epoch_plus(100),
        };
        let rebased = Stamp::rebase(now, epoch_plus(40));

        // Started 60s ago, 55s before this clock's origin.
        assert_eq!(rebased.monotonic, TimeDelta::seconds(-55));
        assert_eq!(rebased.wall, epoch_plus(40));
    }

    #[test]
    fn rebase_clamps_future_wall_time() {
        let now = Stamp {
            monotonic: TimeDelta::seconds(5),
            wall: epoch_plus(100),
        };
        let rebased = Stamp::rebase(now, epoch_plus(130));
        assert_eq!(rebased.monotonic, TimeDelta::seconds(5));
    }

    #[test]
    fn unix_seconds_round_trip() {
        let wall = epoch_plus(12);
        let secs = to_unix_seconds(wall);
        assert_eq!(from_unix_seconds(secs), Some(wall));
    }

    #[test]
    fn zero_and_negative_unix_seconds_are_unset() {
        assert_eq!(from_unix_seconds(0.0), None);
        assert_eq!(from_unix_seconds(-3.5), None);
        assert_eq!(from_unix_seconds(f64::NAN), None);
    }

    #[test]
    fn seconds_keeps_sub_second_precision() {
        let delta = TimeDelta::milliseconds(1_500);
        assert!((seconds(delta) - 1.5).abs() < 1e-9);
    }
}
