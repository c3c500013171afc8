use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

/// States in the election lifecycle, derived from the schedule and the
/// current time. Never stored.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Switched off by an administrator; invisible to the public.
    Inactive,
    /// Enabled, but voting has not started yet.
    Upcoming,
    /// Accepting votes.
    Open,
    /// Voting has finished; final results are available.
    Closed,
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Inactive => "inactive",
            Self::Upcoming => "upcoming",
            Self::Open => "open",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// The parts of an election that decide its lifecycle state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Administrative on/off switch.
    pub enabled: bool,
    /// First instant at which votes are accepted.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub opens_at: DateTime<Utc>,
    /// Last instant at which votes are accepted.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub closes_at: DateTime<Utc>,
}

impl Schedule {
    /// Does the voting window have positive length?
    pub fn is_well_formed(&self) -> bool {
        self.closes_at > self.opens_at
    }

    /// Do the two schedules describe the same voting window? Ignores `enabled`.
    ///
    /// Compared at millisecond precision, the precision dates are stored at.
    pub fn same_window(&self, other: &Schedule) -> bool {
        self.opens_at.timestamp_millis() == other.opens_at.timestamp_millis()
            && self.closes_at.timestamp_millis() == other.closes_at.timestamp_millis()
    }
}

/// Classify an election at instant `now`.
///
/// Both ends of the window are inclusive. This is the single definition of
/// lifecycle state; callers must not compare dates themselves, and must call
/// this afresh for every request rather than caching the result.
pub fn classify(schedule: &Schedule, now: DateTime<Utc>) -> LifecycleState {
    if !schedule.enabled {
        LifecycleState::Inactive
    } else if now < schedule.opens_at {
        LifecycleState::Upcoming
    } else if now <= schedule.closes_at {
        LifecycleState::Open
    } else {
        LifecycleState::Closed
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    use super::*;

    fn window(enabled: bool) -> Schedule {
        let opens_at = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap();
        Schedule {
            enabled,
            opens_at,
            closes_at: opens_at + Duration::hours(1),
        }
    }

    #[test]
    fn window_edges_are_inclusive() {
        let s = window(true);
        let t0 = s.opens_at;
        assert_eq!(classify(&s, t0 - Duration::seconds(1)), LifecycleState::Upcoming);
        assert_eq!(classify(&s, t0), LifecycleState::Open);
        assert_eq!(classify(&s, t0 + Duration::minutes(30)), LifecycleState::Open);
        assert_eq!(classify(&s, s.closes_at), LifecycleState::Open);
        assert_eq!(
            classify(&s, s.closes_at + Duration::seconds(1)),
            LifecycleState::Closed
        );
    }

    #[test]
    fn window_comparison_ignores_sub_millisecond_noise() {
        let stored = window(true);
        let mut resent = stored;
        resent.closes_at = resent.closes_at + Duration::microseconds(250);
        resent.enabled = false;
        assert!(stored.same_window(&resent));

        resent.closes_at = stored.closes_at + Duration::milliseconds(1);
        assert!(!stored.same_window(&resent));
    }

    #[test]
    fn disabled_is_inactive_at_any_time() {
        let s = window(false);
        assert_eq!(classify(&s, s.opens_at - Duration::days(1)), LifecycleState::Inactive);
        assert_eq!(classify(&s, s.opens_at), LifecycleState::Inactive);
        assert_eq!(classify(&s, s.closes_at + Duration::days(1)), LifecycleState::Inactive);
    }

    #[test]
    fn window_comparison_ignores_enabled() {
        let mut other = window(false);
        assert!(window(true).same_window(&other));
        other.closes_at = other.closes_at + Duration::minutes(1);
        assert!(!window(true).same_window(&other));
    }

    fn arb_instant() -> impl Strategy<Value = DateTime<Utc>> {
        (0_i64..4_000_000_000).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
    }

    proptest! {
        #[test]
        fn classify_is_deterministic(
            enabled in any::<bool>(),
            a in arb_instant(),
            b in arb_instant(),
            now in arb_instant(),
        ) {
            let s = Schedule { enabled, opens_at: a.min(b), closes_at: a.max(b) };
            prop_assert_eq!(classify(&s, now), classify(&s.clone(), now));
        }

        #[test]
        fn classify_partitions_time(
            a in arb_instant(),
            b in arb_instant(),
            now in arb_instant(),
        ) {
            let s = Schedule { enabled: true, opens_at: a.min(b), closes_at: a.max(b) };
            let expected = if now < s.opens_at {
                LifecycleState::Upcoming
            } else if now > s.closes_at {
                LifecycleState::Closed
            } else {
                LifecycleState::Open
            };
            prop_assert_eq!(classify(&s, now), expected);
        }
    }
}
