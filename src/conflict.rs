//! The Conflict Handler: applies the configured resolution policy when
//! both sides have diverged.

use chrono::NaiveDateTime;

use crate::config::ConflictResolutionPolicy;
use crate::direction::Direction;

/// What to do with a conflicting pair. `Automatic` carries the chosen
/// transfer direction and the `resolution` text to persist once that
/// transfer succeeds — the caller must not mark the `ConflictRecord`
/// resolved until then, so a failed transfer leaves the conflict open
/// for retry instead of silently recording a resolution that never
/// happened.
pub enum Resolution {
    Automatic {
        direction: Direction,
        resolution: &'static str,
    },
    Manual,
}

/// Decide how to resolve a conflict between `cloud_modified` and
/// `local_modified` under `policy`. Pure and total.
pub fn resolve_conflict(
    policy: ConflictResolutionPolicy,
    cloud_modified: NaiveDateTime,
    local_modified: NaiveDateTime,
) -> Resolution {
    match policy {
        ConflictResolutionPolicy::CloudWins => Resolution::Automatic {
            direction: Direction::CloudToLocal,
            resolution: "cloud_wins",
        },
        ConflictResolutionPolicy::LocalWins => Resolution::Automatic {
            direction: Direction::LocalToCloud,
            resolution: "local_wins",
        },
        ConflictResolutionPolicy::LatestTimestamp => {
            // Ties break to local_to_cloud: local is conventionally
            // authoritative when timestamps match to the second.
            if cloud_modified > local_modified {
                Resolution::Automatic {
                    direction: Direction::CloudToLocal,
                    resolution: "cloud_wins (latest)",
                }
            } else {
                Resolution::Automatic {
                    direction: Direction::LocalToCloud,
                    resolution: "local_wins (latest)",
                }
            }
        }
        ConflictResolutionPolicy::Manual => Resolution::Manual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn cloud_wins_is_unconditional() {
        let r = resolve_conflict(ConflictResolutionPolicy::CloudWins, t(9), t(10));
        assert!(matches!(
            r,
            Resolution::Automatic {
                direction: Direction::CloudToLocal,
                ..
            }
        ));
    }

    #[test]
    fn local_wins_is_unconditional() {
        let r = resolve_conflict(ConflictResolutionPolicy::LocalWins, t(10), t(9));
        assert!(matches!(
            r,
            Resolution::Automatic {
                direction: Direction::LocalToCloud,
                ..
            }
        ));
    }

    #[test]
    fn latest_timestamp_picks_the_later_side() {
        let r = resolve_conflict(ConflictResolutionPolicy::LatestTimestamp, t(10), t(9));
        assert!(matches!(
            r,
            Resolution::Automatic {
                direction: Direction::CloudToLocal,
                ..
            }
        ));
    }

    /// Ties break to `local_to_cloud`.
    #[test]
    fn latest_timestamp_ties_favor_local() {
        let r = resolve_conflict(ConflictResolutionPolicy::LatestTimestamp, t(9), t(9));
        match r {
            Resolution::Automatic { direction, resolution } => {
                assert_eq!(direction, Direction::LocalToCloud);
                assert_eq!(resolution, "local_wins (latest)");
            }
            Resolution::Manual => panic!("expected an automatic resolution"),
        }
    }

    #[test]
    fn manual_defers_entirely() {
        let r = resolve_conflict(ConflictResolutionPolicy::Manual, t(10), t(9));
        assert!(matches!(r, Resolution::Manual));
    }
}
