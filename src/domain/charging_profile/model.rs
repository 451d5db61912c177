//! ActiveChargingProfile domain entity and composite-schedule selection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingProfilePurpose {
    ChargePointMaxProfile,
    TxDefaultProfile,
    TxProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingProfileKind {
    Absolute,
    Recurring,
    Relative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingRateUnit {
    W,
    A,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrencyKind {
    Daily,
    Weekly,
}

/// One entry in a charging schedule: `limit` applies from `start_period`
/// seconds after the schedule's start until the next period (or the
/// schedule's duration, if any).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedulePeriod {
    pub start_period: u32,
    pub limit: f64,
}

/// A charging profile installed on a connector (or station-wide, via
/// connector id 0).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveChargingProfile {
    pub profile_id: i32,
    pub connector_id: u32,
    pub stack_level: i32,
    pub purpose: ChargingProfilePurpose,
    pub kind: ChargingProfileKind,
    pub unit: ChargingRateUnit,
    pub recurrency: Option<RecurrencyKind>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    /// Ordered by `start_period` ascending.
    pub schedule_periods: Vec<SchedulePeriod>,
    pub installed_at: DateTime<Utc>,
}

impl ActiveChargingProfile {
    /// Whether this profile's validity window contains `at`. A profile
    /// with no bounds set is always in its window.
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        if let Some(from) = self.valid_from {
            if at < from {
                return false;
            }
        }
        if let Some(to) = self.valid_to {
            if at >= to {
                return false;
            }
        }
        true
    }

    /// The limit in effect `offset_seconds` after this profile's start.
    pub fn limit_at(&self, offset_seconds: u32) -> Option<f64> {
        self.schedule_periods
            .iter()
            .filter(|p| p.start_period <= offset_seconds)
            .max_by_key(|p| p.start_period)
            .map(|p| p.limit)
    }
}

/// Select the active profile among `profiles` at time `at`: highest
/// `stack_level` whose validity window covers `at`; ties broken by most
/// recently installed.
pub fn select_active_profile(
    profiles: &[ActiveChargingProfile],
    at: DateTime<Utc>,
) -> Option<&ActiveChargingProfile> {
    profiles
        .iter()
        .filter(|p| p.covers(at))
        .max_by(|a, b| {
            a.stack_level
                .cmp(&b.stack_level)
                .then(a.installed_at.cmp(&b.installed_at))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn profile(id: i32, stack_level: i32, installed_at: DateTime<Utc>) -> ActiveChargingProfile {
        ActiveChargingProfile {
            profile_id: id,
            connector_id: 1,
            stack_level,
            purpose: ChargingProfilePurpose::TxProfile,
            kind: ChargingProfileKind::Absolute,
            unit: ChargingRateUnit::W,
            recurrency: None,
            valid_from: None,
            valid_to: None,
            schedule_periods: vec![SchedulePeriod { start_period: 0, limit: 7400.0 }],
            installed_at,
        }
    }

    #[test]
    fn highest_stack_level_wins() {
        let now = Utc::now();
        let profiles = vec![profile(1, 0, now), profile(2, 5, now)];
        let active = select_active_profile(&profiles, now).unwrap();
        assert_eq!(active.profile_id, 2);
    }

    #[test]
    fn ties_broken_by_most_recent_install() {
        let now = Utc::now();
        let earlier = now - Duration::seconds(10);
        let profiles = vec![profile(1, 3, earlier), profile(2, 3, now)];
        let active = select_active_profile(&profiles, now).unwrap();
        assert_eq!(active.profile_id, 2);
    }

    #[test]
    fn expired_profile_excluded() {
        let now = Utc::now();
        let mut p = profile(1, 10, now);
        p.valid_to = Some(now - Duration::seconds(1));
        let active = select_active_profile(&[p], now);
        assert!(active.is_none());
    }

    #[test]
    fn limit_at_picks_latest_period_not_after_offset() {
        let now = Utc::now();
        let mut p = profile(1, 0, now);
        p.schedule_periods = vec![
            SchedulePeriod { start_period: 0, limit: 7400.0 },
            SchedulePeriod { start_period: 60, limit: 3700.0 },
        ];
        assert_eq!(p.limit_at(30), Some(7400.0));
        assert_eq!(p.limit_at(90), Some(3700.0));
    }
}
