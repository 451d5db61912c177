//! Connector entity and its status/availability state machine.

use chrono::{DateTime, Utc};

use crate::domain::charging_profile::ActiveChargingProfile;
use crate::domain::transaction::Transaction;

/// Connector status on a charge point (OCPP 1.6 `ChargePointStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ConnectorStatus {
    Available,
    Preparing,
    Charging,
    SuspendedEV,
    SuspendedEVSE,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

impl Default for ConnectorStatus {
    fn default() -> Self {
        Self::Unavailable
    }
}

impl std::fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Whether a connector accepts new transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Availability {
    Operative,
    Inoperative,
}

impl Default for Availability {
    fn default() -> Self {
        Self::Operative
    }
}

/// Outcome of a requested status transition, per the connector state
/// machine diagram. Duplicate (same → same) transitions are suppressed:
/// no StatusNotification is sent and history is not touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChangeOutcome {
    /// The transition was legal and applied.
    Changed { previous: ConnectorStatus },
    /// `same → same`; no-op, nothing emitted.
    Unchanged,
    /// The transition is not a legal edge in the state diagram. The
    /// connector's status is left unchanged.
    Rejected { attempted: ConnectorStatus },
}

/// One outlet of a charge point.
#[derive(Debug, Clone)]
pub struct Connector {
    pub id: u32,
    pub status: ConnectorStatus,
    pub availability: Availability,
    /// Cumulative meter reading in Wh. Monotonically non-decreasing while
    /// an active transaction is bound (invariant P2).
    pub meter_wh: i64,
    pub transaction: Option<Transaction>,
    /// Sorted by `stack_level` descending (highest priority first).
    pub charging_profiles: Vec<ActiveChargingProfile>,
    /// True if this connector is deferred-Inoperative: a ChangeAvailability
    /// to Inoperative arrived while a transaction was in progress and the
    /// transition has not yet taken effect.
    pub availability_change_pending: bool,
    pub last_status_change: DateTime<Utc>,
}

impl Connector {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            status: ConnectorStatus::Unavailable,
            availability: Availability::Operative,
            meter_wh: 0,
            transaction: None,
            charging_profiles: Vec::new(),
            availability_change_pending: false,
            last_status_change: Utc::now(),
        }
    }

    /// Is connector 0, the pseudo-connector representing the charge point
    /// itself? Connector 0 is never transacted (data-model invariant).
    pub fn is_charge_point_connector(&self) -> bool {
        self.id == 0
    }

    /// Returns true if `from -> to` is a legal edge in the status diagram.
    fn is_legal_transition(from: ConnectorStatus, to: ConnectorStatus) -> bool {
        use ConnectorStatus::*;
        if from == to {
            return true; // handled as Unchanged by the caller
        }
        match (from, to) {
            (Unavailable, Available) => true,
            (Available, Preparing) => true,
            (Preparing, Charging) => true,
            (Charging, SuspendedEVSE) => true,
            (SuspendedEVSE, Charging) => true,
            (Charging, SuspendedEV) => true,
            (SuspendedEV, Charging) => true,
            (Charging, Finishing) | (SuspendedEVSE, Finishing) | (SuspendedEV, Finishing) => true,
            (Finishing, Available) => true,
            (_, Faulted) => true,
            (Faulted, Available) => true,
            (_, Unavailable) => true,
            (_, Reserved) => true,
            (Reserved, Available) => true,
            _ => false,
        }
    }

    /// Apply a requested status transition, validating against the legal
    /// edges. Illegal jumps are rejected (status unchanged); callers record
    /// rejections to state history at ERROR.
    pub fn set_status(&mut self, requested: ConnectorStatus) -> StatusChangeOutcome {
        if requested == self.status {
            return StatusChangeOutcome::Unchanged;
        }
        if !Self::is_legal_transition(self.status, requested) {
            return StatusChangeOutcome::Rejected {
                attempted: requested,
            };
        }
        let previous = self.status;
        self.status = requested;
        self.last_status_change = Utc::now();
        StatusChangeOutcome::Changed { previous }
    }

    /// True when this connector has an active transaction (P1, forward
    /// direction — a non-null transaction implies one of these statuses).
    pub fn is_transacting(&self) -> bool {
        matches!(
            self.status,
            ConnectorStatus::Charging | ConnectorStatus::SuspendedEVSE | ConnectorStatus::SuspendedEV | ConnectorStatus::Finishing
        )
    }

    /// Overwrite the absolute meter value (Wh). Used by `setMeterValue` and
    /// the auto-meter timer.
    pub fn set_meter_value(&mut self, wh: i64) {
        self.meter_wh = wh;
    }

    /// Insert a charging profile, replacing any existing profile with the
    /// same id, and keep the list sorted by descending stack level.
    pub fn install_profile(&mut self, profile: ActiveChargingProfile) {
        self.charging_profiles.retain(|p| p.profile_id != profile.profile_id);
        self.charging_profiles.push(profile);
        self.charging_profiles
            .sort_by(|a, b| b.stack_level.cmp(&a.stack_level));
    }

    /// Remove profiles matching the given filter. Returns the number removed.
    pub fn clear_profiles<F>(&mut self, matches: F) -> usize
    where
        F: Fn(&ActiveChargingProfile) -> bool,
    {
        let before = self.charging_profiles.len();
        self.charging_profiles.retain(|p| !matches(p));
        before - self.charging_profiles.len()
    }

    /// The profile active at time `at`: highest stack level whose validity
    /// window contains `at`. `charging_profiles` is kept sorted descending
    /// by stack level, so the first match wins.
    pub fn active_profile_at(&self, at: DateTime<Utc>) -> Option<&ActiveChargingProfile> {
        self.charging_profiles.iter().find(|p| p.covers(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = ConnectorStatus> {
        prop_oneof![
            Just(ConnectorStatus::Available),
            Just(ConnectorStatus::Preparing),
            Just(ConnectorStatus::Charging),
            Just(ConnectorStatus::SuspendedEV),
            Just(ConnectorStatus::SuspendedEVSE),
            Just(ConnectorStatus::Finishing),
            Just(ConnectorStatus::Reserved),
            Just(ConnectorStatus::Unavailable),
            Just(ConnectorStatus::Faulted),
        ]
    }

    proptest! {
        /// Same-to-same is always `Unchanged`, for every status, never
        /// `Rejected` or `Changed`.
        #[test]
        fn same_to_same_is_always_unchanged(status in any_status()) {
            let mut c = Connector::new(1);
            c.status = status;
            prop_assert_eq!(c.set_status(status), StatusChangeOutcome::Unchanged);
        }

        /// An arbitrary sequence of requested transitions never leaves the
        /// connector's status equal to a status that was `Rejected`.
        #[test]
        fn rejected_transitions_never_change_status(from in any_status(), to in any_status()) {
            let mut c = Connector::new(1);
            c.status = from;
            let outcome = c.set_status(to);
            if let StatusChangeOutcome::Rejected { .. } = outcome {
                prop_assert_eq!(c.status, from);
            }
        }

        /// `Faulted` is reachable from every status (spec: "any state may
        /// transition to Faulted").
        #[test]
        fn faulted_is_reachable_from_any_status(from in any_status()) {
            let mut c = Connector::new(1);
            c.status = from;
            let outcome = c.set_status(ConnectorStatus::Faulted);
            if from == ConnectorStatus::Faulted {
                prop_assert_eq!(outcome, StatusChangeOutcome::Unchanged);
            } else {
                prop_assert!(matches!(outcome, StatusChangeOutcome::Changed { .. }));
            }
        }
    }

    #[test]
    fn boot_then_available() {
        let mut c = Connector::new(1);
        assert_eq!(c.set_status(ConnectorStatus::Available), StatusChangeOutcome::Changed { previous: ConnectorStatus::Unavailable });
    }

    #[test]
    fn same_to_same_is_suppressed() {
        let mut c = Connector::new(1);
        c.set_status(ConnectorStatus::Available);
        assert_eq!(c.set_status(ConnectorStatus::Available), StatusChangeOutcome::Unchanged);
    }

    #[test]
    fn illegal_jump_is_rejected() {
        let mut c = Connector::new(1);
        c.set_status(ConnectorStatus::Available);
        // Available -> Charging directly skips Preparing.
        let outcome = c.set_status(ConnectorStatus::Charging);
        assert!(matches!(outcome, StatusChangeOutcome::Rejected { .. }));
        assert_eq!(c.status, ConnectorStatus::Available);
    }

    #[test]
    fn full_charging_cycle() {
        let mut c = Connector::new(1);
        c.set_status(ConnectorStatus::Available);
        assert!(matches!(c.set_status(ConnectorStatus::Preparing), StatusChangeOutcome::Changed { .. }));
        assert!(matches!(c.set_status(ConnectorStatus::Charging), StatusChangeOutcome::Changed { .. }));
        assert!(matches!(c.set_status(ConnectorStatus::Finishing), StatusChangeOutcome::Changed { .. }));
        assert!(matches!(c.set_status(ConnectorStatus::Available), StatusChangeOutcome::Changed { .. }));
    }

    #[test]
    fn fault_from_any_state_then_clear() {
        let mut c = Connector::new(1);
        c.set_status(ConnectorStatus::Available);
        c.set_status(ConnectorStatus::Preparing);
        assert!(matches!(c.set_status(ConnectorStatus::Faulted), StatusChangeOutcome::Changed { .. }));
        assert!(matches!(c.set_status(ConnectorStatus::Available), StatusChangeOutcome::Changed { .. }));
    }

    #[test]
    fn is_transacting_matches_p1() {
        let mut c = Connector::new(1);
        c.set_status(ConnectorStatus::Available);
        c.set_status(ConnectorStatus::Preparing);
        c.set_status(ConnectorStatus::Charging);
        assert!(c.is_transacting());
        c.set_status(ConnectorStatus::SuspendedEVSE);
        assert!(c.is_transacting());
    }
}
