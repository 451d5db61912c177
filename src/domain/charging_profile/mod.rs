//! Charging profile aggregate: installed schedules and composite selection.

pub mod model;

pub use model::{
    ActiveChargingProfile, ChargingProfileKind, ChargingProfilePurpose, ChargingRateUnit,
    RecurrencyKind, SchedulePeriod, select_active_profile,
};
