//! The Charge Point: boot sequence, timers, command API and incoming-Call
//! dispatch, built around the actor in `runtime`.

pub mod boot;
pub mod commands;
pub mod heartbeat;
pub mod incoming;
pub mod meter;
pub mod runtime;

pub use runtime::{ChargePointConfig, ChargePointRuntime};
