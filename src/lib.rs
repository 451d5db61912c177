//! # CP Simulator
//!
//! An OCPP 1.6J Charge Point simulator: it impersonates one or more
//! charging stations, speaking the CSMS-facing WebSocket protocol while
//! exposing a local control channel an operator (or a scripted test
//! harness) drives instead of real hardware.
//!
//! ## Architecture
//!
//! - **support**: wire codec, error taxonomy, shutdown coordination
//! - **domain**: charge point, connector, transaction, charging profile,
//!   event entities — plain data, no I/O
//! - **engine**: outbound call correlation (Call ↔ CallResult/CallError)
//! - **transport**: the single outbound WebSocket per charge point
//! - **chargepoint**: the actor tying transport + engine + domain state
//!   into one running station — boot sequence, timers, command API
//! - **scenario**: the directed-graph interpreter that scripts a charge
//!   point through a sequence of commands
//! - **history**: bounded in-memory ring of state transitions
//! - **supervisor**: the local daemon hosting many charge points behind
//!   one control socket each
//! - **config**: TOML configuration for the daemon

pub mod chargepoint;
pub mod config;
pub mod domain;
pub mod engine;
pub mod history;
pub mod scenario;
pub mod supervisor;
pub mod support;
pub mod transport;

pub use chargepoint::{ChargePointConfig, ChargePointRuntime};
pub use config::{default_config_path, SimulatorConfig};
pub use supervisor::Supervisor;
pub use support::errors::{FatalError, SimError, SimResult};
