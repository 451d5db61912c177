//! The OCPP message engine: Call/CallResult/CallError correlation.

pub mod message_engine;
pub mod pending;

pub use message_engine::MessageEngine;
pub use pending::{CallHandle, CallOutcome};
