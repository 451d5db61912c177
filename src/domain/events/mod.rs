//! Domain events
//!
//! Event types that represent facts about what happened on a simulated
//! charge point. The fan-out implementation lives in `src/supervisor`.

pub mod types;

pub use types::{Event, EventMessage};
