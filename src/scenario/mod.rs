//! Scenario graphs and the executor that drives a Charge Point through
//! them.

pub mod definition;
pub mod executor;

pub use definition::{
    ActionSpec, LoopBound, Predicate, ScenarioDefinition, ScenarioNode, ScenarioTarget, ScenarioTargetKind,
};
pub use executor::{ExecutionContext, ExecutionState, RunMode, ScenarioExecutor};
