//! Scenario graph: nodes, edges, and the predicates Wait/Branch evaluate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::connector::{Availability, ConnectorStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScenarioTargetKind {
    ChargePoint,
    Connector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioTarget {
    pub kind: ScenarioTargetKind,
    /// Connector id; ignored when `kind` is `ChargePoint`.
    pub connector_id: u32,
}

/// A named command invoked by an Action node. Mirrors the Charge Point
/// command API (spec §4.5); `delta_wh` on `SetMeterValue` lets a scenario
/// ramp the meter relative to its current value rather than overwrite it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", content = "params")]
pub enum ActionSpec {
    StartTransaction { tag_id: String },
    StopTransaction,
    SetMeterValue { delta_wh: i64 },
    SendMeterValue,
    SendHeartbeat,
    Authorize { tag_id: String },
    UpdateConnectorStatus { status: ConnectorStatus },
    UpdateConnectorAvailability { availability: Availability },
}

/// A condition evaluated against the target connector's live state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "predicate", content = "params")]
pub enum Predicate {
    ConnectorStatusEquals(ConnectorStatus),
    MeterAtLeast(i64),
    HasActiveTransaction(bool),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum LoopBound {
    Count(u32),
    UntilPredicate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ScenarioNode {
    Action { action: ActionSpec, next: String },
    Delay { ms: u64, next: String },
    Wait {
        predicate: Predicate,
        timeout_ms: u64,
        matched: String,
        /// Empty means "no `timedOut` edge": a timeout is then a
        /// `ScenarioError::WaitTimedOutNoEdge` failure (spec §4.6).
        timed_out: String,
    },
    Branch {
        predicate: Predicate,
        when_true: String,
        when_false: String,
    },
    Loop {
        bound: LoopBound,
        predicate: Option<Predicate>,
        body: String,
        exit: String,
    },
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub id: String,
    pub name: String,
    pub target: ScenarioTarget,
    pub start_node: String,
    pub nodes: HashMap<String, ScenarioNode>,
}
