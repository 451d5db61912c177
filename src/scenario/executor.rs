//! Directed-graph interpreter driving a Charge Point through a scripted
//! sequence. One executor per running scenario; single-threaded within
//! a scenario (only one node fires at a time), many scenarios run
//! concurrently on one Charge Point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::chargepoint::{commands, ChargePointRuntime};
use crate::domain::events::Event;
use crate::support::errors::ScenarioError;
use crate::support::shutdown::ShutdownSignal;

use super::definition::{ActionSpec, LoopBound, Predicate, ScenarioDefinition, ScenarioNode, ScenarioTargetKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExecutionState {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
}

/// `start(mode)`: `oneshot` runs to `End` once; `loop` restarts at the
/// start node every time `End` is reached, until stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RunMode {
    Oneshot,
    Loop,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecutionContext {
    pub scenario_id: String,
    pub current_node: String,
    pub iteration_counters: HashMap<String, u32>,
    pub state: ExecutionState,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ExecutionContext {
    fn new(scenario_id: String, start_node: String) -> Self {
        Self {
            scenario_id,
            current_node: start_node,
            iteration_counters: HashMap::new(),
            state: ExecutionState::Idle,
            started_at: None,
            stopped_at: None,
            error: None,
        }
    }
}

pub struct ScenarioExecutor {
    definition: ScenarioDefinition,
    charge_point: Arc<ChargePointRuntime>,
    context: AsyncMutex<ExecutionContext>,
    stop_signal: ShutdownSignal,
    mode: RunMode,
}

impl ScenarioExecutor {
    pub fn new(definition: ScenarioDefinition, charge_point: Arc<ChargePointRuntime>, mode: RunMode) -> Arc<Self> {
        let context = ExecutionContext::new(definition.id.clone(), definition.start_node.clone());
        Arc::new(Self {
            definition,
            charge_point,
            context: AsyncMutex::new(context),
            stop_signal: ShutdownSignal::new(),
            mode,
        })
    }

    pub async fn snapshot(&self) -> ExecutionContext {
        self.context.lock().await.clone()
    }

    /// Request a stop; takes effect at the next suspension point
    /// (Delay/Wait) or immediately if between nodes. The in-flight
    /// Action, if any, completes.
    pub fn stop(&self) {
        self.stop_signal.trigger();
    }

    pub fn connector_id(&self) -> u32 {
        self.definition.target.connector_id
    }

    async fn set_state(&self, state: ExecutionState) {
        let mut context = self.context.lock().await;
        context.state = state;
        if matches!(state, ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Stopped) {
            context.stopped_at = Some(Utc::now());
        }
    }

    async fn advance(&self, next: String) {
        self.context.lock().await.current_node = next;
    }

    async fn fail(&self, error: ScenarioError) {
        let mut context = self.context.lock().await;
        context.state = ExecutionState::Failed;
        context.error = Some(error.to_string());
        context.stopped_at = Some(Utc::now());
        drop(context);
        self.charge_point.emit(Event::ScenarioError {
            scenario_id: self.definition.id.clone(),
            reason: error.to_string(),
        });
    }

    /// Drive the graph to completion, stop, or failure. Spawn this with
    /// `tokio::spawn(executor.clone().run())`.
    pub async fn run(self: Arc<Self>) {
        {
            let mut context = self.context.lock().await;
            context.state = ExecutionState::Running;
            context.started_at = Some(Utc::now());
        }
        loop {
            if self.stop_signal.is_triggered() {
                self.set_state(ExecutionState::Stopped).await;
                return;
            }
            let node_id = self.context.lock().await.current_node.clone();
            let Some(node) = self.definition.nodes.get(&node_id).cloned() else {
                self.fail(ScenarioError::NodeNotFound(node_id)).await;
                return;
            };
            match node {
                ScenarioNode::Action { action, next } => {
                    if let Err(e) = self.execute_action(&action).await {
                        self.fail(e).await;
                        return;
                    }
                    self.advance(next).await;
                }
                ScenarioNode::Delay { ms, next } => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                            self.advance(next).await;
                        }
                        _ = self.stop_signal.wait() => {
                            self.set_state(ExecutionState::Stopped).await;
                            return;
                        }
                    }
                }
                ScenarioNode::Wait {
                    predicate,
                    timeout_ms,
                    matched,
                    timed_out,
                } => {
                    tokio::select! {
                        _ = self.wait_for_predicate(&predicate) => {
                            self.advance(matched).await;
                        }
                        _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                            if timed_out.is_empty() {
                                self.fail(ScenarioError::WaitTimedOutNoEdge).await;
                                return;
                            }
                            self.advance(timed_out).await;
                        }
                        _ = self.stop_signal.wait() => {
                            self.set_state(ExecutionState::Stopped).await;
                            return;
                        }
                    }
                }
                ScenarioNode::Branch {
                    predicate,
                    when_true,
                    when_false,
                } => {
                    let matched = self.evaluate_predicate(&predicate).await;
                    self.advance(if matched { when_true } else { when_false }).await;
                }
                ScenarioNode::Loop {
                    bound,
                    predicate,
                    body,
                    exit,
                } => {
                    let keep_going = self.evaluate_loop_bound(&node_id, bound, predicate.as_ref()).await;
                    self.advance(if keep_going { body } else { exit }).await;
                }
                ScenarioNode::End => match self.mode {
                    RunMode::Oneshot => {
                        self.set_state(ExecutionState::Completed).await;
                        return;
                    }
                    RunMode::Loop => {
                        self.advance(self.definition.start_node.clone()).await;
                    }
                },
            }
        }
    }

    async fn evaluate_loop_bound(&self, node_id: &str, bound: LoopBound, predicate: Option<&Predicate>) -> bool {
        let mut context = self.context.lock().await;
        let counter = context.iteration_counters.entry(node_id.to_string()).or_insert(0);
        match bound {
            LoopBound::Count(limit) => {
                if *counter < limit {
                    *counter += 1;
                    true
                } else {
                    false
                }
            }
            LoopBound::UntilPredicate => {
                *counter += 1;
                drop(context);
                match predicate {
                    Some(p) => !self.evaluate_predicate(p).await,
                    None => false,
                }
            }
        }
    }

    async fn execute_action(&self, action: &ActionSpec) -> Result<(), ScenarioError> {
        let connector_id = self.connector_id();
        let map_err = |reason: String| ScenarioError::ActionFailed {
            action: action_name(action).to_string(),
            reason,
        };
        match action {
            ActionSpec::StartTransaction { tag_id } => {
                commands::start_transaction(&self.charge_point, connector_id, tag_id.clone())
                    .await
                    .map(|_| ())
                    .map_err(|e| map_err(e.to_string()))
            }
            ActionSpec::StopTransaction => commands::stop_transaction(&self.charge_point, connector_id)
                .await
                .map_err(|e| map_err(e.to_string())),
            ActionSpec::SetMeterValue { delta_wh } => {
                let current = {
                    let state = self.charge_point.state.lock().await;
                    state.get_connector(connector_id).map(|c| c.meter_wh).unwrap_or(0)
                };
                commands::set_meter_value(&self.charge_point, connector_id, current + delta_wh)
                    .await
                    .map_err(|e| map_err(e.to_string()))
            }
            ActionSpec::SendMeterValue => commands::send_meter_value(&self.charge_point, connector_id)
                .await
                .map_err(|e| map_err(e.to_string())),
            ActionSpec::SendHeartbeat => crate::chargepoint::heartbeat::send_heartbeat(&self.charge_point)
                .await
                .map_err(|e| map_err(e.to_string())),
            ActionSpec::Authorize { tag_id } => commands::authorize(&self.charge_point, tag_id.clone())
                .await
                .map(|_| ())
                .map_err(|e| map_err(e.to_string())),
            ActionSpec::UpdateConnectorStatus { status } => {
                commands::update_connector_status(&self.charge_point, connector_id, *status)
                    .await
                    .map_err(|e| map_err(e.to_string()))
            }
            ActionSpec::UpdateConnectorAvailability { availability } => {
                commands::update_connector_availability(&self.charge_point, connector_id, *availability)
                    .await
                    .map_err(|e| map_err(e.to_string()))
            }
        }
    }

    async fn wait_for_predicate(&self, predicate: &Predicate) {
        loop {
            if self.evaluate_predicate(predicate).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn evaluate_predicate(&self, predicate: &Predicate) -> bool {
        if self.definition.target.kind != ScenarioTargetKind::Connector {
            warn!(scenario_id = %self.definition.id, "predicate evaluated against a chargePoint-scoped scenario");
        }
        let state = self.charge_point.state.lock().await;
        let Some(connector) = state.get_connector(self.connector_id()) else {
            return false;
        };
        match predicate {
            Predicate::ConnectorStatusEquals(want) => connector.status == *want,
            Predicate::MeterAtLeast(target) => connector.meter_wh >= *target,
            Predicate::HasActiveTransaction(want) => connector.transaction.is_some() == *want,
        }
    }
}

fn action_name(action: &ActionSpec) -> &'static str {
    match action {
        ActionSpec::StartTransaction { .. } => "startTransaction",
        ActionSpec::StopTransaction => "stopTransaction",
        ActionSpec::SetMeterValue { .. } => "setMeterValue",
        ActionSpec::SendMeterValue => "sendMeterValue",
        ActionSpec::SendHeartbeat => "sendHeartbeat",
        ActionSpec::Authorize { .. } => "authorize",
        ActionSpec::UpdateConnectorStatus { .. } => "updateConnectorStatus",
        ActionSpec::UpdateConnectorAvailability { .. } => "updateConnectorAvailability",
    }
}
