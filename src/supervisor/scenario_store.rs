//! Per-CP registry of loaded scenario definitions and their running
//! executors. One store per `CpEndpoint`; scenarios are addressed by
//! `(connector_id, scenario_id)`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::chargepoint::ChargePointRuntime;
use crate::scenario::{ExecutionContext, RunMode, ScenarioDefinition, ScenarioExecutor};

struct ScenarioEntry {
    definition: ScenarioDefinition,
    executor: Option<Arc<ScenarioExecutor>>,
}

#[derive(Default)]
pub struct ScenarioStore {
    entries: Mutex<HashMap<String, ScenarioEntry>>,
}

impl ScenarioStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(&self, definition: ScenarioDefinition) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            definition.id.clone(),
            ScenarioEntry {
                definition,
                executor: None,
            },
        );
    }

    pub async fn list(&self, connector_id: u32) -> Vec<(String, String)> {
        let entries = self.entries.lock().await;
        entries
            .values()
            .filter(|e| e.definition.target.connector_id == connector_id)
            .map(|e| (e.definition.id.clone(), e.definition.name.clone()))
            .collect()
    }

    pub async fn run(
        &self,
        scenario_id: &str,
        charge_point: Arc<ChargePointRuntime>,
        mode: RunMode,
    ) -> Option<Arc<ScenarioExecutor>> {
        let definition = {
            let entries = self.entries.lock().await;
            entries.get(scenario_id)?.definition.clone()
        };
        let executor = ScenarioExecutor::new(definition, charge_point, mode);
        tokio::spawn(executor.clone().run());
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(scenario_id) {
            entry.executor = Some(executor.clone());
        }
        Some(executor)
    }

    pub async fn status(&self, scenario_id: &str) -> Option<ExecutionContext> {
        let entries = self.entries.lock().await;
        let executor = entries.get(scenario_id)?.executor.clone()?;
        Some(executor.snapshot().await)
    }

    pub async fn stop(&self, scenario_id: &str) -> bool {
        let entries = self.entries.lock().await;
        match entries.get(scenario_id).and_then(|e| e.executor.clone()) {
            Some(executor) => {
                executor.stop();
                true
            }
            None => false,
        }
    }

    pub async fn stop_all(&self, connector_id: u32) {
        let entries = self.entries.lock().await;
        for entry in entries.values() {
            if entry.definition.target.connector_id == connector_id {
                if let Some(executor) = &entry.executor {
                    executor.stop();
                }
            }
        }
    }
}
