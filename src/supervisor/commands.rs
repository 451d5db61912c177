//! Dispatch table for the local control channel (spec §6's command
//! table), closed over one `CpEndpoint`.

use serde_json::{json, Value};

use crate::chargepoint::{commands as cp_commands, heartbeat};
use crate::domain::connector::{Availability, ConnectorStatus};
use crate::scenario::{RunMode, ScenarioDefinition};
use crate::support::errors::InputError;

use super::daemon::{CpEndpoint, Supervisor};
use super::protocol::{Request, Response};

pub enum DispatchOutcome {
    Response(Response),
    Subscribe,
    Shutdown,
}

pub async fn dispatch(supervisor: &Supervisor, endpoint: &CpEndpoint, request: Request) -> DispatchOutcome {
    let id = request.id.clone();
    match request.command.as_str() {
        "subscribe" => return DispatchOutcome::Subscribe,
        "shutdown" => return DispatchOutcome::Shutdown,
        _ => {}
    }
    let _ = supervisor;
    let result = run_command(endpoint, &request.command, request.params.unwrap_or(Value::Null)).await;
    DispatchOutcome::Response(match result {
        Ok(data) => Response::ok(id, data),
        Err(message) => Response::err(id, message),
    })
}

async fn run_command(endpoint: &CpEndpoint, command: &str, params: Value) -> Result<Value, String> {
    match command {
        "connect" => {
            endpoint.runtime.connect().await.map_err(|e| e.to_string())?;
            Ok(json!(null))
        }
        "disconnect" => {
            endpoint.runtime.disconnect().await;
            Ok(json!(null))
        }
        "status" => Ok(status_snapshot(endpoint).await),
        "start_transaction" => {
            let connector = require_u32(&params, "connector")?;
            let tag_id = require_str(&params, "tagId")?;
            let local_ref = cp_commands::start_transaction(&endpoint.runtime, connector, tag_id)
                .await
                .map_err(|e| e.to_string())?;
            Ok(json!({ "localRef": local_ref }))
        }
        "stop_transaction" => {
            let connector = require_u32(&params, "connector")?;
            cp_commands::stop_transaction(&endpoint.runtime, connector)
                .await
                .map_err(|e| e.to_string())?;
            Ok(json!(null))
        }
        "set_meter_value" => {
            let connector = require_u32(&params, "connector")?;
            let value = require_i64(&params, "value")?;
            cp_commands::set_meter_value(&endpoint.runtime, connector, value)
                .await
                .map_err(|e| e.to_string())?;
            Ok(json!(null))
        }
        "send_meter_value" => {
            let connector = require_u32(&params, "connector")?;
            cp_commands::send_meter_value(&endpoint.runtime, connector)
                .await
                .map_err(|e| e.to_string())?;
            Ok(json!(null))
        }
        "heartbeat" => {
            heartbeat::send_heartbeat(&endpoint.runtime).await.map_err(|e| e.to_string())?;
            Ok(json!(null))
        }
        "start_heartbeat" => {
            let interval = require_u32(&params, "interval")? as u64;
            heartbeat::start_heartbeat(&endpoint.runtime, interval)
                .await
                .map_err(|e| e.to_string())?;
            Ok(json!(null))
        }
        "stop_heartbeat" => {
            heartbeat::stop_heartbeat(&endpoint.runtime).await;
            Ok(json!(null))
        }
        "authorize" => {
            let tag_id = require_str(&params, "tagId")?;
            let accepted = cp_commands::authorize(&endpoint.runtime, tag_id)
                .await
                .map_err(|e| e.to_string())?;
            Ok(json!({ "accepted": accepted }))
        }
        "update_connector_status" => {
            let connector = require_u32(&params, "connector")?;
            let status = parse_connector_status(&require_str(&params, "status")?)?;
            cp_commands::update_connector_status(&endpoint.runtime, connector, status)
                .await
                .map_err(|e| e.to_string())?;
            Ok(json!(null))
        }
        "update_connector_availability" => {
            let connector = require_u32(&params, "connector")?;
            let available = require_str(&params, "availability")? == "Operative";
            let availability = if available {
                Availability::Operative
            } else {
                Availability::Inoperative
            };
            cp_commands::update_connector_availability(&endpoint.runtime, connector, availability)
                .await
                .map_err(|e| e.to_string())?;
            Ok(json!(null))
        }
        "list_scenario_templates" => Ok(json!([])),
        "load_scenario_template" => {
            Err("no scenario template catalog is configured".to_string())
        }
        "load_scenario" => {
            let definition = load_scenario_definition(&params).await?;
            let scenario_id = definition.id.clone();
            endpoint.scenarios.load(definition).await;
            Ok(json!({ "scenarioId": scenario_id }))
        }
        "list_scenarios" => {
            let connector = require_u32(&params, "connector")?;
            let scenarios = endpoint.scenarios.list(connector).await;
            Ok(json!(scenarios
                .into_iter()
                .map(|(id, name)| json!({ "id": id, "name": name }))
                .collect::<Vec<_>>()))
        }
        "run_scenario" => {
            let scenario_id = require_str(&params, "scenarioId")?;
            let mode = if params.get("mode").and_then(|v| v.as_str()) == Some("loop") {
                RunMode::Loop
            } else {
                RunMode::Oneshot
            };
            match endpoint.scenarios.run(&scenario_id, endpoint.runtime.clone(), mode).await {
                Some(_) => Ok(json!(null)),
                None => Err(format!("scenario {scenario_id} not found")),
            }
        }
        "scenario_status" => {
            let scenario_id = require_str(&params, "scenarioId")?;
            match endpoint.scenarios.status(&scenario_id).await {
                Some(context) => Ok(serde_json::to_value(context).unwrap_or(json!(null))),
                None => Err(format!("scenario {scenario_id} not running")),
            }
        }
        "stop_scenario" => {
            let scenario_id = require_str(&params, "scenarioId")?;
            if endpoint.scenarios.stop(&scenario_id).await {
                Ok(json!(null))
            } else {
                Err(format!("scenario {scenario_id} not running"))
            }
        }
        "stop_all_scenarios" => {
            let connector = require_u32(&params, "connector")?;
            endpoint.scenarios.stop_all(connector).await;
            Ok(json!(null))
        }
        other => Err(InputError::UnknownCommand(other.to_string()).to_string()),
    }
}

async fn status_snapshot(endpoint: &CpEndpoint) -> Value {
    let state = endpoint.runtime.state.lock().await;
    json!({
        "cpId": endpoint.cp_id,
        "status": format!("{:?}", state.status),
        "connectors": state.connectors.iter().map(|c| json!({
            "id": c.id,
            "status": format!("{:?}", c.status),
            "availability": format!("{:?}", c.availability),
            "meterWh": c.meter_wh,
            "transaction": c.transaction.as_ref().map(|t| json!({
                "localRef": t.local_ref,
                "serverId": t.server_id,
                "idTag": t.id_tag,
            })),
        })).collect::<Vec<_>>(),
    })
}

async fn load_scenario_definition(params: &Value) -> Result<ScenarioDefinition, String> {
    if let Some(inline) = params.get("scenario") {
        return serde_json::from_value(inline.clone()).map_err(|e| format!("invalid scenario definition: {e}"));
    }
    if let Some(path) = params.get("file").and_then(|v| v.as_str()) {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("cannot read scenario file {path}: {e}"))?;
        return serde_json::from_str(&contents).map_err(|e| format!("invalid scenario file {path}: {e}"));
    }
    Err("load_scenario requires either `scenario` or `file`".to_string())
}

fn parse_connector_status(raw: &str) -> Result<ConnectorStatus, String> {
    serde_json::from_value(json!(raw)).map_err(|_| format!("unknown connector status: {raw}"))
}

fn require_u32(params: &Value, field: &'static str) -> Result<u32, String> {
    params
        .get(field)
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .ok_or_else(|| InputError::MissingParam(field).to_string())
}

fn require_i64(params: &Value, field: &'static str) -> Result<i64, String> {
    params
        .get(field)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| InputError::MissingParam(field).to_string())
}

fn require_str(params: &Value, field: &'static str) -> Result<String, String> {
    params
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| InputError::MissingParam(field).to_string())
}
