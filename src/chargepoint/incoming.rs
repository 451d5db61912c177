//! Dispatch table for CSMS-initiated Calls, and routing of incoming
//! frames to either this table or the message engine's pending-call
//! resolution.

use std::sync::Arc;

use chrono::Utc;
use rust_ocpp::v1_6::messages::change_availability::{ChangeAvailabilityRequest, ChangeAvailabilityResponse};
use rust_ocpp::v1_6::messages::change_configuration::{ChangeConfigurationRequest, ChangeConfigurationResponse};
use rust_ocpp::v1_6::messages::clear_cache::{ClearCacheRequest, ClearCacheResponse};
use rust_ocpp::v1_6::messages::clear_charging_profile::{ClearChargingProfileRequest, ClearChargingProfileResponse};
use rust_ocpp::v1_6::messages::get_composite_schedule::{GetCompositeScheduleRequest, GetCompositeScheduleResponse};
use rust_ocpp::v1_6::messages::get_configuration::{GetConfigurationRequest, GetConfigurationResponse};
use rust_ocpp::v1_6::messages::get_diagnostics::{GetDiagnosticsRequest, GetDiagnosticsResponse};
use rust_ocpp::v1_6::messages::remote_start_transaction::{RemoteStartTransactionRequest, RemoteStartTransactionResponse};
use rust_ocpp::v1_6::messages::remote_stop_transaction::{RemoteStopTransactionRequest, RemoteStopTransactionResponse};
use rust_ocpp::v1_6::messages::reset::{ResetRequest, ResetResponse};
use rust_ocpp::v1_6::messages::set_charging_profile::{SetChargingProfileRequest, SetChargingProfileResponse};
use rust_ocpp::v1_6::messages::trigger_message::{TriggerMessageRequest, TriggerMessageResponse};
use rust_ocpp::v1_6::messages::unlock_connector::{UnlockConnectorRequest, UnlockConnectorResponse};
use rust_ocpp::v1_6::types::{
    AvailabilityStatus, AvailabilityType, ChargingProfile, ChargingProfileKindType, ChargingProfilePurposeType,
    ChargingProfileStatus, ChargingRateUnitType, ChargingSchedule as OcppChargingSchedule, ChargingSchedulePeriod,
    ClearCacheStatus, ClearChargingProfileStatus, ConfigurationStatus, GetCompositeScheduleStatus, KeyValue,
    RemoteStartStopStatus, ResetRequestStatus, ResetStatus, TriggerMessageStatus, UnlockStatus,
};
use serde::Serialize;
use serde_json::Value;

use crate::domain::charging_profile::{
    ActiveChargingProfile, ChargingProfileKind, ChargingProfilePurpose, ChargingRateUnit, SchedulePeriod,
    select_active_profile,
};
use crate::domain::connector::{Availability, ConnectorStatus};
use crate::support::ocpp_frame::OcppFrame;

use super::commands;
use super::runtime::ChargePointRuntime;

pub async fn handle_frame(runtime: &Arc<ChargePointRuntime>, frame: OcppFrame) {
    match frame {
        OcppFrame::Call {
            unique_id,
            action,
            payload,
        } => {
            let response = dispatch_call(runtime, &action, payload).await;
            let reply = match response {
                Ok(result_payload) => OcppFrame::CallResult {
                    unique_id,
                    payload: result_payload,
                },
                Err((code, description)) => OcppFrame::error_response(unique_id, code, description),
            };
            let _ = runtime.transport.send(&reply).await;
        }
        OcppFrame::CallResult { unique_id, payload } => {
            runtime.engine.handle_call_result(&unique_id, payload);
        }
        OcppFrame::CallError {
            unique_id,
            error_code,
            error_description,
            error_details,
        } => {
            runtime
                .engine
                .handle_call_error(&unique_id, error_code, error_description, error_details);
        }
    }
}

type CallResponse = Result<Value, (String, String)>;

/// Serialize a typed `.conf` payload; every response constructed here is
/// our own well-formed struct, never something fallible to encode.
fn ok<T: Serialize>(response: T) -> CallResponse {
    Ok(serde_json::to_value(&response).expect("OCPP response struct always serializes"))
}

fn malformed(action: &str, err: impl std::fmt::Display) -> (String, String) {
    ("TypeConstraintViolation".into(), format!("malformed {action}.req: {err}"))
}

/// Route an incoming Call by action name. Unknown actions produce
/// `NotImplemented` (spec §4.1/§4.3), not a decode failure.
async fn dispatch_call(runtime: &Arc<ChargePointRuntime>, action: &str, payload: Value) -> CallResponse {
    match action {
        "RemoteStartTransaction" => remote_start_transaction(runtime, payload).await,
        "RemoteStopTransaction" => remote_stop_transaction(runtime, payload).await,
        "Reset" => reset(runtime, payload).await,
        "GetDiagnostics" => get_diagnostics(runtime, payload).await,
        "TriggerMessage" => trigger_message(payload),
        "GetConfiguration" => get_configuration(payload),
        "ChangeConfiguration" => change_configuration(payload),
        "ClearCache" => clear_cache(payload),
        "UnlockConnector" => unlock_connector(payload),
        "ChangeAvailability" => change_availability(runtime, payload).await,
        "SetChargingProfile" => set_charging_profile(runtime, payload).await,
        "ClearChargingProfile" => clear_charging_profile(runtime, payload).await,
        "GetCompositeSchedule" => get_composite_schedule(runtime, payload).await,
        other => Err(("NotImplemented".into(), format!("unsupported action: {other}"))),
    }
}

async fn remote_start_transaction(runtime: &Arc<ChargePointRuntime>, payload: Value) -> CallResponse {
    let request: RemoteStartTransactionRequest =
        serde_json::from_value(payload).map_err(|e| malformed("RemoteStartTransaction", e))?;
    let connector_id = request.connector_id.unwrap_or(0) as u32;
    let id_tag = request.id_tag;
    let exists_and_operative = {
        let state = runtime.state.lock().await;
        state
            .get_connector(connector_id)
            .map(|c| c.availability == Availability::Operative)
            .unwrap_or(false)
    };
    if !exists_and_operative {
        return ok(RemoteStartTransactionResponse {
            status: RemoteStartStopStatus::Rejected,
        });
    }
    let runtime = runtime.clone();
    tokio::spawn(async move {
        let _ = commands::start_transaction(&runtime, connector_id, id_tag).await;
    });
    ok(RemoteStartTransactionResponse {
        status: RemoteStartStopStatus::Accepted,
    })
}

async fn remote_stop_transaction(runtime: &Arc<ChargePointRuntime>, payload: Value) -> CallResponse {
    let request: RemoteStopTransactionRequest =
        serde_json::from_value(payload).map_err(|e| malformed("RemoteStopTransaction", e))?;
    let connector_id = {
        let state = runtime.state.lock().await;
        state.connectors.iter().find_map(|c| {
            c.transaction
                .as_ref()
                .filter(|t| t.server_id == Some(request.transaction_id))
                .map(|_| c.id)
        })
    };
    match connector_id {
        Some(connector_id) => {
            let runtime = runtime.clone();
            tokio::spawn(async move {
                // spec §4.3: locate by active transaction id, move to
                // SuspendedEVSE, then stop.
                if let Err(err) =
                    commands::update_connector_status(&runtime, connector_id, ConnectorStatus::SuspendedEVSE).await
                {
                    tracing::warn!(connector_id, %err, "SuspendedEVSE transition failed before RemoteStopTransaction");
                }
                let _ = commands::stop_transaction(&runtime, connector_id).await;
            });
            ok(RemoteStopTransactionResponse {
                status: RemoteStartStopStatus::Accepted,
            })
        }
        None => ok(RemoteStopTransactionResponse {
            status: RemoteStartStopStatus::Rejected,
        }),
    }
}

async fn reset(runtime: &Arc<ChargePointRuntime>, payload: Value) -> CallResponse {
    let request: ResetRequest = serde_json::from_value(payload).map_err(|e| malformed("Reset", e))?;
    let hard = request.kind == ResetRequestStatus::Hard;
    commands::reset(runtime, hard).await;
    ok(ResetResponse {
        status: ResetStatus::Accepted,
    })
}

async fn get_diagnostics(runtime: &Arc<ChargePointRuntime>, payload: Value) -> CallResponse {
    let _request: GetDiagnosticsRequest = serde_json::from_value(payload).map_err(|e| malformed("GetDiagnostics", e))?;
    let file_name = format!("diagnostics-{}-{}.json", runtime.config.cp_id, Utc::now().timestamp());
    ok(GetDiagnosticsResponse {
        file_name: Some(file_name),
    })
}

fn trigger_message(payload: Value) -> CallResponse {
    let _request: TriggerMessageRequest = serde_json::from_value(payload).map_err(|e| malformed("TriggerMessage", e))?;
    ok(TriggerMessageResponse {
        status: TriggerMessageStatus::Accepted,
    })
}

fn get_configuration(payload: Value) -> CallResponse {
    let request: GetConfigurationRequest = serde_json::from_value(payload).map_err(|e| malformed("GetConfiguration", e))?;
    let requested = request.key.unwrap_or_default();
    let known = ["HeartbeatInterval", "MeterValueSampleInterval"];
    let mut configuration_key = Vec::new();
    let mut unknown_key = Vec::new();
    let keys_to_check: Vec<&str> = if requested.is_empty() {
        known.to_vec()
    } else {
        requested.iter().map(String::as_str).collect()
    };
    for key in keys_to_check {
        if known.contains(&key) {
            configuration_key.push(KeyValue {
                key: key.to_string(),
                readonly: true,
                value: Some(String::new()),
            });
        } else {
            unknown_key.push(key.to_string());
        }
    }
    ok(GetConfigurationResponse {
        configuration_key: Some(configuration_key),
        unknown_key: Some(unknown_key),
    })
}

fn change_configuration(payload: Value) -> CallResponse {
    let _request: ChangeConfigurationRequest =
        serde_json::from_value(payload).map_err(|e| malformed("ChangeConfiguration", e))?;
    ok(ChangeConfigurationResponse {
        status: ConfigurationStatus::NotSupported,
    })
}

fn clear_cache(payload: Value) -> CallResponse {
    let _request: ClearCacheRequest = serde_json::from_value(payload).map_err(|e| malformed("ClearCache", e))?;
    ok(ClearCacheResponse {
        status: ClearCacheStatus::Accepted,
    })
}

fn unlock_connector(payload: Value) -> CallResponse {
    let _request: UnlockConnectorRequest = serde_json::from_value(payload).map_err(|e| malformed("UnlockConnector", e))?;
    ok(UnlockConnectorResponse {
        status: UnlockStatus::NotSupported,
    })
}

async fn change_availability(runtime: &Arc<ChargePointRuntime>, payload: Value) -> CallResponse {
    let request: ChangeAvailabilityRequest =
        serde_json::from_value(payload).map_err(|e| malformed("ChangeAvailability", e))?;
    let connector_id = request.connector_id;
    let availability = if request.kind == AvailabilityType::Inoperative {
        Availability::Inoperative
    } else {
        Availability::Operative
    };

    let ids: Vec<u32> = if connector_id == 0 {
        let state = runtime.state.lock().await;
        state.connectors.iter().map(|c| c.id).collect()
    } else {
        vec![connector_id]
    };
    let mut any_deferred = false;
    for id in ids {
        let deferred = {
            let state = runtime.state.lock().await;
            state
                .get_connector(id)
                .map(|c| availability == Availability::Inoperative && c.is_transacting())
                .unwrap_or(false)
        };
        any_deferred |= deferred;
        let _ = commands::update_connector_availability(runtime, id, availability).await;
    }
    ok(ChangeAvailabilityResponse {
        status: if any_deferred {
            AvailabilityStatus::Scheduled
        } else {
            AvailabilityStatus::Accepted
        },
    })
}

async fn set_charging_profile(runtime: &Arc<ChargePointRuntime>, payload: Value) -> CallResponse {
    let request: SetChargingProfileRequest =
        serde_json::from_value(payload).map_err(|e| malformed("SetChargingProfile", e))?;
    let connector_id = request.connector_id.max(0) as u32;
    let profile = active_profile_from_wire(connector_id, &request.cs_charging_profiles);
    let mut state = runtime.state.lock().await;
    if let Some(connector) = state.get_connector_mut(connector_id) {
        connector.install_profile(profile);
        ok(SetChargingProfileResponse {
            status: ChargingProfileStatus::Accepted,
        })
    } else {
        ok(SetChargingProfileResponse {
            status: ChargingProfileStatus::Rejected,
        })
    }
}

fn active_profile_from_wire(connector_id: u32, profile: &ChargingProfile) -> ActiveChargingProfile {
    let purpose = match profile.charging_profile_purpose {
        ChargingProfilePurposeType::ChargePointMaxProfile => ChargingProfilePurpose::ChargePointMaxProfile,
        ChargingProfilePurposeType::TxDefaultProfile => ChargingProfilePurpose::TxDefaultProfile,
        ChargingProfilePurposeType::TxProfile => ChargingProfilePurpose::TxProfile,
    };
    let kind = match profile.charging_profile_kind {
        ChargingProfileKindType::Recurring => ChargingProfileKind::Recurring,
        ChargingProfileKindType::Relative => ChargingProfileKind::Relative,
        ChargingProfileKindType::Absolute => ChargingProfileKind::Absolute,
    };
    let unit = match profile.charging_schedule.charging_rate_unit {
        ChargingRateUnitType::A => ChargingRateUnit::A,
        ChargingRateUnitType::W => ChargingRateUnit::W,
    };
    let schedule_periods = profile
        .charging_schedule
        .charging_schedule_period
        .iter()
        .map(|p: &ChargingSchedulePeriod| SchedulePeriod {
            start_period: p.start_period.max(0) as u32,
            limit: p.limit as f64,
        })
        .collect();
    ActiveChargingProfile {
        profile_id: profile.charging_profile_id,
        connector_id,
        stack_level: profile.stack_level,
        purpose,
        kind,
        unit,
        recurrency: None,
        valid_from: profile.valid_from,
        valid_to: profile.valid_to,
        schedule_periods,
        installed_at: Utc::now(),
    }
}

async fn clear_charging_profile(runtime: &Arc<ChargePointRuntime>, payload: Value) -> CallResponse {
    let request: ClearChargingProfileRequest =
        serde_json::from_value(payload).map_err(|e| malformed("ClearChargingProfile", e))?;
    let filter_profile_id = request.id;
    let filter_connector_id = request.connector_id.map(|i| i.max(0) as u32);
    let filter_stack_level = request.stack_level;

    let mut state = runtime.state.lock().await;
    let mut removed = 0;
    for connector in state.connectors.iter_mut() {
        if let Some(want) = filter_connector_id {
            if connector.id != want {
                continue;
            }
        }
        removed += connector.clear_profiles(|p| {
            filter_profile_id.map_or(true, |id| id == p.profile_id)
                && filter_stack_level.map_or(true, |level| level == p.stack_level)
        });
    }
    ok(ClearChargingProfileResponse {
        status: if removed > 0 {
            ClearChargingProfileStatus::Accepted
        } else {
            ClearChargingProfileStatus::Unknown
        },
    })
}

async fn get_composite_schedule(runtime: &Arc<ChargePointRuntime>, payload: Value) -> CallResponse {
    let request: GetCompositeScheduleRequest =
        serde_json::from_value(payload).map_err(|e| malformed("GetCompositeSchedule", e))?;
    let connector_id = request.connector_id.max(0) as u32;
    let now = Utc::now();
    let state = runtime.state.lock().await;
    let Some(connector) = state.get_connector(connector_id) else {
        return ok(GetCompositeScheduleResponse {
            status: GetCompositeScheduleStatus::Rejected,
            connector_id: None,
            schedule_start: None,
            charging_schedule: None,
        });
    };
    match select_active_profile(&connector.charging_profiles, now) {
        Some(profile) => ok(GetCompositeScheduleResponse {
            status: GetCompositeScheduleStatus::Accepted,
            connector_id: Some(connector_id as i32),
            schedule_start: Some(now),
            charging_schedule: Some(OcppChargingSchedule {
                duration: None,
                start_schedule: None,
                charging_rate_unit: match profile.unit {
                    ChargingRateUnit::A => ChargingRateUnitType::A,
                    ChargingRateUnit::W => ChargingRateUnitType::W,
                },
                charging_schedule_period: profile
                    .schedule_periods
                    .iter()
                    .map(|p| ChargingSchedulePeriod {
                        start_period: p.start_period as i32,
                        limit: p.limit as f32,
                        number_phases: None,
                    })
                    .collect(),
                min_charging_rate: None,
            }),
        }),
        None => ok(GetCompositeScheduleResponse {
            status: GetCompositeScheduleStatus::Rejected,
            connector_id: None,
            schedule_start: None,
            charging_schedule: None,
        }),
    }
}
