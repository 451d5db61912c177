//! Boot sequence: BootNotification and what follows Accepted/Rejected.

use std::sync::Arc;

use rust_ocpp::v1_6::messages::boot_notification::{BootNotificationRequest, BootNotificationResponse};
use rust_ocpp::v1_6::types::RegistrationStatus;

use crate::domain::charge_point::ChargePointStatus;
use crate::domain::connector::{ConnectorStatus, StatusChangeOutcome};
use crate::domain::events::Event;
use crate::engine::CallOutcome;
use crate::history::{HistoryEntity, Source, TransitionType, ValidationLevel};
use crate::support::errors::SimError;

use super::commands::apply_connector_transition;
use super::runtime::ChargePointRuntime;

const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// Run steps 3-4 of the boot sequence (the caller has already opened the
/// transport, emitted `connected`, and moved the top status to
/// Unavailable).
pub async fn run_boot_sequence(runtime: &Arc<ChargePointRuntime>) -> Result<(), SimError> {
    let (vendor, model, serial, firmware) = {
        let state = runtime.state.lock().await;
        (
            state.vendor.clone().unwrap_or_default(),
            state.model.clone().unwrap_or_default(),
            state.serial_number.clone(),
            state.firmware_version.clone(),
        )
    };

    let request = BootNotificationRequest {
        charge_point_vendor: vendor,
        charge_point_model: model,
        charge_box_serial_number: None,
        charge_point_serial_number: serial,
        firmware_version: firmware,
        iccid: None,
        imsi: None,
        meter_serial_number: None,
        meter_type: None,
    };
    let payload = serde_json::to_value(&request).expect("BootNotificationRequest always serializes");

    let handle = runtime
        .engine
        .send_call(&runtime.transport, "BootNotification", payload, None)
        .await?;

    match handle.wait().await {
        CallOutcome::Result(response) => match serde_json::from_value::<BootNotificationResponse>(response) {
            Ok(response) if response.status == RegistrationStatus::Accepted => {
                let interval = if response.interval > 0 {
                    response.interval as u64
                } else {
                    DEFAULT_HEARTBEAT_INTERVAL_SECS
                };
                accept_boot(runtime, interval).await;
            }
            Ok(response) => {
                reject_boot(runtime, format!("BootNotification {:?}", response.status)).await;
            }
            Err(err) => {
                reject_boot(runtime, format!("malformed BootNotification.conf: {err}")).await;
            }
        },
        CallOutcome::Error { code, description, .. } => {
            reject_boot(runtime, format!("{code}: {description}")).await;
        }
        CallOutcome::TransportLost | CallOutcome::Superseded => {
            reject_boot(runtime, "transport lost during boot".into()).await;
        }
    }
    Ok(())
}

async fn accept_boot(runtime: &Arc<ChargePointRuntime>, heartbeat_interval_secs: u64) {
    let outcomes: Vec<(u32, StatusChangeOutcome)> = {
        let mut state = runtime.state.lock().await;
        state.heartbeat_interval_secs = heartbeat_interval_secs;
        state.set_status(ChargePointStatus::Available);
        state
            .connectors
            .iter_mut()
            .map(|c| (c.id, c.set_status(ConnectorStatus::Available)))
            .collect()
    };
    runtime.record_history(
        HistoryEntity::ChargePoint,
        0,
        TransitionType::Status,
        "Unavailable",
        "Available",
        Source::System,
        true,
        ValidationLevel::Ok,
        None,
    );
    runtime.emit(Event::StatusChange {
        status: "Available".into(),
    });
    for (connector_id, outcome) in outcomes {
        if let Err(err) = apply_connector_transition(runtime, connector_id, &outcome, ConnectorStatus::Available).await {
            tracing::warn!(connector_id, %err, "StatusNotification(Available) failed during boot");
        }
        if let StatusChangeOutcome::Changed { previous } = outcome {
            runtime.emit(Event::ConnectorStatusChange {
                connector_id,
                previous_status: previous,
                status: ConnectorStatus::Available,
            });
        }
    }
    super::heartbeat::start_heartbeat_timer(runtime, heartbeat_interval_secs).await;
}

async fn reject_boot(runtime: &Arc<ChargePointRuntime>, reason: String) {
    runtime.record_history(
        HistoryEntity::ChargePoint,
        0,
        TransitionType::Error,
        "Unavailable",
        "Unavailable",
        Source::System,
        false,
        ValidationLevel::Error,
        Some(reason.clone()),
    );
    runtime.emit(Event::Error { error: reason });
}
