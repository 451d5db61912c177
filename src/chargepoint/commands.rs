//! The command API consumed by the supervisor and the scenario executor.
//!
//! Each command validates pre-state before touching anything; on a
//! precondition failure it returns a typed error, leaves state
//! untouched, and logs the attempt to history at ERROR.

use std::sync::Arc;

use chrono::Utc;
use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v1_6::messages::meter_values::MeterValuesRequest;
use rust_ocpp::v1_6::messages::start_transaction::{StartTransactionRequest, StartTransactionResponse};
use rust_ocpp::v1_6::messages::status_notification::StatusNotificationRequest;
use rust_ocpp::v1_6::messages::stop_transaction::{StopTransactionRequest, StopTransactionResponse};
use rust_ocpp::v1_6::types::{
    AuthorizationStatus, ChargePointErrorCode, ChargePointStatus as OcppConnectorStatus, MeterValue, Reason,
    SampledValue,
};
use tracing::warn;

use crate::domain::connector::{Availability, ConnectorStatus, StatusChangeOutcome};
use crate::domain::events::Event;
use crate::domain::transaction::Transaction;
use crate::engine::CallOutcome;
use crate::history::{HistoryEntity, Source, TransitionType, ValidationLevel};
use crate::support::errors::{PreconditionError, SimError};

use super::meter::{start_auto_meter_timer, stop_auto_meter_timer, AutoMeterConfig};
use super::runtime::ChargePointRuntime;

/// Map a connector's status onto the wire enum sent in `StatusNotification`.
fn ocpp_status(status: ConnectorStatus) -> OcppConnectorStatus {
    match status {
        ConnectorStatus::Available => OcppConnectorStatus::Available,
        ConnectorStatus::Preparing => OcppConnectorStatus::Preparing,
        ConnectorStatus::Charging => OcppConnectorStatus::Charging,
        ConnectorStatus::SuspendedEV => OcppConnectorStatus::SuspendedEV,
        ConnectorStatus::SuspendedEVSE => OcppConnectorStatus::SuspendedEVSE,
        ConnectorStatus::Finishing => OcppConnectorStatus::Finishing,
        ConnectorStatus::Reserved => OcppConnectorStatus::Reserved,
        ConnectorStatus::Unavailable => OcppConnectorStatus::Unavailable,
        ConnectorStatus::Faulted => OcppConnectorStatus::Faulted,
    }
}

fn log_rejected_command(
    runtime: &ChargePointRuntime,
    connector_id: u32,
    reason: &str,
) {
    runtime.record_history(
        HistoryEntity::Connector,
        connector_id,
        TransitionType::Error,
        "",
        "",
        Source::User,
        false,
        ValidationLevel::Error,
        Some(reason.to_string()),
    );
}

/// Record a connector's status transition to history and, if it actually
/// changed anything, send the StatusNotification the CSMS expects for
/// every externally observable status change (spec §4.4/§4.5 step 3).
/// Every command below that moves a connector's status routes through
/// here rather than sending its own StatusNotification.
pub(crate) async fn apply_connector_transition(
    runtime: &Arc<ChargePointRuntime>,
    connector_id: u32,
    outcome: &StatusChangeOutcome,
    new_status: ConnectorStatus,
) -> Result<(), SimError> {
    match outcome {
        StatusChangeOutcome::Changed { previous } => {
            runtime.record_history(
                HistoryEntity::Connector,
                connector_id,
                TransitionType::Status,
                previous.to_string(),
                new_status.to_string(),
                Source::System,
                true,
                ValidationLevel::Ok,
                None,
            );
            send_status_notification(runtime, connector_id, new_status).await?;
        }
        StatusChangeOutcome::Rejected { attempted } => {
            runtime.record_history(
                HistoryEntity::Connector,
                connector_id,
                TransitionType::Status,
                "",
                attempted.to_string(),
                Source::System,
                false,
                ValidationLevel::Error,
                Some(format!("illegal transition to {attempted:?}")),
            );
        }
        StatusChangeOutcome::Unchanged => {}
    }
    Ok(())
}

/// Force a connector's status directly (`updateConnectorStatus`), bypassing
/// the normal charging-lifecycle commands below. Sends StatusNotification
/// and emits `connectorStatusChange` unless the transition is a no-op
/// (R2: repeated identical calls emit exactly one event total).
pub async fn update_connector_status(
    runtime: &Arc<ChargePointRuntime>,
    connector_id: u32,
    status: ConnectorStatus,
) -> Result<(), SimError> {
    let outcome = {
        let mut state = runtime.state.lock().await;
        let connector = state
            .get_connector_mut(connector_id)
            .ok_or(PreconditionError::ConnectorNotFound(connector_id))?;
        connector.set_status(status)
    };
    apply_connector_transition(runtime, connector_id, &outcome, status).await?;
    if let StatusChangeOutcome::Changed { previous } = outcome {
        runtime.emit(Event::ConnectorStatusChange {
            connector_id,
            previous_status: previous,
            status,
        });
    }
    Ok(())
}

async fn send_status_notification(
    runtime: &Arc<ChargePointRuntime>,
    connector_id: u32,
    status: ConnectorStatus,
) -> Result<(), SimError> {
    let request = StatusNotificationRequest {
        connector_id,
        error_code: ChargePointErrorCode::NoError,
        info: None,
        status: ocpp_status(status),
        timestamp: Some(Utc::now()),
        vendor_id: None,
        vendor_error_code: None,
    };
    let payload = serde_json::to_value(&request).expect("StatusNotificationRequest always serializes");
    runtime
        .engine
        .send_call(&runtime.transport, "StatusNotification", payload, Some(connector_id))
        .await?;
    Ok(())
}

pub async fn update_connector_availability(
    runtime: &Arc<ChargePointRuntime>,
    connector_id: u32,
    availability: Availability,
) -> Result<(), SimError> {
    let deferred = {
        let mut state = runtime.state.lock().await;
        let connector = state
            .get_connector_mut(connector_id)
            .ok_or(PreconditionError::ConnectorNotFound(connector_id))?;
        if availability == Availability::Inoperative && connector.is_transacting() {
            connector.availability_change_pending = true;
            true
        } else {
            connector.availability = availability;
            connector.availability_change_pending = false;
            false
        }
    };
    runtime.emit(Event::ConnectorAvailabilityChange {
        connector_id,
        availability: format!("{availability:?}"),
    });
    runtime.record_history(
        HistoryEntity::Connector,
        connector_id,
        TransitionType::Availability,
        "",
        format!("{availability:?}"),
        Source::User,
        true,
        if deferred {
            ValidationLevel::Warning
        } else {
            ValidationLevel::Ok
        },
        deferred.then(|| "deferred until transaction ends".to_string()),
    );
    Ok(())
}

/// `startTransaction(tag, connectorId)`: requires Available + Operative.
pub async fn start_transaction(
    runtime: &Arc<ChargePointRuntime>,
    connector_id: u32,
    tag_id: String,
) -> Result<u64, SimError> {
    let (meter_start, local_ref, outcome) = {
        let mut state = runtime.state.lock().await;
        let connector = state
            .get_connector_mut(connector_id)
            .ok_or(PreconditionError::ConnectorNotFound(connector_id))?;
        if connector.status != ConnectorStatus::Available {
            log_rejected_command(runtime, connector_id, "startTransaction: connector not Available");
            return Err(PreconditionError::ConnectorNotAvailable(connector_id).into());
        }
        if connector.availability != Availability::Operative {
            log_rejected_command(runtime, connector_id, "startTransaction: connector Inoperative");
            return Err(PreconditionError::ConnectorInoperative(connector_id).into());
        }
        let local_ref = runtime.next_local_tx_ref();
        let meter_start = connector.meter_wh;
        connector.transaction = Some(Transaction::new(local_ref, connector_id, tag_id.clone(), meter_start));
        let outcome = connector.set_status(ConnectorStatus::Preparing);
        (meter_start, local_ref, outcome)
    };
    apply_connector_transition(runtime, connector_id, &outcome, ConnectorStatus::Preparing).await?;
    runtime.emit(Event::ConnectorStatusChange {
        connector_id,
        previous_status: ConnectorStatus::Available,
        status: ConnectorStatus::Preparing,
    });

    let request = StartTransactionRequest {
        connector_id,
        id_tag: tag_id,
        meter_start: meter_start as i32,
        timestamp: Utc::now(),
        reservation_id: None,
    };
    let payload = serde_json::to_value(&request).expect("StartTransactionRequest always serializes");
    let handle = runtime
        .engine
        .send_call(&runtime.transport, "StartTransaction", payload, Some(connector_id))
        .await?;

    match handle.wait().await {
        CallOutcome::Result(response) => match serde_json::from_value::<StartTransactionResponse>(response) {
            Ok(response) if response.id_tag_info.status == AuthorizationStatus::Accepted => {
                finish_start_transaction(runtime, connector_id, Some(response.transaction_id)).await;
                Ok(local_ref)
            }
            Ok(_) => {
                abandon_transaction(runtime, connector_id, "StartTransaction rejected by CSMS").await;
                Err(PreconditionError::ConnectorNotAvailable(connector_id).into())
            }
            Err(err) => {
                abandon_transaction(runtime, connector_id, &format!("malformed StartTransaction.conf: {err}")).await;
                Err(PreconditionError::ConnectorNotAvailable(connector_id).into())
            }
        },
        CallOutcome::Error { code, description, .. } => {
            abandon_transaction(runtime, connector_id, &format!("{code}: {description}")).await;
            Err(PreconditionError::ConnectorNotAvailable(connector_id).into())
        }
        CallOutcome::TransportLost | CallOutcome::Superseded => {
            abandon_transaction(runtime, connector_id, "transport lost").await;
            Err(crate::support::errors::TransportError::TransportLost("StartTransaction".into()).into())
        }
    }
}

async fn finish_start_transaction(
    runtime: &Arc<ChargePointRuntime>,
    connector_id: u32,
    server_id: Option<i32>,
) {
    let outcome = {
        let mut state = runtime.state.lock().await;
        if let Some(connector) = state.get_connector_mut(connector_id) {
            if let Some(tx) = connector.transaction.as_mut() {
                if let Some(id) = server_id {
                    tx.confirm(id);
                }
            }
            connector.set_status(ConnectorStatus::Charging)
        } else {
            StatusChangeOutcome::Unchanged
        }
    };
    if let Err(err) = apply_connector_transition(runtime, connector_id, &outcome, ConnectorStatus::Charging).await {
        warn!(connector_id, %err, "StatusNotification(Charging) failed after StartTransaction");
    }
    runtime.emit(Event::ConnectorStatusChange {
        connector_id,
        previous_status: ConnectorStatus::Preparing,
        status: ConnectorStatus::Charging,
    });
    runtime.emit(Event::TransactionStarted {
        connector_id,
        transaction_id: server_id,
        tag_id: {
            let state = runtime.state.lock().await;
            state
                .get_connector(connector_id)
                .and_then(|c| c.transaction.as_ref())
                .map(|t| t.id_tag.clone())
                .unwrap_or_default()
        },
    });
    start_auto_meter_timer(runtime, connector_id, AutoMeterConfig::default()).await;
}

/// Cleans up a transaction that never made it past StartTransaction
/// (rejected, errored, or transport lost) — spec B2.
async fn abandon_transaction(runtime: &Arc<ChargePointRuntime>, connector_id: u32, reason: &str) {
    let outcome = {
        let mut state = runtime.state.lock().await;
        if let Some(connector) = state.get_connector_mut(connector_id) {
            connector.transaction = None;
            connector.set_status(ConnectorStatus::Available)
        } else {
            StatusChangeOutcome::Unchanged
        }
    };
    if let Err(err) = apply_connector_transition(runtime, connector_id, &outcome, ConnectorStatus::Available).await {
        warn!(connector_id, %err, "StatusNotification(Available) failed while abandoning transaction");
    }
    runtime.record_history(
        HistoryEntity::Connector,
        connector_id,
        TransitionType::Transaction,
        "Preparing",
        "Available",
        Source::System,
        false,
        ValidationLevel::Error,
        Some(reason.to_string()),
    );
}

/// `stopTransaction(connectorId)`: requires an active transaction.
pub async fn stop_transaction(
    runtime: &Arc<ChargePointRuntime>,
    connector_id: u32,
) -> Result<(), SimError> {
    let (meter_stop, server_id, from_status, outcome) = {
        let mut state = runtime.state.lock().await;
        let connector = state
            .get_connector_mut(connector_id)
            .ok_or(PreconditionError::ConnectorNotFound(connector_id))?;
        if connector.transaction.is_none() {
            log_rejected_command(runtime, connector_id, "stopTransaction: no active transaction");
            return Err(PreconditionError::NoActiveTransaction(connector_id).into());
        }
        let from_status = connector.status;
        let meter_stop = connector.meter_wh;
        let server_id = connector.transaction.as_ref().and_then(|t| t.server_id);
        if let Some(tx) = connector.transaction.as_mut() {
            tx.stop(meter_stop, Some("Local".into()));
        }
        let outcome = connector.set_status(ConnectorStatus::Finishing);
        (meter_stop, server_id, from_status, outcome)
    };
    apply_connector_transition(runtime, connector_id, &outcome, ConnectorStatus::Finishing).await?;
    stop_auto_meter_timer(runtime, connector_id).await;
    runtime.emit(Event::ConnectorStatusChange {
        connector_id,
        previous_status: from_status,
        status: ConnectorStatus::Finishing,
    });

    let request = StopTransactionRequest {
        transaction_id: server_id.unwrap_or(0),
        id_tag: None,
        meter_stop: meter_stop as i32,
        timestamp: Utc::now(),
        reason: Some(Reason::Local),
        transaction_data: None,
    };
    let payload = serde_json::to_value(&request).expect("StopTransactionRequest always serializes");
    let handle = runtime
        .engine
        .send_call(&runtime.transport, "StopTransaction", payload, Some(connector_id))
        .await?;
    if let CallOutcome::Result(response) = handle.wait().await {
        if let Err(err) = serde_json::from_value::<StopTransactionResponse>(response) {
            warn!(connector_id, %err, "malformed StopTransaction.conf");
        }
    }

    let outcome = {
        let mut state = runtime.state.lock().await;
        if let Some(connector) = state.get_connector_mut(connector_id) {
            if let Some(tx) = connector.transaction.as_mut() {
                tx.mark_meter_sent();
            }
            connector.transaction = None;
            connector.set_status(ConnectorStatus::Available)
        } else {
            StatusChangeOutcome::Unchanged
        }
    };
    apply_connector_transition(runtime, connector_id, &outcome, ConnectorStatus::Available).await?;
    runtime.emit(Event::ConnectorStatusChange {
        connector_id,
        previous_status: ConnectorStatus::Finishing,
        status: ConnectorStatus::Available,
    });
    runtime.emit(Event::TransactionStopped {
        connector_id,
        transaction_id: server_id,
    });
    Ok(())
}

/// `setMeterValue(connectorId, Wh)`: overwrite the absolute meter value.
pub async fn set_meter_value(
    runtime: &Arc<ChargePointRuntime>,
    connector_id: u32,
    wh: i64,
) -> Result<(), SimError> {
    {
        let mut state = runtime.state.lock().await;
        let connector = state
            .get_connector_mut(connector_id)
            .ok_or(PreconditionError::ConnectorNotFound(connector_id))?;
        connector.set_meter_value(wh);
    }
    runtime.emit(Event::ConnectorMeterValueChange {
        connector_id,
        meter_value: wh,
    });
    Ok(())
}

/// `sendMeterValue(connectorId)`: emit a MeterValues frame for the
/// connector's current reading.
pub async fn send_meter_value(
    runtime: &Arc<ChargePointRuntime>,
    connector_id: u32,
) -> Result<(), SimError> {
    let (meter_wh, server_tx_id) = {
        let state = runtime.state.lock().await;
        let connector = state
            .get_connector(connector_id)
            .ok_or(PreconditionError::ConnectorNotFound(connector_id))?;
        (connector.meter_wh, connector.transaction.as_ref().and_then(|t| t.server_id))
    };
    let request = MeterValuesRequest {
        connector_id,
        transaction_id: server_tx_id,
        meter_value: vec![MeterValue {
            timestamp: Utc::now(),
            sampled_value: vec![SampledValue {
                value: meter_wh.to_string(),
                context: None,
                format: None,
                measurand: None,
                phase: None,
                location: None,
                unit: None,
            }],
        }],
    };
    let payload = serde_json::to_value(&request).expect("MeterValuesRequest always serializes");
    runtime
        .engine
        .send_call(&runtime.transport, "MeterValues", payload, Some(connector_id))
        .await?;
    runtime.emit(Event::ConnectorMeterValueChange {
        connector_id,
        meter_value: meter_wh,
    });
    Ok(())
}

/// `authorize(tag)`: check the tag against the CSMS.
pub async fn authorize(runtime: &Arc<ChargePointRuntime>, tag_id: String) -> Result<bool, SimError> {
    let request = AuthorizeRequest { id_tag: tag_id };
    let payload = serde_json::to_value(&request).expect("AuthorizeRequest always serializes");
    let handle = runtime
        .engine
        .send_call(&runtime.transport, "Authorize", payload, None)
        .await?;
    match handle.wait().await {
        CallOutcome::Result(response) => Ok(serde_json::from_value::<AuthorizeResponse>(response)
            .map(|r| r.id_tag_info.status == AuthorizationStatus::Accepted)
            .unwrap_or(false)),
        CallOutcome::Error { .. } => Ok(false),
        CallOutcome::TransportLost | CallOutcome::Superseded => {
            Err(crate::support::errors::TransportError::TransportLost("Authorize".into()).into())
        }
    }
}

/// `reset`: 5 s delay, then Hard reboots (full boot sequence re-runs)
/// while Soft re-runs only the boot call.
pub async fn reset(runtime: &Arc<ChargePointRuntime>, hard: bool) {
    let this = runtime.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        {
            let mut state = this.state.lock().await;
            state.set_status(crate::domain::charge_point::ChargePointStatus::Rebooting);
        }
        this.emit(Event::StatusChange {
            status: "Rebooting".into(),
        });
        if hard {
            this.disconnect().await;
            let _ = this.connect().await;
        } else {
            let _ = crate::chargepoint::boot::run_boot_sequence(&this).await;
        }
    });
}
