//! Charge point lifecycle events.
//!
//! These are the facts a charge point emits as it runs; the supervisor's
//! event bus fans them out to state history and to local-socket
//! subscribers (see `src/supervisor`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::connector::ConnectorStatus;

/// Events emitted by a single charge point, capability-identified by tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    Connected,
    Disconnected { code: Option<u16>, reason: String },
    StatusChange { status: String },
    Error { error: String },
    ConnectorStatusChange {
        connector_id: u32,
        previous_status: ConnectorStatus,
        status: ConnectorStatus,
    },
    ConnectorAvailabilityChange {
        connector_id: u32,
        availability: String,
    },
    ConnectorMeterValueChange {
        connector_id: u32,
        meter_value: i64,
    },
    TransactionStarted {
        connector_id: u32,
        transaction_id: Option<i32>,
        tag_id: String,
    },
    TransactionStopped {
        connector_id: u32,
        transaction_id: Option<i32>,
    },
    Log {
        level: String,
        log_type: String,
        message: String,
    },
    /// Scenario executor transitioned a running scenario to `failed`.
    ScenarioError { scenario_id: String, reason: String },
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::Connected => "connected",
            Event::Disconnected { .. } => "disconnected",
            Event::StatusChange { .. } => "statusChange",
            Event::Error { .. } => "error",
            Event::ConnectorStatusChange { .. } => "connectorStatusChange",
            Event::ConnectorAvailabilityChange { .. } => "connectorAvailabilityChange",
            Event::ConnectorMeterValueChange { .. } => "connectorMeterValueChange",
            Event::TransactionStarted { .. } => "transactionStarted",
            Event::TransactionStopped { .. } => "transactionStopped",
            Event::Log { .. } => "log",
            Event::ScenarioError { .. } => "scenario_error",
        }
    }
}

/// Envelope attaching identity and emission order to a raw `Event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: String,
    pub charge_point_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventMessage {
    pub fn new(charge_point_id: impl Into<String>, sequence: u64, event: Event) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            charge_point_id: charge_point_id.into(),
            sequence,
            timestamp: Utc::now(),
            event,
        }
    }
}
