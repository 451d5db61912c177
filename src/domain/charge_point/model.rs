//! Charge Point domain entity: identity, boot descriptor, and connectors.
//!
//! Runtime handles (transport, message engine, timers, event emitter,
//! state history) are owned by the actor in `crate::chargepoint::runtime`,
//! not by this struct — this is the plain data the actor mutates.

use chrono::{DateTime, Utc};

use crate::domain::connector::Connector;

/// Charge point top-level operational status (spec data model, distinct
/// from a connector's `ConnectorStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ChargePointStatus {
    Unavailable,
    Available,
    Faulted,
    Rebooting,
}

impl Default for ChargePointStatus {
    fn default() -> Self {
        Self::Unavailable
    }
}

impl std::fmt::Display for ChargePointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A simulated charge point.
#[derive(Debug, Clone)]
pub struct ChargePoint {
    pub id: String,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
    pub iccid: Option<String>,
    pub imsi: Option<String>,
    pub meter_type: Option<String>,
    pub meter_serial_number: Option<String>,
    pub status: ChargePointStatus,
    pub last_error: Option<String>,
    /// Keyed by 1-based connector id; connector 0 is the charge point
    /// pseudo-connector and is not stored here.
    pub connectors: Vec<Connector>,
    pub heartbeat_interval_secs: u64,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl ChargePoint {
    pub fn new(
        id: impl Into<String>,
        vendor: impl Into<String>,
        model: impl Into<String>,
        num_connectors: u32,
    ) -> Self {
        let mut connectors = Vec::with_capacity(num_connectors as usize);
        for connector_id in 1..=num_connectors {
            connectors.push(Connector::new(connector_id));
        }
        Self {
            id: id.into(),
            vendor: Some(vendor.into()),
            model: Some(model.into()),
            serial_number: None,
            firmware_version: None,
            iccid: None,
            imsi: None,
            meter_type: None,
            meter_serial_number: None,
            status: ChargePointStatus::Unavailable,
            last_error: None,
            connectors,
            heartbeat_interval_secs: 60,
            registered_at: Utc::now(),
            last_heartbeat: None,
        }
    }

    pub fn get_connector(&self, id: u32) -> Option<&Connector> {
        self.connectors.iter().find(|c| c.id == id)
    }

    pub fn get_connector_mut(&mut self, id: u32) -> Option<&mut Connector> {
        self.connectors.iter_mut().find(|c| c.id == id)
    }

    pub fn record_heartbeat(&mut self) {
        self.last_heartbeat = Some(Utc::now());
    }

    pub fn set_status(&mut self, status: ChargePointStatus) -> bool {
        if status == self.status {
            return false;
        }
        self.status = status;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_charge_point_has_n_connectors_unavailable() {
        let cp = ChargePoint::new("CP001", "Acme", "X1", 2);
        assert_eq!(cp.connectors.len(), 2);
        assert!(cp
            .connectors
            .iter()
            .all(|c| c.status == crate::domain::connector::ConnectorStatus::Unavailable));
    }

    #[test]
    fn set_status_reports_whether_it_changed() {
        let mut cp = ChargePoint::new("CP001", "Acme", "X1", 1);
        assert!(cp.set_status(ChargePointStatus::Available));
        assert!(!cp.set_status(ChargePointStatus::Available));
    }
}
