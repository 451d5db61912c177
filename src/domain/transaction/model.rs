//! Transaction domain entity.
//!
//! A transaction is locally identified the moment StartTransaction is
//! sent; the server-assigned `transactionId` only becomes known once the
//! CallResult arrives (or never, if the call fails).

use chrono::{DateTime, Utc};

/// A charging transaction bound to a connector.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Locally assigned reference, stable for the transaction's lifetime
    /// regardless of whether the server ever confirms an id.
    pub local_ref: u64,
    /// Server-assigned transaction id, set once StartTransaction.conf
    /// arrives. `None` while the request is in flight or if it failed.
    pub server_id: Option<i32>,
    pub connector_id: u32,
    pub id_tag: String,
    pub meter_start: i64,
    pub start_time: DateTime<Utc>,
    pub meter_stop: Option<i64>,
    pub stop_time: Option<DateTime<Utc>>,
    pub stop_reason: Option<String>,
    /// Set once StopTransaction has been sent for this transaction, so a
    /// repeated stop command is rejected rather than sent twice.
    pub meter_sent: bool,
}

impl Transaction {
    pub fn new(
        local_ref: u64,
        connector_id: u32,
        id_tag: impl Into<String>,
        meter_start: i64,
    ) -> Self {
        Self {
            local_ref,
            server_id: None,
            connector_id,
            id_tag: id_tag.into(),
            meter_start,
            start_time: Utc::now(),
            meter_stop: None,
            stop_time: None,
            stop_reason: None,
            meter_sent: false,
        }
    }

    /// Record the server-confirmed transaction id.
    pub fn confirm(&mut self, server_id: i32) {
        self.server_id = Some(server_id);
    }

    /// Mark the transaction stopped locally, ahead of sending
    /// StopTransaction. Idempotent guard: once `meter_sent` is true a
    /// second stop attempt is a precondition violation, not re-executed.
    pub fn stop(&mut self, meter_stop: i64, reason: Option<String>) {
        self.meter_stop = Some(meter_stop);
        self.stop_time = Some(Utc::now());
        self.stop_reason = reason;
    }

    pub fn mark_meter_sent(&mut self) {
        self.meter_sent = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.meter_stop.is_some()
    }

    /// Energy consumed in Wh; `None` until the transaction has stopped.
    pub fn energy_consumed(&self) -> Option<i64> {
        self.meter_stop.map(|stop| stop - self.meter_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        Transaction::new(1, 1, "TAG-001", 1000)
    }

    #[test]
    fn new_transaction_has_no_server_id() {
        let tx = sample();
        assert!(tx.server_id.is_none());
        assert!(!tx.is_stopped());
        assert!(!tx.meter_sent);
    }

    #[test]
    fn confirm_sets_server_id() {
        let mut tx = sample();
        tx.confirm(42);
        assert_eq!(tx.server_id, Some(42));
    }

    #[test]
    fn stop_then_energy_consumed() {
        let mut tx = sample();
        tx.stop(6000, Some("Local".into()));
        assert!(tx.is_stopped());
        assert_eq!(tx.energy_consumed(), Some(5000));
        assert_eq!(tx.stop_reason.as_deref(), Some("Local"));
    }

    #[test]
    fn energy_consumed_none_before_stop() {
        let tx = sample();
        assert_eq!(tx.energy_consumed(), None);
    }

    #[test]
    fn mark_meter_sent_is_idempotent_guard_flag() {
        let mut tx = sample();
        tx.stop(2000, None);
        tx.mark_meter_sent();
        assert!(tx.meter_sent);
    }
}
