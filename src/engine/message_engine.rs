//! Correlates outbound Calls with their CallResult/CallError and drives
//! sends through the `Transport`. Dispatch of *incoming* Calls to
//! handlers lives in `crate::chargepoint::incoming`, which is the layer
//! with access to the Charge Point's mutable state; this module only
//! tracks the request/response bookkeeping common to every action.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

use crate::engine::pending::{CallHandle, CallOutcome, PendingCall};
use crate::history::{HistoryEntity, Source, StateHistory, TransitionType, ValidationLevel};
use crate::support::errors::{ProtocolError, TransportError};
use crate::support::ocpp_frame::OcppFrame;
use crate::transport::Transport;

pub struct MessageEngine {
    pending: DashMap<String, PendingCall>,
    history: Arc<StateHistory>,
}

impl MessageEngine {
    pub fn new(history: Arc<StateHistory>) -> Self {
        Self {
            pending: DashMap::new(),
            history,
        }
    }

    /// Send a Call and return a handle resolving on the matching
    /// CallResult/CallError, or `TransportLost` if the transport fails to
    /// deliver it or drops before a response arrives.
    pub async fn send_call(
        &self,
        transport: &Arc<Transport>,
        action: &str,
        payload: Value,
        connector_id: Option<u32>,
    ) -> Result<CallHandle, TransportError> {
        let message_id = Uuid::new_v4().to_string();
        let (tx, rx) = tokio::sync::oneshot::channel();

        self.insert_pending(
            message_id.clone(),
            PendingCall {
                action: action.to_string(),
                connector_id,
                sent_at: chrono::Utc::now(),
                responder: tx,
            },
        );

        let frame = OcppFrame::Call {
            unique_id: message_id.clone(),
            action: action.to_string(),
            payload,
        };

        if let Err(e) = transport.send(&frame).await {
            self.reject(&message_id, CallOutcome::TransportLost);
            return Err(e);
        }

        Ok(CallHandle { receiver: rx })
    }

    /// Insert a pending call, resolving any earlier entry under the same
    /// id with `Superseded` per the spec's duplicate-messageId tie-break
    /// (later wins, earlier is rejected).
    fn insert_pending(&self, message_id: String, pending: PendingCall) {
        if let Some((_, old)) = self.pending.remove(&message_id) {
            let err = ProtocolError::DuplicateMessageId(message_id.clone());
            error!(message_id = %message_id, superseded_action = %old.action, %err, "duplicate message id");
            self.history.record(
                HistoryEntity::ChargePoint,
                0,
                TransitionType::Error,
                old.action.clone(),
                pending.action.clone(),
                Source::System,
                false,
                ValidationLevel::Error,
                Some(err.to_string()),
            );
            let _ = old.responder.send(CallOutcome::Superseded);
        }
        self.pending.insert(message_id, pending);
    }

    fn reject(&self, message_id: &str, outcome: CallOutcome) {
        if let Some((_, pending)) = self.pending.remove(message_id) {
            let _ = pending.responder.send(outcome);
        }
    }

    /// Resolve a pending call with an incoming CallResult. Returns the
    /// action name if a pending call matched, so the caller can apply
    /// the response-specific state transition.
    pub fn handle_call_result(&self, message_id: &str, payload: Value) -> Option<String> {
        match self.pending.remove(message_id) {
            Some((_, pending)) => {
                let action = pending.action.clone();
                let _ = pending.responder.send(CallOutcome::Result(payload));
                Some(action)
            }
            None => {
                warn!(message_id, "CallResult for unknown message id");
                None
            }
        }
    }

    pub fn handle_call_error(
        &self,
        message_id: &str,
        code: String,
        description: String,
        details: Value,
    ) -> Option<String> {
        match self.pending.remove(message_id) {
            Some((_, pending)) => {
                let action = pending.action.clone();
                let _ = pending.responder.send(CallOutcome::Error {
                    code,
                    description,
                    details,
                });
                Some(action)
            }
            None => {
                warn!(message_id, "CallError for unknown message id");
                None
            }
        }
    }

    /// Reject every outstanding pending call with `TransportLost`; called
    /// when the transport closes.
    pub fn drain_on_transport_loss(&self) {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.reject(&id, CallOutcome::TransportLost);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine() -> MessageEngine {
        MessageEngine::new(Arc::new(StateHistory::new(100)))
    }

    #[test]
    fn handle_call_result_without_pending_is_a_noop() {
        let engine = test_engine();
        assert!(engine.handle_call_result("missing", serde_json::json!({})).is_none());
    }

    #[tokio::test]
    async fn insert_pending_supersedes_earlier_entry_with_same_id() {
        let engine = test_engine();
        let (tx1, rx1) = tokio::sync::oneshot::channel();
        engine.insert_pending(
            "dup".into(),
            PendingCall {
                action: "Heartbeat".into(),
                connector_id: None,
                sent_at: chrono::Utc::now(),
                responder: tx1,
            },
        );
        let (tx2, _rx2) = tokio::sync::oneshot::channel();
        engine.insert_pending(
            "dup".into(),
            PendingCall {
                action: "Heartbeat".into(),
                connector_id: None,
                sent_at: chrono::Utc::now(),
                responder: tx2,
            },
        );
        let outcome = rx1.await.unwrap();
        assert!(matches!(outcome, CallOutcome::Superseded));
        assert_eq!(engine.pending_count(), 1);
    }

    #[tokio::test]
    async fn drain_on_transport_loss_rejects_all_pending() {
        let engine = test_engine();
        let (tx, rx) = tokio::sync::oneshot::channel();
        engine.insert_pending(
            "id1".into(),
            PendingCall {
                action: "BootNotification".into(),
                connector_id: None,
                sent_at: chrono::Utc::now(),
                responder: tx,
            },
        );
        engine.drain_on_transport_loss();
        assert!(matches!(rx.await.unwrap(), CallOutcome::TransportLost));
        assert_eq!(engine.pending_count(), 0);
    }
}
