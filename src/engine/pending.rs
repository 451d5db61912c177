//! A single outbound Call awaiting its CallResult/CallError.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::oneshot;

/// How a pending Call was finally resolved.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    Result(Value),
    Error {
        code: String,
        description: String,
        details: Value,
    },
    /// The transport closed (or a later call reused this message id)
    /// before a response arrived.
    TransportLost,
    /// A second pending call collided on the same message id; this one
    /// lost the tie-break (spec §4.3: later wins).
    Superseded,
}

pub(crate) struct PendingCall {
    pub action: String,
    pub connector_id: Option<u32>,
    pub sent_at: DateTime<Utc>,
    pub responder: oneshot::Sender<CallOutcome>,
}

/// Handle returned from `MessageEngine::send_call`; await it to get the
/// eventual `CallOutcome`.
pub struct CallHandle {
    pub(crate) receiver: oneshot::Receiver<CallOutcome>,
}

impl CallHandle {
    pub async fn wait(self) -> CallOutcome {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => CallOutcome::TransportLost,
        }
    }
}
