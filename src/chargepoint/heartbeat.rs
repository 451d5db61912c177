//! Heartbeat timer: emits Heartbeat every configured interval until
//! stopped or superseded by `startHeartbeat(n)`.

use std::sync::Arc;

use rust_ocpp::v1_6::messages::heart_beat::{HeartbeatRequest, HeartbeatResponse};
use tracing::debug;

use crate::support::errors::{InputError, SimError};

use super::runtime::ChargePointRuntime;

pub async fn start_heartbeat_timer(runtime: &Arc<ChargePointRuntime>, interval_secs: u64) {
    let this = runtime.clone();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            if let Err(e) = send_heartbeat(&this).await {
                debug!(error = %e, "heartbeat send failed");
            }
        }
    });
    runtime.set_heartbeat_handle(Some(handle)).await;
}

/// `startHeartbeat(s)` command: (re)starts the timer at a new interval.
/// Restarting replaces any existing timer (R3: at most one active timer).
pub async fn start_heartbeat(
    runtime: &Arc<ChargePointRuntime>,
    interval_secs: u64,
) -> Result<(), SimError> {
    if interval_secs == 0 {
        return Err(InputError::InvalidValue {
            field: "interval",
            reason: "must be greater than 0".into(),
        }
        .into());
    }
    start_heartbeat_timer(runtime, interval_secs).await;
    Ok(())
}

pub async fn stop_heartbeat(runtime: &Arc<ChargePointRuntime>) {
    runtime.stop_heartbeat().await;
}

/// `sendHeartbeat` command: emit one Heartbeat immediately, independent
/// of the timer.
pub async fn send_heartbeat(runtime: &Arc<ChargePointRuntime>) -> Result<(), SimError> {
    let payload = serde_json::to_value(&HeartbeatRequest {}).expect("HeartbeatRequest always serializes");
    let handle = runtime
        .engine
        .send_call(&runtime.transport, "Heartbeat", payload, None)
        .await?;
    if let crate::engine::CallOutcome::Result(payload) = handle.wait().await {
        if serde_json::from_value::<HeartbeatResponse>(payload).is_ok() {
            let mut state = runtime.state.lock().await;
            state.record_heartbeat();
        }
    }
    Ok(())
}
