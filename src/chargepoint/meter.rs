//! Auto-meter timer: increases a connector's meter value while Charging
//! and emits MeterValues at a configurable interval/increment.

use std::sync::Arc;

use tracing::debug;

use crate::domain::connector::ConnectorStatus;

use super::commands;
use super::runtime::ChargePointRuntime;

#[derive(Debug, Clone, Copy)]
pub struct AutoMeterConfig {
    pub interval_secs: u64,
    pub increment_wh: i64,
}

impl Default for AutoMeterConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            increment_wh: 100,
        }
    }
}

pub async fn start_auto_meter_timer(
    runtime: &Arc<ChargePointRuntime>,
    connector_id: u32,
    config: AutoMeterConfig,
) {
    let this = runtime.clone();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(config.interval_secs.max(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let still_charging = {
                let state = this.state.lock().await;
                state
                    .get_connector(connector_id)
                    .map(|c| c.status == ConnectorStatus::Charging)
                    .unwrap_or(false)
            };
            if !still_charging {
                break;
            }
            {
                let mut state = this.state.lock().await;
                if let Some(connector) = state.get_connector_mut(connector_id) {
                    let next = connector.meter_wh + config.increment_wh;
                    connector.set_meter_value(next);
                }
            }
            if let Err(e) = commands::send_meter_value(&this, connector_id).await {
                debug!(error = %e, connector_id, "auto-meter MeterValues send failed");
            }
        }
    });
    runtime.set_meter_handle(connector_id, handle).await;
}

pub async fn stop_auto_meter_timer(runtime: &Arc<ChargePointRuntime>, connector_id: u32) {
    runtime.stop_meter_timer(connector_id).await;
}
