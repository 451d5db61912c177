//! The Charge Point actor: owns the transport, message engine, domain
//! state, history, and event emitter for one simulated station, and
//! drives the single task that processes incoming transport events in
//! arrival order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::charge_point::{ChargePoint, ChargePointStatus};
use crate::domain::events::{Event, EventMessage};
use crate::engine::MessageEngine;
use crate::history::{HistoryEntity, Source, StateHistory, TransitionType, ValidationLevel};
use crate::support::errors::SimError;
use crate::support::shutdown::ShutdownSignal;
use crate::transport::{BasicAuth, Transport, TransportEvent};

/// Static configuration a runtime is built from; does not change after
/// construction.
#[derive(Debug, Clone)]
pub struct ChargePointConfig {
    pub cp_id: String,
    pub base_url: String,
    pub vendor: String,
    pub model: String,
    pub num_connectors: u32,
    pub auth: Option<BasicAuth>,
    pub history_max_entries: usize,
    pub event_channel_capacity: usize,
}

/// A single simulated charge point: identity, transport, state, history.
pub struct ChargePointRuntime {
    pub config: ChargePointConfig,
    pub state: AsyncMutex<ChargePoint>,
    pub transport: Arc<Transport>,
    pub engine: MessageEngine,
    pub history: Arc<StateHistory>,
    pub events_tx: broadcast::Sender<EventMessage>,
    event_sequence: AtomicU64,
    pub shutdown: ShutdownSignal,
    local_tx_ref: AtomicU64,
    heartbeat_handle: AsyncMutex<Option<JoinHandle<()>>>,
    meter_handles: AsyncMutex<HashMap<u32, JoinHandle<()>>>,
    transport_rx: AsyncMutex<Option<mpsc::Receiver<TransportEvent>>>,
}

impl ChargePointRuntime {
    pub fn new(config: ChargePointConfig) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(config.event_channel_capacity.max(16));
        let (transport_tx, transport_rx) = mpsc::channel(256);
        let transport = Arc::new(Transport::new(
            &config.base_url,
            &config.cp_id,
            config.auth.clone(),
            transport_tx,
        ));
        let state = ChargePoint::new(
            config.cp_id.clone(),
            config.vendor.clone(),
            config.model.clone(),
            config.num_connectors,
        );
        let history_max = config.history_max_entries;
        let history = Arc::new(StateHistory::new(history_max));
        Arc::new(Self {
            config,
            state: AsyncMutex::new(state),
            transport,
            engine: MessageEngine::new(history.clone()),
            history,
            events_tx,
            event_sequence: AtomicU64::new(1),
            shutdown: ShutdownSignal::new(),
            local_tx_ref: AtomicU64::new(1),
            heartbeat_handle: AsyncMutex::new(None),
            meter_handles: AsyncMutex::new(HashMap::new()),
            transport_rx: AsyncMutex::new(Some(transport_rx)),
        })
    }

    pub fn next_local_tx_ref(&self) -> u64 {
        self.local_tx_ref.fetch_add(1, Ordering::SeqCst)
    }

    /// Emit an event to every subscriber and persist a copy of its
    /// sequence number; slow subscribers never block this call (a
    /// `broadcast` send only fails if there are zero receivers).
    pub fn emit(&self, event: Event) {
        let sequence = self.event_sequence.fetch_add(1, Ordering::SeqCst);
        let message = EventMessage::new(self.config.cp_id.clone(), sequence, event);
        let _ = self.events_tx.send(message);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EventMessage> {
        self.events_tx.subscribe()
    }

    pub fn record_history(
        &self,
        entity: HistoryEntity,
        entity_id: u32,
        transition_type: TransitionType,
        from_state: impl Into<String>,
        to_state: impl Into<String>,
        source: Source,
        success: bool,
        level: ValidationLevel,
        error_message: Option<String>,
    ) {
        self.history.record(
            entity,
            entity_id,
            transition_type,
            from_state,
            to_state,
            source,
            success,
            level,
            error_message,
        );
    }

    /// Open the transport and run the boot sequence (spec §4.5 steps 1-3).
    pub async fn connect(self: &Arc<Self>) -> Result<(), SimError> {
        self.transport.connect().await?;
        self.spawn_drive_loop();
        self.emit(Event::Connected);
        {
            let mut state = self.state.lock().await;
            state.set_status(ChargePointStatus::Unavailable);
        }
        crate::chargepoint::boot::run_boot_sequence(self).await
    }

    /// Close the transport and cancel timers; pending calls are drained
    /// by the drive loop observing the transport's `Closed` event.
    pub async fn disconnect(self: &Arc<Self>) {
        self.stop_heartbeat().await;
        self.stop_all_meter_timers().await;
        self.transport.disconnect().await;
        self.engine.drain_on_transport_loss();
        let mut state = self.state.lock().await;
        state.set_status(ChargePointStatus::Unavailable);
        drop(state);
        self.emit(Event::Disconnected {
            code: None,
            reason: "local disconnect".into(),
        });
    }

    fn spawn_drive_loop(self: &Arc<Self>) {
        // Only ever taken once, right after `Transport::connect` hands us
        // a fresh receiver, so this never contends.
        let rx = self
            .transport_rx
            .try_lock()
            .expect("transport_rx is only touched at startup")
            .take();
        let Some(mut rx) = rx else {
            return;
        };
        let this = self.clone();
        tokio::spawn(async move {
            let mut shutdown = this.shutdown.notified();
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => break,
                    event = rx.recv() => {
                        match event {
                            Some(TransportEvent::Frame(frame)) => {
                                crate::chargepoint::incoming::handle_frame(&this, frame).await;
                            }
                            Some(TransportEvent::Malformed(reason)) => {
                                warn!(cp_id = %this.config.cp_id, reason, "dropped malformed frame");
                            }
                            Some(TransportEvent::Closed { code, reason }) => {
                                info!(cp_id = %this.config.cp_id, ?code, reason, "transport closed");
                                this.transport.mark_disconnected();
                                this.engine.drain_on_transport_loss();
                                {
                                    let mut state = this.state.lock().await;
                                    state.set_status(ChargePointStatus::Unavailable);
                                }
                                this.emit(Event::Disconnected { code, reason });
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
        });
    }

    pub(crate) async fn set_heartbeat_handle(&self, handle: Option<JoinHandle<()>>) {
        let mut guard = self.heartbeat_handle.lock().await;
        if let Some(old) = guard.take() {
            old.abort();
        }
        *guard = handle;
    }

    pub(crate) async fn stop_heartbeat(&self) {
        self.set_heartbeat_handle(None).await;
    }

    pub(crate) async fn set_meter_handle(&self, connector_id: u32, handle: JoinHandle<()>) {
        let mut guard = self.meter_handles.lock().await;
        if let Some(old) = guard.insert(connector_id, handle) {
            old.abort();
        }
    }

    pub(crate) async fn stop_meter_timer(&self, connector_id: u32) {
        let mut guard = self.meter_handles.lock().await;
        if let Some(handle) = guard.remove(&connector_id) {
            handle.abort();
        }
    }

    async fn stop_all_meter_timers(&self) {
        let mut guard = self.meter_handles.lock().await;
        for (_, handle) in guard.drain() {
            handle.abort();
        }
    }
}
