//! The supervisor: hosts one or more simulated charge points in a
//! single process, each reachable over its own control socket.
//!
//! Grounded on the teacher's `interfaces/ws/ocpp_server.rs` accept loop
//! (`TcpListener` → spawn-per-connection) and `application/events`'s
//! event bus, generalized from TCP to `UnixListener` and from "one
//! socket routed by cpId" to "one socket per cpId".

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::chargepoint::{ChargePointConfig, ChargePointRuntime};
use crate::support::errors::FatalError;
use crate::support::shutdown::ShutdownSignal;

use super::commands::{self, DispatchOutcome};
use super::pidfile::PidFile;
use super::protocol::{sanitize_cp_id, EventFrame, Request, Response};
use super::scenario_store::ScenarioStore;

/// Backlog a subscriber may accumulate before being disconnected (spec §5).
const SUBSCRIBER_BACKLOG: usize = 256;

pub struct CpEndpoint {
    pub cp_id: String,
    pub runtime: Arc<ChargePointRuntime>,
    pub scenarios: ScenarioStore,
    socket_path: PathBuf,
    _pid_file: PidFile,
    subscribers: AsyncMutex<Vec<mpsc::Sender<String>>>,
}

impl CpEndpoint {
    async fn broadcast_line(&self, line: String) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| tx.try_send(line.clone()).is_ok());
    }
}

pub struct Supervisor {
    pub endpoints: HashMap<String, Arc<CpEndpoint>>,
    pub shutdown: ShutdownSignal,
}

impl Supervisor {
    /// Bind one socket/pidfile/log triple per config under `base_dir`,
    /// rejecting the whole startup if any one of them is already owned
    /// by a live process (spec §4.7).
    pub async fn spawn(configs: Vec<ChargePointConfig>, base_dir: &Path) -> Result<Arc<Self>, FatalError> {
        let shutdown = ShutdownSignal::new();
        let mut endpoints = HashMap::new();
        for config in configs {
            let endpoint = Self::bind_endpoint(config, base_dir).await?;
            endpoints.insert(endpoint.cp_id.clone(), endpoint);
        }
        let supervisor = Arc::new(Self { endpoints, shutdown });
        for endpoint in supervisor.endpoints.values() {
            supervisor.clone().spawn_log_fanout(endpoint.clone());
            supervisor.clone().spawn_accept_loop(endpoint.clone())?;
        }
        Ok(supervisor)
    }

    async fn bind_endpoint(config: ChargePointConfig, base_dir: &Path) -> Result<Arc<CpEndpoint>, FatalError> {
        let sanitized = sanitize_cp_id(&config.cp_id);
        let socket_path = base_dir.join(format!("{sanitized}.sock"));
        let pid_path = base_dir.join(format!("{sanitized}.pid"));

        let pid_file = PidFile::claim(&pid_path)?;
        let _ = std::fs::remove_file(&socket_path);

        let cp_id = config.cp_id.clone();
        let runtime = ChargePointRuntime::new(config);
        Ok(Arc::new(CpEndpoint {
            cp_id,
            runtime,
            scenarios: ScenarioStore::new(),
            socket_path,
            _pid_file: pid_file,
            subscribers: AsyncMutex::new(Vec::new()),
        }))
    }

    fn log_path(&self, endpoint: &CpEndpoint) -> PathBuf {
        endpoint.socket_path.with_extension("log")
    }

    /// Drain the CP's event bus forever: append every event to the log
    /// file (never dropped) and fan it out to local subscribers (may be
    /// dropped past their backlog).
    fn spawn_log_fanout(self: Arc<Self>, endpoint: Arc<CpEndpoint>) {
        let log_path = self.log_path(&endpoint);
        tokio::spawn(async move {
            let mut file = match OpenOptions::new().create(true).append(true).open(&log_path).await {
                Ok(f) => f,
                Err(e) => {
                    warn!(cp_id = %endpoint.cp_id, error = %e, "failed to open event log");
                    return;
                }
            };
            let mut events = endpoint.runtime.subscribe_events();
            loop {
                match events.recv().await {
                    Ok(message) => {
                        let frame = EventFrame {
                            event: message.event.event_type().to_string(),
                            data: serde_json::to_value(&message).unwrap_or(json!(null)),
                            timestamp: message.timestamp,
                        };
                        let Ok(mut line) = serde_json::to_string(&frame) else { continue };
                        line.push('\n');
                        if let Err(e) = file.write_all(line.as_bytes()).await {
                            warn!(cp_id = %endpoint.cp_id, error = %e, "event log write failed");
                        }
                        endpoint.broadcast_line(line).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(cp_id = %endpoint.cp_id, missed, "event log fanout lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn spawn_accept_loop(self: Arc<Self>, endpoint: Arc<CpEndpoint>) -> Result<(), FatalError> {
        let listener = UnixListener::bind(&endpoint.socket_path).map_err(|e| FatalError::BindFailed {
            path: endpoint.socket_path.clone(),
            source: e,
        })?;
        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut shutdown = supervisor.shutdown.notified();
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _)) => {
                                let supervisor = supervisor.clone();
                                let endpoint = endpoint.clone();
                                tokio::spawn(async move {
                                    handle_connection(supervisor, endpoint, stream).await;
                                });
                            }
                            Err(e) => {
                                warn!(cp_id = %endpoint.cp_id, error = %e, "accept failed");
                            }
                        }
                    }
                }
            }
            let _ = std::fs::remove_file(&endpoint.socket_path);
        });
        Ok(())
    }

    /// Stop every scenario, disconnect every transport, and signal the
    /// accept loops to stop (spec §4.7's shutdown sequence).
    pub async fn shutdown(&self) {
        info!("supervisor shutdown: stopping scenarios and transports");
        for endpoint in self.endpoints.values() {
            for connector_id in 1..=endpoint.runtime.config.num_connectors {
                endpoint.scenarios.stop_all(connector_id).await;
            }
            endpoint.runtime.disconnect().await;
        }
        self.shutdown.trigger();
    }
}

async fn handle_connection(supervisor: Arc<Supervisor>, endpoint: Arc<CpEndpoint>, stream: UnixStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let line = match tokio::time::timeout(std::time::Duration::from_secs(10), lines.next_line()).await {
        Ok(Ok(Some(line))) => line,
        _ => return,
    };
    let request: Request = match serde_json::from_str(&line) {
        Ok(r) => r,
        Err(e) => {
            let response = Response::err(None, format!("invalid JSON: {e}"));
            let _ = write_response(&mut write_half, &response).await;
            return;
        }
    };
    let id = request.id.clone();
    match commands::dispatch(&supervisor, &endpoint, request).await {
        DispatchOutcome::Response(response) => {
            let _ = write_response(&mut write_half, &response).await;
        }
        DispatchOutcome::Subscribe => {
            let _ = write_response(&mut write_half, &Response::ok_empty(id)).await;
            run_subscriber(endpoint, write_half).await;
        }
        DispatchOutcome::Shutdown => {
            let _ = write_response(&mut write_half, &Response::ok_empty(id)).await;
            supervisor.shutdown().await;
        }
    }
}

async fn run_subscriber(endpoint: Arc<CpEndpoint>, mut write_half: tokio::net::unix::OwnedWriteHalf) {
    let (tx, mut rx) = mpsc::channel(SUBSCRIBER_BACKLOG);
    endpoint.subscribers.lock().await.push(tx);
    while let Some(line) = rx.recv().await {
        if write_half.write_all(line.as_bytes()).await.is_err() {
            debug!(cp_id = %endpoint.cp_id, "subscriber write failed, disconnecting");
            break;
        }
    }
}

async fn write_response(
    write_half: &mut tokio::net::unix::OwnedWriteHalf,
    response: &Response,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(response).unwrap_or_else(|_| "{}".to_string());
    line.push('\n');
    write_half.write_all(line.as_bytes()).await
}
