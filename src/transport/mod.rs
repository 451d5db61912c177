//! The single outbound WebSocket transport for one Charge Point.
//!
//! One `Transport` per `ChargePoint`: connects to `<baseURL>/<cpId>` with
//! subprotocol `ocpp1.6` and optional HTTP Basic credentials, and forwards
//! decoded frames (and close events) to a channel the charge point runtime
//! drains in its main loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::support::errors::TransportError;
use crate::support::ocpp_frame::OcppFrame;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Events the transport pushes upstream to the owning Charge Point.
#[derive(Debug)]
pub enum TransportEvent {
    Frame(OcppFrame),
    /// A non-OCPP-J text/binary frame arrived; logged and dropped by the
    /// caller, never treated as a decode failure for the session.
    Malformed(String),
    Closed { code: Option<u16>, reason: String },
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Optional HTTP Basic credentials applied to the WebSocket handshake.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    fn header_value(&self) -> String {
        use base64::Engine;
        let raw = format!("{}:{}", self.username, self.password);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }
}

pub struct Transport {
    /// `<baseURL>/<cpId>`, normalized so a trailing `/<cpId>` already
    /// present on the configured base is not duplicated.
    url: String,
    auth: Option<BasicAuth>,
    sink: Mutex<Option<WsSink>>,
    connected: AtomicBool,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl Transport {
    pub fn new(base_url: &str, cp_id: &str, auth: Option<BasicAuth>, events_tx: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            url: Self::build_url(base_url, cp_id),
            auth,
            sink: Mutex::new(None),
            connected: AtomicBool::new(false),
            events_tx,
        }
    }

    fn build_url(base_url: &str, cp_id: &str) -> String {
        let base = base_url.trim_end_matches('/');
        if base.ends_with(&format!("/{cp_id}")) {
            base.to_string()
        } else {
            format!("{base}/{cp_id}")
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Open the session. Spawns the read loop that forwards every
    /// subsequent frame (and the eventual close) to `events_tx`.
    pub async fn connect(self: &Arc<Self>) -> Result<(), TransportError> {
        let mut builder = Request::builder()
            .uri(&self.url)
            .header("Sec-WebSocket-Protocol", "ocpp1.6")
            .header("Host", host_from_url(&self.url))
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            );
        if let Some(auth) = &self.auth {
            builder = builder.header("Authorization", auth.header_value());
        }
        let request = builder
            .body(())
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let connect_fut = tokio_tungstenite::connect_async(request);
        let (ws_stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_fut)
            .await
            .map_err(|_| TransportError::ConnectionTimeout(CONNECT_TIMEOUT))?
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let (sink, mut stream) = ws_stream.split();
        *self.sink.lock().await = Some(sink);
        self.connected.store(true, Ordering::SeqCst);
        info!(url = %self.url, "transport connected");

        let events_tx = self.events_tx.clone();
        let connected_flag: Arc<AtomicBool> = Arc::new(AtomicBool::new(true));
        let connected_flag_task = connected_flag.clone();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => match OcppFrame::parse(&text) {
                        Ok(frame) => {
                            if events_tx.send(TransportEvent::Frame(frame)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "malformed frame on receive");
                            if events_tx
                                .send(TransportEvent::Malformed(e.to_string()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                            .unwrap_or((None, String::new()));
                        let _ = events_tx.send(TransportEvent::Closed { code, reason }).await;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "transport read error");
                        let _ = events_tx
                            .send(TransportEvent::Closed {
                                code: None,
                                reason: e.to_string(),
                            })
                            .await;
                        break;
                    }
                }
            }
            connected_flag_task.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    pub async fn send(&self, frame: &OcppFrame) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(Message::Text(frame.serialize()))
            .await
            .map_err(|e| TransportError::TransportLost(e.to_string()))
    }

    pub async fn disconnect(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

fn host_from_url(url: &str) -> String {
    url.split("//")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or("localhost")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_appends_cp_id() {
        assert_eq!(Transport::build_url("wss://csms.example/ocpp", "CP001"), "wss://csms.example/ocpp/CP001");
    }

    #[test]
    fn build_url_does_not_duplicate_trailing_cp_id() {
        assert_eq!(
            Transport::build_url("wss://csms.example/ocpp/CP001", "CP001"),
            "wss://csms.example/ocpp/CP001"
        );
    }

    #[test]
    fn build_url_strips_trailing_slash_on_base() {
        assert_eq!(Transport::build_url("wss://csms.example/ocpp/", "CP001"), "wss://csms.example/ocpp/CP001");
    }
}
