#![allow(dead_code)]
//! A minimal CSMS double: accepts WebSocket connections and replies to
//! every Call with a canned Accepted CallResult, so the command layer
//! can be driven end to end without a real backend.
//!
//! Grounded on the mock-server pattern used for integration tests
//! against an external protocol endpoint (`tests/modbus_mock_server.rs`
//! in the energy-controller example), adapted from Modbus/TCP framing
//! to OCPP-J over WebSocket.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use cp_simulator::support::ocpp_frame::OcppFrame;

pub struct MockCsms {
    addr: SocketAddr,
}

impl MockCsms {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock csms");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        tokio::spawn(serve_connection(stream));
                    }
                    Err(_) => break,
                }
            }
        });
        Self { addr }
    }

    pub fn base_url(&self) -> String {
        format!("ws://{}", self.addr)
    }
}

async fn serve_connection(stream: TcpStream) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();
    while let Some(Ok(msg)) = source.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(OcppFrame::Call { unique_id, action, .. }) = OcppFrame::parse(&text) else {
            continue;
        };
        let frame = OcppFrame::CallResult {
            unique_id,
            payload: canned_response(&action),
        };
        if sink.send(Message::Text(frame.serialize())).await.is_err() {
            break;
        }
    }
}

fn canned_response(action: &str) -> Value {
    match action {
        "BootNotification" => json!({
            "status": "Accepted",
            "currentTime": "2024-01-01T00:00:00Z",
            "interval": 300,
        }),
        "Authorize" => json!({ "idTagInfo": { "status": "Accepted" } }),
        "StartTransaction" => json!({
            "transactionId": 1001,
            "idTagInfo": { "status": "Accepted" },
        }),
        "StopTransaction" => json!({ "idTagInfo": { "status": "Accepted" } }),
        "Heartbeat" => json!({ "currentTime": "2024-01-01T00:00:00Z" }),
        _ => json!({}),
    }
}
