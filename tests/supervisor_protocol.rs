//! Local control-channel protocol tests (P7, spec §6) against a real
//! `UnixListener` bound under a `tempfile`-backed directory.

use std::time::Duration;

use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use cp_simulator::chargepoint::ChargePointConfig;
use cp_simulator::Supervisor;

fn cp_config(cp_id: &str) -> ChargePointConfig {
    ChargePointConfig {
        cp_id: cp_id.to_string(),
        base_url: "ws://127.0.0.1:1".to_string(),
        vendor: "Acme".into(),
        model: "X1".into(),
        num_connectors: 1,
        auth: None,
        history_max_entries: 100,
        event_channel_capacity: 64,
    }
}

async fn send_request(socket_path: &std::path::Path, request: Value) -> Value {
    let stream = UnixStream::connect(socket_path).await.expect("connect to control socket");
    let (read_half, mut write_half) = stream.into_split();
    let mut line = serde_json::to_string(&request).unwrap();
    line.push('\n');
    write_half.write_all(line.as_bytes()).await.unwrap();

    let mut reader = BufReader::new(read_half);
    let mut response_line = String::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut response_line))
        .await
        .expect("response within the client budget")
        .unwrap();
    serde_json::from_str(&response_line).unwrap()
}

/// P7: a well-formed, unknown command still gets a response within
/// budget, carrying `ok:false` rather than hanging up.
#[tokio::test]
async fn unknown_command_responds_with_ok_false() {
    let dir = tempdir().unwrap();
    let supervisor = Supervisor::spawn(vec![cp_config("CP-ALPHA")], dir.path()).await.unwrap();
    let socket_path = dir.path().join("CP-ALPHA.sock");

    let response = send_request(&socket_path, json!({"id": "1", "command": "not_a_real_command"})).await;
    assert_eq!(response["ok"], json!(false));
    assert_eq!(response["id"], json!("1"));
    assert!(response["error"].is_string());

    supervisor.shutdown().await;
}

/// A status request against a freshly-bound (not yet connected) charge
/// point returns its idle snapshot.
#[tokio::test]
async fn status_command_reports_idle_snapshot() {
    let dir = tempdir().unwrap();
    let supervisor = Supervisor::spawn(vec![cp_config("CP-BETA")], dir.path()).await.unwrap();
    let socket_path = dir.path().join("CP-BETA.sock");

    let response = send_request(&socket_path, json!({"id": "2", "command": "status"})).await;
    assert_eq!(response["ok"], json!(true));
    assert_eq!(response["data"]["cpId"], json!("CP-BETA"));
    assert_eq!(response["data"]["connectors"][0]["id"], json!(1));

    supervisor.shutdown().await;
}

/// Each charge point is reachable over its own socket, not a shared one
/// routed by cpId (spec §4.7).
#[tokio::test]
async fn each_charge_point_gets_its_own_socket() {
    let dir = tempdir().unwrap();
    let supervisor = Supervisor::spawn(vec![cp_config("CP-ONE"), cp_config("CP-TWO")], dir.path())
        .await
        .unwrap();

    let one = send_request(&dir.path().join("CP-ONE.sock"), json!({"command": "status"})).await;
    let two = send_request(&dir.path().join("CP-TWO.sock"), json!({"command": "status"})).await;
    assert_eq!(one["data"]["cpId"], json!("CP-ONE"));
    assert_eq!(two["data"]["cpId"], json!("CP-TWO"));

    supervisor.shutdown().await;
}

/// A malformed request (invalid JSON) gets an `ok:false` response
/// instead of the connection simply closing silently.
#[tokio::test]
async fn malformed_json_gets_an_error_response() {
    let dir = tempdir().unwrap();
    let supervisor = Supervisor::spawn(vec![cp_config("CP-GAMMA")], dir.path()).await.unwrap();
    let socket_path = dir.path().join("CP-GAMMA.sock");

    let stream = UnixStream::connect(&socket_path).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    write_half.write_all(b"{not json\n").await.unwrap();

    let mut reader = BufReader::new(read_half);
    let mut response_line = String::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut response_line))
        .await
        .unwrap()
        .unwrap();
    let response: Value = serde_json::from_str(&response_line).unwrap();
    assert_eq!(response["ok"], json!(false));

    supervisor.shutdown().await;
}

/// `run_scenario` against a scenario id that was never loaded is
/// rejected rather than silently accepted.
#[tokio::test]
async fn run_unknown_scenario_is_rejected() {
    let dir = tempdir().unwrap();
    let supervisor = Supervisor::spawn(vec![cp_config("CP-DELTA")], dir.path()).await.unwrap();
    let socket_path = dir.path().join("CP-DELTA.sock");

    let response = send_request(
        &socket_path,
        json!({"command": "run_scenario", "params": {"scenarioId": "does-not-exist"}}),
    )
    .await;
    assert_eq!(response["ok"], json!(false));

    supervisor.shutdown().await;
}
