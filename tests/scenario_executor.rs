//! Scenario graph interpreter tests: Action/Delay/Wait/Branch/Loop/End
//! wiring, driven against a real (mocked) `ChargePointRuntime`.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::MockCsms;
use cp_simulator::chargepoint::{ChargePointConfig, ChargePointRuntime};
use cp_simulator::domain::connector::ConnectorStatus;
use cp_simulator::scenario::{
    ActionSpec, ExecutionState, LoopBound, Predicate, RunMode, ScenarioDefinition, ScenarioExecutor, ScenarioNode,
    ScenarioTarget, ScenarioTargetKind,
};

async fn connected_runtime() -> std::sync::Arc<ChargePointRuntime> {
    let csms = MockCsms::start().await;
    let runtime = ChargePointRuntime::new(ChargePointConfig {
        cp_id: "CP-SCN".into(),
        base_url: csms.base_url(),
        vendor: "Acme".into(),
        model: "X1".into(),
        num_connectors: 1,
        auth: None,
        history_max_entries: 100,
        event_channel_capacity: 64,
    });
    runtime.connect().await.expect("connect to mock csms");
    runtime
}

fn target() -> ScenarioTarget {
    ScenarioTarget {
        kind: ScenarioTargetKind::Connector,
        connector_id: 1,
    }
}

/// A straight line: start transaction -> ramp meter -> stop transaction
/// -> End, run as a `Oneshot` to completion.
#[tokio::test]
async fn oneshot_runs_to_completion() {
    let runtime = connected_runtime().await;
    let mut nodes = HashMap::new();
    nodes.insert(
        "start".to_string(),
        ScenarioNode::Action {
            action: ActionSpec::StartTransaction { tag_id: "TAG1".into() },
            next: "ramp".to_string(),
        },
    );
    nodes.insert(
        "ramp".to_string(),
        ScenarioNode::Action {
            action: ActionSpec::SetMeterValue { delta_wh: 500 },
            next: "stop".to_string(),
        },
    );
    nodes.insert(
        "stop".to_string(),
        ScenarioNode::Action {
            action: ActionSpec::StopTransaction,
            next: "end".to_string(),
        },
    );
    nodes.insert("end".to_string(), ScenarioNode::End);

    let definition = ScenarioDefinition {
        id: "scn-1".into(),
        name: "straight line".into(),
        target: target(),
        start_node: "start".to_string(),
        nodes,
    };

    let executor = ScenarioExecutor::new(definition, runtime.clone(), RunMode::Oneshot);
    executor.clone().run().await;

    let snapshot = executor.snapshot().await;
    assert_eq!(snapshot.state, ExecutionState::Completed);

    let state = runtime.state.lock().await;
    let connector = state.get_connector(1).unwrap();
    assert!(connector.transaction.is_none());
    assert_eq!(connector.meter_wh, 500);
}

/// A `Branch` node picks the edge matching the connector's live status.
#[tokio::test]
async fn branch_follows_the_matching_edge() {
    let runtime = connected_runtime().await;
    let mut nodes = HashMap::new();
    nodes.insert(
        "check".to_string(),
        ScenarioNode::Branch {
            predicate: Predicate::ConnectorStatusEquals(ConnectorStatus::Available),
            when_true: "available_end".to_string(),
            when_false: "other_end".to_string(),
        },
    );
    nodes.insert("available_end".to_string(), ScenarioNode::End);
    nodes.insert("other_end".to_string(), ScenarioNode::End);

    let definition = ScenarioDefinition {
        id: "scn-branch".into(),
        name: "branch".into(),
        target: target(),
        start_node: "check".to_string(),
        nodes,
    };

    let executor = ScenarioExecutor::new(definition, runtime, RunMode::Oneshot);
    executor.clone().run().await;
    assert_eq!(executor.snapshot().await.state, ExecutionState::Completed);
}

/// A `Wait` node with no `timedOut` edge fails the scenario once its
/// timeout elapses without the predicate becoming true.
#[tokio::test]
async fn wait_without_timeout_edge_fails_on_timeout() {
    let runtime = connected_runtime().await;
    let mut nodes = HashMap::new();
    nodes.insert(
        "wait".to_string(),
        ScenarioNode::Wait {
            predicate: Predicate::HasActiveTransaction(true),
            timeout_ms: 100,
            matched: "end".to_string(),
            timed_out: String::new(),
        },
    );
    nodes.insert("end".to_string(), ScenarioNode::End);

    let definition = ScenarioDefinition {
        id: "scn-wait".into(),
        name: "wait".into(),
        target: target(),
        start_node: "wait".to_string(),
        nodes,
    };

    let executor = ScenarioExecutor::new(definition, runtime, RunMode::Oneshot);
    executor.clone().run().await;
    let snapshot = executor.snapshot().await;
    assert_eq!(snapshot.state, ExecutionState::Failed);
    assert!(snapshot.error.is_some());
}

/// A `Count`-bounded loop takes the body exactly `limit` times, then
/// exits.
#[tokio::test]
async fn count_loop_runs_exactly_n_iterations() {
    let runtime = connected_runtime().await;
    let mut nodes = HashMap::new();
    nodes.insert(
        "loop".to_string(),
        ScenarioNode::Loop {
            bound: LoopBound::Count(3),
            predicate: None,
            body: "bump".to_string(),
            exit: "end".to_string(),
        },
    );
    nodes.insert(
        "bump".to_string(),
        ScenarioNode::Action {
            action: ActionSpec::SetMeterValue { delta_wh: 100 },
            next: "loop".to_string(),
        },
    );
    nodes.insert("end".to_string(), ScenarioNode::End);

    let definition = ScenarioDefinition {
        id: "scn-loop".into(),
        name: "count loop".into(),
        target: target(),
        start_node: "loop".to_string(),
        nodes,
    };

    let executor = ScenarioExecutor::new(definition, runtime.clone(), RunMode::Oneshot);
    executor.clone().run().await;
    assert_eq!(executor.snapshot().await.state, ExecutionState::Completed);

    let state = runtime.state.lock().await;
    // Each iteration adds delta_wh to the connector's current reading;
    // three iterations of +100 confirm the body ran exactly three times,
    // not zero and not unboundedly.
    assert_eq!(state.get_connector(1).unwrap().meter_wh, 300);
}

/// `stop()` takes effect at the next suspension point (a Delay node).
#[tokio::test]
async fn stop_interrupts_a_delay_node() {
    let runtime = connected_runtime().await;
    let mut nodes = HashMap::new();
    nodes.insert(
        "wait_forever".to_string(),
        ScenarioNode::Delay {
            ms: 60_000,
            next: "end".to_string(),
        },
    );
    nodes.insert("end".to_string(), ScenarioNode::End);

    let definition = ScenarioDefinition {
        id: "scn-stop".into(),
        name: "stoppable".into(),
        target: target(),
        start_node: "wait_forever".to_string(),
        nodes,
    };

    let executor = ScenarioExecutor::new(definition, runtime, RunMode::Oneshot);
    let handle = tokio::spawn(executor.clone().run());
    tokio::time::sleep(Duration::from_millis(20)).await;
    executor.stop();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("executor should stop promptly")
        .unwrap();
    assert_eq!(executor.snapshot().await.state, ExecutionState::Stopped);
}
