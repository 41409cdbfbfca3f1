mod common;

use anyhow::{bail, Result};
use common::{collect, default_registry, timestamps};
use streamgraph::{
    Graph, GraphConfig, GraphError, GraphState, NodeConfig, NodeState, Packet, StreamError,
    Timestamp,
};

fn failing_chain() -> GraphConfig {
    GraphConfig::new()
        .input_stream("in")
        .output_stream("out")
        .node(
            NodeConfig::new("FailAt")
                .named("flaky")
                .input("in")
                .output("mid")
                .options(serde_json::json!({"fail_at": 5})),
        )
        .node(
            NodeConfig::new("PassThroughCalculator")
                .named("after")
                .input("mid")
                .output("out"),
        )
}

#[tokio::test]
async fn test_failure_is_returned_from_wait() {
    let mut graph = Graph::new(failing_chain(), &default_registry()).unwrap();
    let seen = collect(&mut graph, "out");
    graph.run(Vec::new()).await.unwrap();

    // Later packets may race the failure and be refused.
    for i in 0..10i64 {
        let _ = graph.add_packet("in", Packet::new(i).at(i)).await;
    }

    match graph.wait_until_done().await {
        Err(GraphError::Processing { node, timestamp, message }) => {
            assert_eq!(node, "flaky");
            assert_eq!(timestamp, Timestamp::new(5));
            assert!(message.contains("sensor dropout"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert_eq!(graph.node_state("flaky"), Some(NodeState::Failed));
    assert!(matches!(graph.state(), GraphState::Failed { .. }));

    // No firing of the failed node after the failure.
    let metrics = graph.monitor().collector().snapshot();
    assert_eq!(metrics["flaky"].firings, 5);
    assert_eq!(metrics["flaky"].errors_count, 1);
    assert!(timestamps(&seen.lock().unwrap()).iter().all(|ts| *ts < 5));

    // Injection is refused once the run has ended.
    let err = graph.add_packet("in", Packet::new(99).at(99)).await.unwrap_err();
    assert!(matches!(
        err,
        GraphError::StreamProtocol {
            reason: StreamError::NotRunning,
            ..
        }
    ));

    // The same failure is reported again.
    assert!(matches!(
        graph.wait_until_done().await,
        Err(GraphError::Processing { .. })
    ));
}

#[tokio::test]
async fn test_panicking_calculator_fails_the_run() {
    let config = GraphConfig::new().input_stream("in").node(
        NodeConfig::new("Panicky")
            .named("panicky")
            .input("in")
            .output("out"),
    );
    let mut graph = Graph::new(config, &default_registry()).unwrap();
    graph.run(Vec::new()).await.unwrap();

    for i in 0..5i64 {
        let _ = graph.add_packet("in", Packet::new(i).at(i)).await;
    }

    match graph.wait_until_done().await {
        Err(GraphError::Processing { node, timestamp, message }) => {
            assert_eq!(node, "panicky");
            assert_eq!(timestamp, Timestamp::new(2));
            assert!(message.contains("panicked"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_observer_error_aborts_the_run() {
    let config = GraphConfig::new().input_stream("in").node(
        NodeConfig::new("PassThroughCalculator")
            .named("fwd")
            .input("in")
            .output("out"),
    );
    let mut graph = Graph::new(config, &default_registry()).unwrap();
    graph
        .register_observer("out", |packet: &Packet| -> Result<()> {
            if packet.timestamp().value() == 3 {
                bail!("display closed");
            }
            Ok(())
        })
        .unwrap();
    graph.run(Vec::new()).await.unwrap();

    for i in 0..6i64 {
        let _ = graph.add_packet("in", Packet::new(i).at(i)).await;
    }

    match graph.wait_until_done().await {
        Err(GraphError::Observer { stream, timestamp, message }) => {
            assert_eq!(stream, "out");
            assert_eq!(timestamp, Timestamp::new(3));
            assert!(message.contains("display closed"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_open_failure_is_returned_from_run() {
    let config = GraphConfig::new()
        .input_stream("in")
        .node(NodeConfig::new("BrokenOpen").named("device").input("in"));
    let mut graph = Graph::new(config, &default_registry()).unwrap();

    match graph.run(Vec::new()).await {
        Err(GraphError::Processing { node, timestamp, message }) => {
            assert_eq!(node, "device");
            assert_eq!(timestamp, Timestamp::UNSTARTED);
            assert!(message.contains("device unavailable"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(graph.node_state("device"), Some(NodeState::Failed));
    assert!(matches!(graph.state(), GraphState::Failed { .. }));
    assert!(graph.wait_until_done().await.is_err());

    let err = graph.add_packet("in", Packet::new(1).at(0)).await.unwrap_err();
    assert!(matches!(err, GraphError::StreamProtocol { .. }));
}

#[tokio::test]
async fn test_lifecycle_misuse_is_rejected() {
    let mut graph = Graph::new(failing_chain(), &default_registry()).unwrap();
    assert_eq!(graph.wait_until_done().await, Err(GraphError::NotRunning));

    graph.run(Vec::new()).await.unwrap();
    assert_eq!(graph.run(Vec::new()).await, Err(GraphError::AlreadyStarted));
    assert_eq!(
        graph.bind_side_packet("late", Packet::new(1.0)),
        Err(GraphError::AlreadyStarted)
    );
    assert!(graph
        .register_observer("out", |_: &Packet| -> Result<()> { Ok(()) })
        .is_err());

    graph.close_all_input_streams();
    graph.wait_until_done().await.unwrap();
}

#[tokio::test]
async fn test_first_failure_wins() {
    // Both branches fail at timestamp 3; the one behind `Slow` gets there last.
    let config = GraphConfig::new()
        .input_stream("in")
        .node(
            NodeConfig::new("FailAt")
                .named("early")
                .input("in")
                .output("early_out")
                .options(serde_json::json!({"fail_at": 3})),
        )
        .node(NodeConfig::new("Slow").named("delay").input("in").output("delayed"))
        .node(
            NodeConfig::new("FailAt")
                .named("late")
                .input("delayed")
                .output("late_out")
                .options(serde_json::json!({"fail_at": 3})),
        );
    let mut graph = Graph::new(config, &default_registry()).unwrap();
    graph.run(Vec::new()).await.unwrap();

    for i in 0..6i64 {
        let _ = graph.add_packet("in", Packet::new(i).at(i)).await;
    }

    match graph.wait_until_done().await {
        Err(GraphError::Processing { node, timestamp, .. }) => {
            assert_eq!(node, "early");
            assert_eq!(timestamp, Timestamp::new(3));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let metrics = graph.monitor().collector().snapshot();
    assert_eq!(metrics["late"].errors_count, 0);
    assert!(matches!(
        graph.wait_until_done().await,
        Err(GraphError::Processing { node, .. }) if node == "early"
    ));
}

#[tokio::test]
async fn test_in_flight_outputs_are_discarded_after_failure() {
    let config = GraphConfig::new()
        .input_stream("in")
        .node(
            NodeConfig::new("FailAt")
                .named("flaky")
                .input("in")
                .output("flaky_out")
                .options(serde_json::json!({"fail_at": 0})),
        )
        .node(NodeConfig::new("Slow").named("slow").input("in").output("slow_out"));
    let mut graph = Graph::new(config, &default_registry()).unwrap();
    let seen = collect(&mut graph, "slow_out");
    graph.run(Vec::new()).await.unwrap();

    graph.add_packet("in", Packet::new(0i64).at(0)).await.unwrap();
    assert!(matches!(
        graph.wait_until_done().await,
        Err(GraphError::Processing { node, .. }) if node == "flaky"
    ));

    // Let the slow firing finish well after the failure.
    tokio::time::sleep(std::time::Duration::from_millis(80)).await;
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(graph.monitor().collector().snapshot()["slow"].firings, 0);
}
