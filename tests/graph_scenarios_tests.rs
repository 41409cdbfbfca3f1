mod common;

use common::{collect, default_registry, registry, timestamps, JoinRecord};
use std::sync::{Arc, Mutex};
use streamgraph::{Graph, GraphConfig, GraphState, NodeConfig, NodeState, Packet};
use tokio::sync::Semaphore;

fn identity_chain(length: usize) -> GraphConfig {
    let mut config = GraphConfig::new().input_stream("in").output_stream("out");
    for i in 0..length {
        let input = if i == 0 { "in".to_string() } else { format!("s{}", i) };
        let output = if i + 1 == length { "out".to_string() } else { format!("s{}", i + 1) };
        config = config.node(
            NodeConfig::new("PassThroughCalculator")
                .named(format!("id{}", i))
                .input(input)
                .output(output),
        );
    }
    config
}

#[tokio::test]
async fn test_identity_node_forwards_every_packet_in_order() {
    let mut graph = Graph::new(identity_chain(1), &default_registry()).unwrap();
    let seen = collect(&mut graph, "out");

    graph.run(Vec::new()).await.unwrap();
    for i in 0..13i64 {
        graph.add_packet("in", Packet::new(i as f64 * 0.1).at(i)).await.unwrap();
    }
    graph.close_stream("in").unwrap();
    graph.wait_until_done().await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(timestamps(&seen), (0..13).collect::<Vec<_>>());
    for (i, packet) in seen.iter().enumerate() {
        assert_eq!(*packet.get::<f64>().unwrap(), i as f64 * 0.1);
    }
    assert_eq!(graph.node_state("id0"), Some(NodeState::Closed));
    assert!(matches!(graph.state(), GraphState::Completed { .. }));
}

#[tokio::test]
async fn test_chained_identity_nodes_each_fire_once_per_packet() {
    let mut graph = Graph::new(identity_chain(2), &default_registry()).unwrap();
    let seen = collect(&mut graph, "out");

    graph.run(Vec::new()).await.unwrap();
    for i in 0..13i64 {
        graph.add_packet("in", Packet::new(i as f64 * 0.1).at(i)).await.unwrap();
    }
    graph.close_all_input_streams();
    graph.wait_until_done().await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(timestamps(&seen), (0..13).collect::<Vec<_>>());
    assert_eq!(*seen[12].get::<f64>().unwrap(), 12.0 * 0.1);

    let snapshot = graph.monitor().collector().snapshot();
    assert_eq!(snapshot["id0"].firings, 13);
    assert_eq!(snapshot["id1"].firings, 13);
}

#[tokio::test]
async fn test_join_fires_with_placeholder_at_gap() {
    let log: Arc<Mutex<Vec<JoinRecord>>> = Arc::default();
    let registry = registry(log.clone(), Arc::new(Semaphore::new(0)));
    let config = GraphConfig::new()
        .input_stream("s1")
        .input_stream("s2")
        .output_stream("sum")
        .node(NodeConfig::new("Join").named("join").input("s1").input("s2").output("sum"));
    let mut graph = Graph::new(config, &registry).unwrap();
    let seen = collect(&mut graph, "sum");

    graph.run(Vec::new()).await.unwrap();
    for i in 0..8i64 {
        graph.add_packet("s1", Packet::new(i as f64).at(i)).await.unwrap();
        if i != 5 {
            graph.add_packet("s2", Packet::new(100.0).at(i)).await.unwrap();
        }
    }
    graph.close_all_input_streams();
    graph.wait_until_done().await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 8);
    assert_eq!(
        log[5],
        JoinRecord {
            timestamp: 5,
            left: Some(5.0),
            right: None
        }
    );
    assert!(log.iter().filter(|r| r.timestamp != 5).all(|r| r.right == Some(100.0)));
    assert_eq!(*seen.lock().unwrap()[5].get::<f64>().unwrap(), 5.0);
}

#[tokio::test]
async fn test_source_stops_after_emitting_all_packets() {
    let config = GraphConfig::new().output_stream("count").node(
        NodeConfig::new("Counter")
            .named("counter")
            .output("count")
            .options(serde_json::json!({"count": 17})),
    );
    let mut graph = Graph::new(config, &default_registry()).unwrap();
    let seen = collect(&mut graph, "count");

    graph.run(Vec::new()).await.unwrap();
    graph.wait_until_done().await.unwrap();

    assert_eq!(seen.lock().unwrap().len(), 17);
    assert_eq!(graph.node_state("counter"), Some(NodeState::Closed));
    assert!(matches!(graph.state(), GraphState::Completed { .. }));
}

#[tokio::test]
async fn test_source_feeds_downstream_chain() {
    let config = GraphConfig::from_json(serde_json::json!({
        "output_streams": ["scaled"],
        "nodes": [
            {"calculator": "Counter", "name": "counter", "output_streams": ["count"], "options": {"count": 5}},
            {"calculator": "PassThroughCalculator", "name": "fwd", "input_streams": ["count"], "output_streams": ["scaled"]}
        ]
    }))
    .unwrap();
    let mut graph = Graph::new(config, &default_registry()).unwrap();
    let seen = collect(&mut graph, "scaled");

    graph.run(Vec::new()).await.unwrap();
    graph.wait_until_done().await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(timestamps(&seen), vec![0, 1, 2, 3, 4]);
    assert_eq!(*seen[3].get::<i64>().unwrap(), 3);
    assert!(graph.node_states().values().all(|s| *s == NodeState::Closed));
}

#[tokio::test]
async fn test_closing_inputs_without_packets_closes_every_node() {
    let mut graph = Graph::new(identity_chain(4), &default_registry()).unwrap();
    graph.run(Vec::new()).await.unwrap();
    graph.close_all_input_streams();
    graph.wait_until_done().await.unwrap();

    for i in 0..4 {
        assert_eq!(graph.node_state(&format!("id{}", i)), Some(NodeState::Closed));
    }
}

#[tokio::test]
async fn test_wait_returns_same_outcome_twice() {
    let mut graph = Graph::new(identity_chain(1), &default_registry()).unwrap();
    graph.run(Vec::new()).await.unwrap();
    graph.close_stream("in").unwrap();
    graph.wait_until_done().await.unwrap();
    graph.wait_until_done().await.unwrap();
}

#[tokio::test]
async fn test_producer_task_uses_input_handle() {
    let mut graph = Graph::new(identity_chain(2), &default_registry()).unwrap();
    let seen = collect(&mut graph, "out");
    graph.run(Vec::new()).await.unwrap();

    let input = graph.input_handle();
    let producer = tokio::spawn(async move {
        for i in 0..100i64 {
            input.add_packet("in", Packet::new(i).at(i)).await.unwrap();
        }
        input.close_stream("in").unwrap();
    });

    graph.wait_until_done().await.unwrap();
    producer.await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 100);
}

#[tokio::test]
async fn test_concurrency_limit_still_completes() {
    let config = identity_chain(3).max_concurrent_firings(1);
    let mut graph = Graph::new(config, &default_registry()).unwrap();
    let seen = collect(&mut graph, "out");

    graph.run(Vec::new()).await.unwrap();
    for i in 0..20i64 {
        graph.add_packet("in", Packet::new(i).at(i)).await.unwrap();
    }
    graph.close_all_input_streams();
    graph.wait_until_done().await.unwrap();

    assert_eq!(timestamps(&seen.lock().unwrap()), (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_builtin_sources_joined_by_tag() {
    let config = GraphConfig::new()
        .output_stream("joined")
        .node(
            NodeConfig::new("StringSourceCalculator")
                .named("left")
                .output("STR:left")
                .options(serde_json::json!({"count": 5, "prefix": "L"})),
        )
        .node(
            NodeConfig::new("StringSourceCalculator")
                .named("right")
                .output("STR:right")
                .options(serde_json::json!({"count": 3, "prefix": "R"})),
        )
        .node(
            NodeConfig::new("StringJoinCalculator")
                .named("join")
                .input("STR:0:left")
                .input("STR:1:right")
                .output("STR:joined"),
        );
    let mut graph = Graph::new(config, &default_registry()).unwrap();
    let seen = collect(&mut graph, "joined");
    graph.run(Vec::new()).await.unwrap();
    graph.wait_until_done().await.unwrap();

    let seen = seen.lock().unwrap();
    let joined: Vec<&str> = seen.iter().map(|p| p.get::<String>().unwrap().as_str()).collect();
    assert_eq!(joined, vec!["L0R0", "L1R1", "L2R2", "L3<EMPTY>", "L4<EMPTY>"]);
    assert_eq!(timestamps(&seen), (0..5).collect::<Vec<_>>());
    assert_eq!(graph.node_state("right"), Some(NodeState::Closed));
}
