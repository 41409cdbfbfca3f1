mod common;

use common::default_registry;
use streamgraph::{Graph, GraphConfig, NodeConfig, Packet};

#[tokio::test]
async fn test_monitor_reports_every_node_after_run() {
    let config = GraphConfig::new()
        .input_stream("in")
        .node(
            NodeConfig::new("ScaleCalculator")
                .named("scale")
                .input("in")
                .output("scaled"),
        )
        .node(
            NodeConfig::new("PassThroughCalculator")
                .named("tap")
                .input("scaled")
                .output("out"),
        );
    let mut graph = Graph::new(config, &default_registry()).unwrap();
    graph.run(Vec::new()).await.unwrap();
    for i in 0..6i64 {
        graph.add_packet("in", Packet::new(i as f64).at(i)).await.unwrap();
    }
    graph.close_all_input_streams();
    graph.wait_until_done().await.unwrap();

    let monitor = graph.monitor();
    let snapshot = monitor.collector().snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot["scale"].firings, 6);
    assert_eq!(snapshot["tap"].errors_count, 0);

    let report = monitor.generate_report();
    assert!(report.contains("[scale]"));
    assert!(report.contains("[tap]"));
    assert!(report.contains("Firings: 6"));
}

#[tokio::test]
async fn test_bounded_queues_still_drain() {
    // A tight depth throttles the upstream node without stalling the run.
    let config = GraphConfig::new()
        .input_stream("in")
        .node(NodeConfig::new("PassThroughCalculator").named("a").input("in").output("x"))
        .node(NodeConfig::new("Slow").named("b").input("x").output("out"))
        .max_queue_depth(1);
    let mut graph = Graph::new(config, &default_registry()).unwrap();
    let seen = common::collect(&mut graph, "out");
    graph.run(Vec::new()).await.unwrap();

    for i in 0..8i64 {
        graph.add_packet("in", Packet::new(i).at(i)).await.unwrap();
    }
    graph.close_all_input_streams();
    graph.wait_until_done().await.unwrap();

    assert_eq!(common::timestamps(&seen.lock().unwrap()), (0..8).collect::<Vec<_>>());
}
