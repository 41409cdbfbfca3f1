use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streamgraph::{
    Calculator, CalculatorRegistry, Contract, Graph, GraphConfig, NodeConfig, Outcome, Packet,
    ProcessContext,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Reports which of its two inputs were present at each timestamp.
struct Presence;

#[async_trait]
impl Calculator for Presence {
    fn contract(&self, cc: &mut Contract) -> Result<()> {
        cc.inputs().index(0).set::<f64>();
        cc.inputs().index(1).set::<f64>();
        cc.outputs().index(0).set::<String>();
        Ok(())
    }

    async fn process(&mut self, ctx: &mut ProcessContext) -> Result<Outcome> {
        let describe = |p: &Packet| match p.get::<f64>() {
            Ok(v) => format!("{:.1}", v),
            Err(_) => "-".to_string(),
        };
        let line = format!(
            "{} | {}",
            describe(ctx.inputs().index(0)),
            describe(ctx.inputs().index(1))
        );
        let ts = ctx.input_timestamp();
        ctx.outputs().index(0)?.add_packet(Packet::new(line).at(ts));
        Ok(Outcome::Continue)
    }
}

/// Forwards its input after a fixed delay.
struct Slow;

#[async_trait]
impl Calculator for Slow {
    fn contract(&self, cc: &mut Contract) -> Result<()> {
        cc.inputs().index(0).set_any();
        cc.outputs().index(0).set_any();
        Ok(())
    }

    async fn process(&mut self, ctx: &mut ProcessContext) -> Result<Outcome> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let packet = ctx.inputs().index(0).clone();
        ctx.outputs().index(0)?.add_packet(packet);
        Ok(Outcome::Continue)
    }
}

fn registry() -> CalculatorRegistry {
    let mut registry = CalculatorRegistry::with_builtins();
    registry
        .register("Presence", || Box::new(Presence) as Box<dyn Calculator>)
        .register("Slow", || Box::new(Slow) as Box<dyn Calculator>);
    registry
}

fn collect(graph: &mut Graph, stream: &str) -> Result<Arc<Mutex<Vec<Packet>>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    graph.register_observer(stream, move |packet: &Packet| -> Result<()> {
        sink.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(packet.clone());
        Ok(())
    })?;
    Ok(seen)
}

async fn identity_chain(registry: &CalculatorRegistry) -> Result<()> {
    println!("=== Identity chain ===");
    let config = GraphConfig::from_json(serde_json::json!({
        "input_streams": ["in"],
        "output_streams": ["out"],
        "nodes": [
            {"calculator": "PassThroughCalculator", "name": "a", "input_streams": ["in"], "output_streams": ["mid"]},
            {"calculator": "PassThroughCalculator", "name": "b", "input_streams": ["mid"], "output_streams": ["out"]}
        ]
    }))?;
    let mut graph = Graph::new(config, registry)?;
    let seen = collect(&mut graph, "out")?;

    graph.run(Vec::new()).await?;
    for i in 0..13i64 {
        graph.add_packet("in", Packet::new(i as f64 * 0.1).at(i)).await?;
    }
    graph.close_all_input_streams();
    graph.wait_until_done().await?;

    let seen = seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    println!("received {} packets", seen.len());
    println!("{}", graph.monitor().generate_report());
    Ok(())
}

async fn join_with_gap(registry: &CalculatorRegistry) -> Result<()> {
    println!("=== Join with a gap ===");
    let config = GraphConfig::new()
        .input_stream("s1")
        .input_stream("s2")
        .output_stream("joined")
        .node(
            NodeConfig::new("Presence")
                .named("join")
                .input("s1")
                .input("s2")
                .output("joined"),
        );
    let mut graph = Graph::new(config, registry)?;
    let seen = collect(&mut graph, "joined")?;

    graph.run(Vec::new()).await?;
    for i in 0..8i64 {
        graph.add_packet("s1", Packet::new(i as f64).at(i)).await?;
        if i != 5 {
            graph.add_packet("s2", Packet::new(i as f64 * 10.0).at(i)).await?;
        }
    }
    graph.close_all_input_streams();
    graph.wait_until_done().await?;

    for packet in seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).iter() {
        println!("t={} {}", packet.timestamp(), packet.get::<String>()?);
    }
    Ok(())
}

async fn sources_with_stop(registry: &CalculatorRegistry) -> Result<()> {
    println!("=== Two sources joined by tag ===");
    let config = GraphConfig::new()
        .output_stream("joined")
        .node(
            NodeConfig::new("StringSourceCalculator")
                .named("names")
                .output("STR:names")
                .options(serde_json::json!({"count": 17, "prefix": "name"})),
        )
        .node(
            NodeConfig::new("StringSourceCalculator")
                .named("labels")
                .output("STR:labels")
                .options(serde_json::json!({"count": 10, "prefix": "-label"})),
        )
        .node(
            NodeConfig::new("StringJoinCalculator")
                .named("join")
                .input("STR:0:names")
                .input("STR:1:labels")
                .output("STR:joined"),
        );
    let mut graph = Graph::new(config, registry)?;
    let seen = collect(&mut graph, "joined")?;

    graph.run(Vec::new()).await?;
    graph.wait_until_done().await?;

    for packet in seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).iter() {
        println!("t={} {}", packet.timestamp(), packet.get::<String>()?);
    }
    println!("sources are {:?} and {:?}", graph.node_state("names"), graph.node_state("labels"));
    Ok(())
}

async fn limited_slow_node(registry: &CalculatorRegistry) -> Result<()> {
    println!("=== Flow limiter in front of a slow node ===");
    let config = GraphConfig::new()
        .input_stream("frames")
        .output_stream("done")
        .node(
            NodeConfig::new("FlowLimiterCalculator")
                .named("limiter")
                .input("frames")
                .input("FINISHED:done")
                .back_edge("FINISHED")
                .output("limited"),
        )
        .node(NodeConfig::new("Slow").named("slow").input("limited").output("done"));
    let mut graph = Graph::new(config, registry)?;
    let seen = collect(&mut graph, "done")?;

    graph.run(Vec::new()).await?;
    let input = graph.input_handle();
    let producer = tokio::spawn(async move {
        for i in 0..50i64 {
            input.add_packet("frames", Packet::new(i).at(i)).await?;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        input.close_all_input_streams();
        Ok::<_, streamgraph::GraphError>(())
    });
    producer.await??;
    graph.wait_until_done().await?;

    let passed = seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len();
    println!("{} of 50 frames reached the slow node", passed);
    println!("{}", graph.monitor().generate_report());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let registry = registry();
    identity_chain(&registry).await?;
    join_with_gap(&registry).await?;
    sources_with_stop(&registry).await?;
    limited_slow_node(&registry).await?;
    Ok(())
}
