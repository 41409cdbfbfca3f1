use super::node::{InputBinding, Node, SidePacketBinding, StateBoard};
use super::observer::{Observer, ObserverRegistry};
use super::scheduler::Scheduler;
use super::state::{GraphState, NodeState};
use super::stream::Stream;
use crate::config::{self, GraphConfig, NodeConfig, QueueFullPolicy, SchedulerConfig};
use crate::core::{Calculator, Contract, PacketType, Packet, PortRef, PortSet, SidePacketStore};
use crate::error::{GraphError, GraphResult, StreamError};
use crate::observability::{GraphMonitor, MetricsCollector};
use crate::registry::CalculatorRegistry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cloneable handle for injecting packets into a running graph.
///
/// Producer tasks hold one of these while the owner of the [`Graph`] waits
/// on it.
#[derive(Clone)]
pub struct GraphInput {
    streams: Arc<HashMap<String, Arc<Stream>>>,
    policy: QueueFullPolicy,
    running: Arc<AtomicBool>,
    wakeup: mpsc::UnboundedSender<()>,
}

impl GraphInput {
    fn stream(&self, name: &str) -> GraphResult<&Arc<Stream>> {
        self.streams
            .get(name)
            .ok_or_else(|| GraphError::stream(name, StreamError::UnknownStream))
    }

    /// Appends `packet` to the graph input stream `stream`.
    ///
    /// The packet's timestamp must be valid and strictly greater than the
    /// last one accepted on the stream. A full queue waits or fails
    /// depending on the configured `QueueFullPolicy`.
    pub async fn add_packet(&self, stream: &str, packet: Packet) -> GraphResult<()> {
        let target = self.stream(stream)?;
        if !self.running.load(Ordering::SeqCst) {
            return Err(GraphError::stream(stream, StreamError::NotRunning));
        }

        let pushed = match self.policy {
            QueueFullPolicy::Block => target.push_waiting(packet).await,
            QueueFullPolicy::FailFast => target.try_push(packet),
        };
        if let Err(reason) = pushed {
            debug!(stream, %reason, "packet rejected");
            return Err(GraphError::stream(stream, reason));
        }

        let _ = self.wakeup.send(());
        Ok(())
    }

    /// Marks a graph input stream as finished. Closing twice is harmless.
    pub fn close_stream(&self, stream: &str) -> GraphResult<()> {
        if self.stream(stream)?.close() {
            debug!(stream, "input stream closed");
        }
        let _ = self.wakeup.send(());
        Ok(())
    }

    pub fn close_all_input_streams(&self) {
        for stream in self.streams.values() {
            stream.close();
        }
        let _ = self.wakeup.send(());
    }
}

/// One node between construction steps.
struct NodePlan {
    name: String,
    calculator: Box<dyn Calculator>,
    contract: Contract,
    inputs: Vec<(PortRef, String)>,
    outputs: Vec<(PortRef, String)>,
    side_packets: Vec<(PortRef, String)>,
    back_edges: HashSet<PortRef>,
}

enum Producer {
    GraphInput,
    Node(usize),
}

struct StreamPlan {
    producer: Producer,
    packet_type: PacketType,
}

fn binding_for<'a>(bindings: &'a [(PortRef, String)], port: &PortRef) -> Option<&'a str> {
    bindings
        .iter()
        .find(|(bound, _)| bound == port)
        .map(|(_, name)| name.as_str())
}

/// Every binding names a declared port and every required port is bound.
fn check_ports(
    node: &str,
    kind: &str,
    declared: &PortSet,
    bound: &[(PortRef, String)],
    allow_optional: bool,
) -> GraphResult<()> {
    for (port, _) in bound {
        if declared.spec(port).is_none() {
            return Err(GraphError::config(format!(
                "node `{}` binds {} {} which its contract does not declare",
                node, kind, port
            )));
        }
    }
    for (port, spec) in declared.iter() {
        if binding_for(bound, port).is_none() && !(allow_optional && spec.optional) {
            return Err(GraphError::config(format!(
                "node `{}` leaves {} {} unbound",
                node, kind, port
            )));
        }
    }
    Ok(())
}

fn plan_node(index: usize, cfg: &NodeConfig, registry: &CalculatorRegistry) -> GraphResult<NodePlan> {
    let name = cfg
        .name
        .clone()
        .unwrap_or_else(|| format!("{}_{}", cfg.calculator, index));
    let in_node = |e: GraphError| match e {
        GraphError::Configuration(message) => {
            GraphError::config(format!("node `{}`: {}", name, message))
        }
        other => other,
    };

    let mut calculator = registry.create(&cfg.calculator).map_err(in_node)?;
    calculator
        .configure(&cfg.options)
        .map_err(|e| GraphError::config(format!("node `{}`: bad options: {:#}", name, e)))?;
    let mut contract = Contract::new();
    calculator
        .contract(&mut contract)
        .map_err(|e| GraphError::config(format!("node `{}`: contract failed: {:#}", name, e)))?;

    let inputs = config::resolve_bindings(&cfg.input_streams).map_err(in_node)?;
    let outputs = config::resolve_bindings(&cfg.output_streams).map_err(in_node)?;
    let side_packets = config::resolve_bindings(&cfg.input_side_packets).map_err(in_node)?;
    check_ports(&name, "input stream", contract.input_ports(), &inputs, false)?;
    check_ports(&name, "output stream", contract.output_ports(), &outputs, false)?;
    check_ports(&name, "side packet", contract.side_packet_ports(), &side_packets, true)?;

    let mut back_edges = HashSet::new();
    for port in &cfg.back_edges {
        let port = config::parse_port_ref(port).map_err(in_node)?;
        if binding_for(&inputs, &port).is_none() {
            return Err(GraphError::config(format!(
                "node `{}` marks {} as a back edge but has no such input",
                name, port
            )));
        }
        back_edges.insert(port);
    }

    Ok(NodePlan {
        name,
        calculator,
        contract,
        inputs,
        outputs,
        side_packets,
        back_edges,
    })
}

/// Kahn's algorithm over data edges; ties go to the earlier configured node.
fn topological_order(plans: &[NodePlan], streams: &HashMap<String, StreamPlan>) -> GraphResult<Vec<usize>> {
    let mut indegree = vec![0usize; plans.len()];
    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); plans.len()];
    for (consumer, plan) in plans.iter().enumerate() {
        for (port, stream) in &plan.inputs {
            if plan.back_edges.contains(port) {
                continue;
            }
            if let Some(StreamPlan { producer: Producer::Node(producer), .. }) = streams.get(stream) {
                downstream[*producer].push(consumer);
                indegree[consumer] += 1;
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..plans.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(plans.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &consumer in &downstream[next] {
            indegree[consumer] -= 1;
            if indegree[consumer] == 0 {
                ready.insert(consumer);
            }
        }
    }

    if order.len() < plans.len() {
        let stuck: Vec<&str> = (0..plans.len())
            .filter(|i| indegree[*i] > 0)
            .map(|i| plans[i].name.as_str())
            .collect();
        return Err(GraphError::config(format!(
            "cycle through nodes [{}] is not marked as a back edge",
            stuck.join(", ")
        )));
    }
    Ok(order)
}

/// A validated, wired dataflow graph and its run control.
pub struct Graph {
    nodes: Vec<Node>,
    streams: HashMap<String, Arc<Stream>>,
    input: GraphInput,
    wakeup_rx: Option<mpsc::UnboundedReceiver<()>>,
    observers: ObserverRegistry,
    declared_side_packets: Vec<String>,
    side_packets: SidePacketStore,
    board: StateBoard,
    metrics: MetricsCollector,
    scheduler_config: SchedulerConfig,
    state: GraphState,
    handle: Option<JoinHandle<GraphResult<()>>>,
    outcome: Option<GraphResult<()>>,
}

impl Graph {
    /// Instantiates every node, takes its contract and wires the streams.
    ///
    /// All topology and contract problems surface here as
    /// `GraphError::Configuration`, before any packet can flow.
    pub fn new(config: GraphConfig, registry: &CalculatorRegistry) -> GraphResult<Self> {
        let mut plans = Vec::with_capacity(config.nodes.len());
        let mut names = HashSet::new();
        for (index, node_config) in config.nodes.iter().enumerate() {
            let plan = plan_node(index, node_config, registry)?;
            if !names.insert(plan.name.clone()) {
                return Err(GraphError::config(format!("duplicate node name `{}`", plan.name)));
            }
            plans.push(plan);
        }

        let mut declared = HashSet::new();
        for name in &config.input_side_packets {
            if !declared.insert(name.as_str()) {
                return Err(GraphError::config(format!("side packet `{}` declared twice", name)));
            }
        }
        for plan in &plans {
            if let Some((port, name)) = plan
                .side_packets
                .iter()
                .find(|(_, name)| !declared.contains(name.as_str()))
            {
                return Err(GraphError::config(format!(
                    "node `{}` side packet {} names `{}` which the graph does not declare",
                    plan.name, port, name
                )));
            }
        }

        // Producers first, so every consumer can be checked against one.
        let mut stream_plans: HashMap<String, StreamPlan> = HashMap::new();
        for name in &config.input_streams {
            let plan = StreamPlan {
                producer: Producer::GraphInput,
                packet_type: PacketType::Any,
            };
            if stream_plans.insert(name.clone(), plan).is_some() {
                return Err(GraphError::config(format!("graph input stream `{}` declared twice", name)));
            }
        }
        for (index, plan) in plans.iter().enumerate() {
            for (port, stream) in &plan.outputs {
                let packet_type = plan
                    .contract
                    .output_ports()
                    .spec(port)
                    .map(|spec| spec.packet_type)
                    .unwrap_or_default();
                let previous = stream_plans.insert(
                    stream.clone(),
                    StreamPlan {
                        producer: Producer::Node(index),
                        packet_type,
                    },
                );
                if previous.is_some() {
                    return Err(GraphError::config(format!(
                        "stream `{}` has more than one producer",
                        stream
                    )));
                }
            }
        }

        for plan in &plans {
            for (port, stream) in &plan.inputs {
                let consumer_type = plan
                    .contract
                    .input_ports()
                    .spec(port)
                    .map(|spec| spec.packet_type)
                    .unwrap_or_default();
                let producer = stream_plans.get_mut(stream).ok_or_else(|| {
                    GraphError::config(format!(
                        "node `{}` reads stream `{}` which nothing produces",
                        plan.name, stream
                    ))
                })?;
                if !producer.packet_type.is_compatible_with(&consumer_type) {
                    return Err(GraphError::config(format!(
                        "node `{}` input {} expects `{}` but stream `{}` carries `{}`",
                        plan.name,
                        port,
                        consumer_type.name(),
                        stream,
                        producer.packet_type.name()
                    )));
                }
                // Graph inputs take the type of their first typed consumer.
                if matches!(producer.producer, Producer::GraphInput)
                    && producer.packet_type == PacketType::Any
                {
                    producer.packet_type = consumer_type;
                }
            }
        }

        for name in &config.output_streams {
            if !stream_plans.contains_key(name) {
                return Err(GraphError::config(format!(
                    "graph output stream `{}` is not produced by any node",
                    name
                )));
            }
        }

        let order = topological_order(&plans, &stream_plans)?;

        let depth = config.scheduler.max_queue_depth;
        let streams: HashMap<String, Arc<Stream>> = stream_plans
            .iter()
            .map(|(name, plan)| (name.clone(), Arc::new(Stream::new(name.clone(), plan.packet_type, depth))))
            .collect();

        let board = StateBoard::default();
        let mut metrics = MetricsCollector::new();
        let mut slots: Vec<Option<NodePlan>> = plans.into_iter().map(Some).collect();
        let mut nodes = Vec::with_capacity(slots.len());
        for index in order {
            let Some(plan) = slots[index].take() else {
                continue;
            };

            let input_layout = plan.contract.input_ports().layout();
            let inputs = input_layout
                .ports()
                .iter()
                .filter_map(|port| {
                    let stream = streams.get(binding_for(&plan.inputs, port)?)?.clone();
                    let consumer = stream.add_consumer();
                    Some(InputBinding {
                        stream,
                        consumer,
                        back_edge: plan.back_edges.contains(port),
                    })
                })
                .collect();

            let output_layout = plan.contract.output_ports().layout();
            let outputs = output_layout
                .ports()
                .iter()
                .filter_map(|port| streams.get(binding_for(&plan.outputs, port)?).cloned())
                .collect();

            let side_layout = plan.contract.side_packet_ports().layout();
            let side_bindings = plan
                .contract
                .side_packet_ports()
                .iter()
                .map(|(port, spec)| SidePacketBinding {
                    port: port.clone(),
                    name: binding_for(&plan.side_packets, port).map(str::to_string),
                    packet_type: spec.packet_type,
                })
                .collect();

            let node = Node::new(
                &plan.name,
                plan.calculator,
                inputs,
                outputs,
                input_layout,
                output_layout,
                side_layout,
                side_bindings,
                plan.contract.input_policy(),
                board.clone(),
            );
            metrics.register(plan.name.clone(), node.metrics.clone());
            nodes.push(node);
        }

        let input_streams: HashMap<String, Arc<Stream>> = config
            .input_streams
            .iter()
            .filter_map(|name| Some((name.clone(), streams.get(name)?.clone())))
            .collect();
        let (wakeup, wakeup_rx) = mpsc::unbounded_channel();
        let input = GraphInput {
            streams: Arc::new(input_streams),
            policy: config.scheduler.queue_full_policy,
            running: Arc::new(AtomicBool::new(false)),
            wakeup,
        };

        info!(nodes = nodes.len(), streams = streams.len(), "graph initialized");

        Ok(Self {
            nodes,
            streams,
            input,
            wakeup_rx: Some(wakeup_rx),
            observers: ObserverRegistry::default(),
            declared_side_packets: config.input_side_packets,
            side_packets: SidePacketStore::new(),
            board,
            metrics,
            scheduler_config: config.scheduler,
            state: GraphState::Idle,
            handle: None,
            outcome: None,
        })
    }

    fn set_state(&mut self, next: GraphState) {
        if !self.state.can_transition_to(&next) {
            warn!(from = self.state.name(), to = next.name(), "unexpected graph state transition");
        }
        debug!(from = self.state.name(), to = next.name(), "graph state");
        self.state = next;
    }

    fn ensure_idle(&self) -> GraphResult<()> {
        match self.state {
            GraphState::Idle => Ok(()),
            _ => Err(GraphError::AlreadyStarted),
        }
    }

    /// Attaches `observer` to any stream of the graph. Must precede `run`.
    pub fn register_observer(
        &mut self,
        stream: &str,
        observer: impl Observer + 'static,
    ) -> GraphResult<()> {
        self.ensure_idle()?;
        let target = self
            .streams
            .get(stream)
            .ok_or_else(|| GraphError::config(format!("cannot observe unknown stream `{}`", stream)))?;
        self.observers.register(target.clone(), Box::new(observer));
        Ok(())
    }

    /// Binds a side packet the graph declares. Must precede `run`; names
    /// bind once.
    pub fn bind_side_packet(&mut self, name: impl Into<String>, packet: Packet) -> GraphResult<()> {
        self.ensure_idle()?;
        let name = name.into();
        if !self.declared_side_packets.contains(&name) {
            return Err(GraphError::config(format!(
                "side packet `{}` is not declared by the graph",
                name
            )));
        }
        if !self.side_packets.insert(name.clone(), packet) {
            return Err(GraphError::config(format!("side packet `{}` bound twice", name)));
        }
        Ok(())
    }

    /// Opens every node and starts the scheduler.
    ///
    /// `side_packets` are added to those bound with `bind_side_packet`.
    /// Returns once the graph accepts packets; use `wait_until_done` for
    /// the outcome of the run.
    pub async fn run<I>(&mut self, side_packets: I) -> GraphResult<()>
    where
        I: IntoIterator<Item = (String, Packet)>,
    {
        self.ensure_idle()?;
        for (name, packet) in side_packets {
            self.bind_side_packet(name, packet)?;
        }

        let result = self.open_all().await;
        if let Err(e) = result {
            for stream in self.streams.values() {
                stream.halt();
            }
            self.set_state(GraphState::Failed {
                error_msg: e.to_string(),
            });
            self.outcome = Some(Err(e.clone()));
            return Err(e);
        }

        let wakeups = self
            .wakeup_rx
            .take()
            .ok_or_else(|| GraphError::Internal("scheduler already started".to_string()))?;
        let graph_inputs = self.input.streams.values().cloned().collect();
        let scheduler = Scheduler::new(
            std::mem::take(&mut self.nodes),
            std::mem::take(&mut self.observers),
            graph_inputs,
            wakeups,
            self.scheduler_config.max_concurrent_firings,
            self.input.running.clone(),
        );

        self.input.running.store(true, Ordering::SeqCst);
        self.handle = Some(tokio::spawn(scheduler.run()));
        self.set_state(GraphState::Running {
            start_time: Some(std::time::Instant::now()),
        });
        Ok(())
    }

    async fn open_all(&mut self) -> GraphResult<()> {
        if let Some(name) = self
            .declared_side_packets
            .iter()
            .find(|name| !self.side_packets.contains(name))
        {
            return Err(GraphError::config(format!("side packet `{}` is not bound", name)));
        }
        for node in &self.nodes {
            for name in node.required_side_packets() {
                if !self.side_packets.contains(name) {
                    return Err(GraphError::config(format!(
                        "side packet `{}` needed by node `{}` is not bound",
                        name, node.name
                    )));
                }
            }
        }
        for node in &mut self.nodes {
            node.open(&self.side_packets).await?;
        }
        for node in &mut self.nodes {
            node.transition_to(NodeState::Running)?;
        }
        Ok(())
    }

    /// See [`GraphInput::add_packet`].
    pub async fn add_packet(&self, stream: &str, packet: Packet) -> GraphResult<()> {
        self.input.add_packet(stream, packet).await
    }

    pub fn close_stream(&self, stream: &str) -> GraphResult<()> {
        self.input.close_stream(stream)
    }

    pub fn close_all_input_streams(&self) {
        self.input.close_all_input_streams()
    }

    /// A handle producers can move into their own tasks.
    pub fn input_handle(&self) -> GraphInput {
        self.input.clone()
    }

    /// Blocks until every node is closed or the first failure. Later calls
    /// return the same outcome.
    pub async fn wait_until_done(&mut self) -> GraphResult<()> {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let handle = self.handle.take().ok_or(GraphError::NotRunning)?;
        let outcome = match handle.await {
            Ok(result) => result,
            Err(e) => Err(GraphError::Internal(format!("scheduler task failed: {}", e))),
        };

        let next = match (&outcome, &self.state) {
            (Ok(()), GraphState::Running { start_time }) => GraphState::Completed {
                duration: start_time.map(|t| t.elapsed()),
            },
            (Ok(()), _) => GraphState::Completed { duration: None },
            (Err(e), _) => GraphState::Failed {
                error_msg: e.to_string(),
            },
        };
        self.set_state(next);
        self.outcome = Some(outcome.clone());
        outcome
    }

    pub fn state(&self) -> &GraphState {
        &self.state
    }

    pub fn node_state(&self, node: &str) -> Option<NodeState> {
        self.board.get(node)
    }

    pub fn node_states(&self) -> HashMap<String, NodeState> {
        self.board.snapshot()
    }

    pub fn monitor(&self) -> GraphMonitor {
        GraphMonitor::new(self.metrics.clone())
    }

    pub fn has_stream(&self, stream: &str) -> bool {
        self.streams.contains_key(stream)
    }
}

/// Dropping a running graph aborts its scheduler; call `wait_until_done`
/// first for an orderly finish.
impl Drop for Graph {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
        // The aborted scheduler never reaches its own shutdown, so release
        // producers still waiting on a full input here.
        self.input.running.store(false, Ordering::SeqCst);
        for stream in self.input.streams.values() {
            stream.halt();
        }
    }
}
