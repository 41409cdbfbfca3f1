use super::node::{Node, Readiness};
use super::observer::ObserverRegistry;
use super::state::NodeState;
use super::stream::Stream;
use crate::core::{Calculator, InputSet, Outcome, OutputSet, ProcessContext, Timestamp};
use crate::error::{GraphError, GraphResult};
use anyhow::anyhow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FiringKind {
    Process,
    Close,
}

/// A finished firing, carrying the calculator back to its node. The
/// calculator is gone if the firing panicked.
struct Firing {
    node: usize,
    kind: FiringKind,
    timestamp: Timestamp,
    calculator: Option<Box<dyn Calculator>>,
    outputs: Option<OutputSet>,
    result: anyhow::Result<Outcome>,
}

/// Central control loop of a running graph.
///
/// The scheduler task is the only place that decides readiness, so no two
/// firings of the same node can be selected at once. Nodes are kept in
/// topological order (back-edges excluded) and dispatched in that order.
pub(crate) struct Scheduler {
    nodes: Vec<Node>,
    observers: ObserverRegistry,
    graph_inputs: Vec<Arc<Stream>>,
    firings: JoinSet<Firing>,
    wakeups: mpsc::UnboundedReceiver<()>,
    wakeups_open: bool,
    max_concurrent: Option<usize>,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        nodes: Vec<Node>,
        observers: ObserverRegistry,
        graph_inputs: Vec<Arc<Stream>>,
        wakeups: mpsc::UnboundedReceiver<()>,
        max_concurrent: Option<usize>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            nodes,
            observers,
            graph_inputs,
            firings: JoinSet::new(),
            wakeups,
            wakeups_open: true,
            max_concurrent,
            running,
        }
    }

    pub async fn run(mut self) -> GraphResult<()> {
        info!(
            nodes = self.nodes.len(),
            observers = self.observers.len(),
            "scheduler started"
        );

        let result = self.run_loop().await;

        self.running.store(false, Ordering::SeqCst);
        for stream in &self.graph_inputs {
            stream.halt();
        }
        match &result {
            Ok(()) => info!("graph run completed"),
            Err(e) => {
                error!(error = %e, "graph run aborted");
                // In-flight firings finish on their own; their results are dropped.
                self.firings.detach_all();
            }
        }
        result
    }

    async fn run_loop(&mut self) -> GraphResult<()> {
        loop {
            self.observers.deliver()?;
            if self.is_done() {
                return Ok(());
            }
            self.dispatch()?;

            tokio::select! {
                joined = self.firings.join_next(), if !self.firings.is_empty() => {
                    if let Some(joined) = joined {
                        self.complete(joined)?;
                    }
                }
                wake = self.wakeups.recv(), if self.wakeups_open => {
                    if wake.is_none() {
                        self.wakeups_open = false;
                    }
                }
                else => {
                    return Err(GraphError::Internal(
                        "graph stalled: nothing in flight and every input handle is gone".to_string(),
                    ));
                }
            }
        }
    }

    fn is_done(&self) -> bool {
        self.firings.is_empty()
            && self.nodes.iter().all(|node| node.state() == NodeState::Closed)
            && self.graph_inputs.iter().all(|stream| stream.is_closed())
    }

    fn at_capacity(&self) -> bool {
        self.max_concurrent
            .is_some_and(|limit| self.firings.len() >= limit)
    }

    fn dispatch(&mut self) -> GraphResult<()> {
        let dispatched = self.dispatch_pass(false)?;
        // Only relax when no open graph input could still unblock the nodes.
        if dispatched == 0
            && self.firings.is_empty()
            && self.graph_inputs.iter().all(|stream| stream.is_closed())
            && self.has_throttled_work()
        {
            warn!("every runnable node is throttled by a full queue; relaxing the limit for one pass");
            self.dispatch_pass(true)?;
        }
        Ok(())
    }

    fn has_throttled_work(&self) -> bool {
        self.nodes
            .iter()
            .any(|node| node.is_throttled() && node.readiness() != Readiness::Idle)
    }

    fn dispatch_pass(&mut self, ignore_throttle: bool) -> GraphResult<usize> {
        let mut dispatched = 0;
        for idx in 0..self.nodes.len() {
            if self.at_capacity() {
                break;
            }
            let readiness = self.nodes[idx].readiness();
            let throttled = !ignore_throttle
                && readiness != Readiness::Close
                && self.nodes[idx].is_throttled();
            if throttled {
                continue;
            }

            match readiness {
                Readiness::Idle => continue,
                Readiness::Fire(ts) => {
                    let inputs = self.nodes[idx].take_inputs(ts);
                    self.spawn_firing(idx, FiringKind::Process, ts, inputs)?;
                }
                Readiness::Source => {
                    let inputs = self.nodes[idx].empty_inputs();
                    self.spawn_firing(idx, FiringKind::Process, Timestamp::UNSTARTED, inputs)?;
                }
                Readiness::Close => {
                    self.nodes[idx].transition_to(NodeState::Closing)?;
                    let inputs = self.nodes[idx].empty_inputs();
                    self.spawn_firing(idx, FiringKind::Close, Timestamp::DONE, inputs)?;
                }
            }
            dispatched += 1;
        }
        Ok(dispatched)
    }

    fn spawn_firing(
        &mut self,
        idx: usize,
        kind: FiringKind,
        timestamp: Timestamp,
        inputs: InputSet,
    ) -> GraphResult<()> {
        let node = &mut self.nodes[idx];
        let mut calculator = node
            .take_calculator()
            .ok_or_else(|| GraphError::Internal(format!("node `{}` dispatched while busy", node.name)))?;
        let mut ctx = ProcessContext::new(
            node.name.clone(),
            timestamp,
            inputs,
            OutputSet::new(node.output_layout.clone()),
            node.side_packets.clone(),
            node.metrics.clone(),
        );
        let metrics = node.metrics.clone();
        trace!(node = %node.name, %timestamp, ?kind, "firing");

        let body = tokio::spawn(async move {
            let start = metrics.start_processing();
            let result = match kind {
                FiringKind::Process => calculator.process(&mut ctx).await,
                FiringKind::Close => calculator.close(&mut ctx).await.map(|_| Outcome::Stop),
            };
            metrics.finish_processing(start);
            (calculator, ctx.into_outputs(), result)
        });

        self.firings.spawn(async move {
            match body.await {
                Ok((calculator, outputs, result)) => Firing {
                    node: idx,
                    kind,
                    timestamp,
                    calculator: Some(calculator),
                    outputs: Some(outputs),
                    result,
                },
                Err(join_error) => Firing {
                    node: idx,
                    kind,
                    timestamp,
                    calculator: None,
                    outputs: None,
                    result: Err(if join_error.is_panic() {
                        anyhow!("calculator panicked")
                    } else {
                        anyhow!("firing was cancelled")
                    }),
                },
            }
        });
        Ok(())
    }

    fn complete(&mut self, joined: Result<Firing, JoinError>) -> GraphResult<()> {
        let firing = joined.map_err(|e| GraphError::Internal(format!("firing task lost: {}", e)))?;

        let idx = firing.node;
        let node = &mut self.nodes[idx];
        if let Some(calculator) = firing.calculator {
            node.restore_calculator(calculator);
        }

        let outcome = match firing.result {
            Ok(outcome) => outcome,
            Err(e) => {
                node.metrics.record_error();
                node.fail();
                return Err(GraphError::processing(&node.name, firing.timestamp, &e));
            }
        };
        if firing.kind == FiringKind::Process {
            node.metrics.record_firing();
        }

        if let Some(outputs) = firing.outputs {
            if let Err(e) = Self::commit_outputs(node, firing.timestamp, outputs) {
                node.fail();
                return Err(e);
            }
        }

        match (firing.kind, outcome) {
            (FiringKind::Close, _) => {
                node.close_outputs();
                node.detach_inputs();
                node.transition_to(NodeState::Closed)?;
            }
            (FiringKind::Process, Outcome::Stop) => {
                debug!(node = %node.name, timestamp = %firing.timestamp, "node requested stop");
                node.request_stop();
            }
            (FiringKind::Process, Outcome::Continue) => {}
        }
        Ok(())
    }

    /// Publishes a firing's packets and bounds to the node's output streams.
    fn commit_outputs(node: &Node, timestamp: Timestamp, outputs: OutputSet) -> GraphResult<()> {
        for (position, port) in outputs.into_ports().into_iter().enumerate() {
            let stream = &node.outputs[position];
            let (packets, bound) = port.into_parts();
            for packet in packets {
                stream.push(packet).map_err(|e| GraphError::Processing {
                    node: node.name.to_string(),
                    timestamp,
                    message: format!(
                        "output {} on stream `{}`: {}",
                        node.output_layout.ports()[position],
                        stream.name(),
                        e
                    ),
                })?;
            }
            if let Some(bound) = bound {
                stream.advance_bound(bound);
            }
        }
        Ok(())
    }
}
