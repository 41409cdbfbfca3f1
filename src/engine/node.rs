use super::state::NodeState;
use super::stream::{ConsumerId, PortView, Stream};
use crate::core::{
    Calculator, InputPolicy, InputSet, OpenContext, Packet, PacketType, PortLayout, PortRef,
    SidePacketStore, SidePackets, Timestamp,
};
use crate::error::{GraphError, GraphResult};
use crate::observability::NodeMetrics;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Node states readable from outside the scheduler task.
#[derive(Clone, Default)]
pub(crate) struct StateBoard {
    states: Arc<Mutex<HashMap<String, NodeState>>>,
}

impl StateBoard {
    pub fn set(&self, node: &str, state: NodeState) {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(node.to_string(), state);
    }

    pub fn get(&self, node: &str) -> Option<NodeState> {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(node)
            .copied()
    }

    pub fn snapshot(&self) -> HashMap<String, NodeState> {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

pub(crate) struct InputBinding {
    pub stream: Arc<Stream>,
    pub consumer: ConsumerId,
    pub back_edge: bool,
}

pub(crate) struct SidePacketBinding {
    pub port: PortRef,
    pub name: Option<String>,
    pub packet_type: PacketType,
}

/// What a node would do if dispatched now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    Idle,
    Fire(Timestamp),
    Source,
    Close,
}

/// A calculator plus its port bindings and lifecycle state.
///
/// Owned by the scheduler task once the graph runs. The calculator is moved
/// out for the duration of a firing, which is what keeps a node from having
/// two firings in flight.
pub(crate) struct Node {
    pub name: Arc<str>,
    state: NodeState,
    calculator: Option<Box<dyn Calculator>>,
    pub inputs: Vec<InputBinding>,
    /// Input bounds as of the last firing.
    seen_bounds: Vec<Timestamp>,
    pub outputs: Vec<Arc<Stream>>,
    pub input_layout: Arc<PortLayout>,
    pub output_layout: Arc<PortLayout>,
    side_layout: Arc<PortLayout>,
    side_bindings: Vec<SidePacketBinding>,
    pub side_packets: SidePackets,
    policy: InputPolicy,
    stop_requested: bool,
    pub metrics: Arc<NodeMetrics>,
    board: StateBoard,
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        calculator: Box<dyn Calculator>,
        inputs: Vec<InputBinding>,
        outputs: Vec<Arc<Stream>>,
        input_layout: PortLayout,
        output_layout: PortLayout,
        side_layout: PortLayout,
        side_bindings: Vec<SidePacketBinding>,
        policy: InputPolicy,
        board: StateBoard,
    ) -> Self {
        board.set(name, NodeState::Contracted);
        let seen_bounds = inputs.iter().map(|input| input.stream.bound()).collect();
        Self {
            name: Arc::from(name),
            state: NodeState::Contracted,
            calculator: Some(calculator),
            inputs,
            seen_bounds,
            outputs,
            input_layout: Arc::new(input_layout),
            output_layout: Arc::new(output_layout),
            side_layout: Arc::new(side_layout),
            side_bindings,
            side_packets: SidePackets::default(),
            policy,
            stop_requested: false,
            metrics: Arc::new(NodeMetrics::new(name)),
            board,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn transition_to(&mut self, target: NodeState) -> GraphResult<()> {
        if !self.state.can_transition_to(target) {
            return Err(GraphError::Internal(format!(
                "node `{}`: invalid state transition {} -> {}",
                self.name,
                self.state.name(),
                target.name()
            )));
        }
        debug!(node = %self.name, from = self.state.name(), to = target.name(), "node state");
        self.state = target;
        self.board.set(&self.name, target);
        Ok(())
    }

    /// Moves to `Failed` unless already terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = NodeState::Failed;
            self.board.set(&self.name, NodeState::Failed);
        }
    }

    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn take_calculator(&mut self) -> Option<Box<dyn Calculator>> {
        self.calculator.take()
    }

    pub fn restore_calculator(&mut self, calculator: Box<dyn Calculator>) {
        self.calculator = Some(calculator);
    }

    fn is_busy(&self) -> bool {
        self.calculator.is_none()
    }

    /// A node without data inputs is driven by the scheduler alone.
    pub fn is_source(&self) -> bool {
        self.inputs.iter().all(|input| input.back_edge)
    }

    /// Some output has a consumer queue at its depth limit.
    pub fn is_throttled(&self) -> bool {
        self.outputs.iter().any(|stream| stream.is_full())
    }

    pub fn readiness(&self) -> Readiness {
        if self.state != NodeState::Running || self.is_busy() {
            return Readiness::Idle;
        }
        if self.stop_requested {
            return Readiness::Close;
        }
        if self.is_source() {
            return Readiness::Source;
        }
        if self
            .inputs
            .iter()
            .filter(|input| !input.back_edge)
            .all(|input| input.stream.is_done(input.consumer))
        {
            return Readiness::Close;
        }

        let views: Vec<PortView> = self
            .inputs
            .iter()
            .map(|input| input.stream.view(input.consumer))
            .collect();
        let Some(ts) = views.iter().filter_map(|view| view.head).min() else {
            return self
                .advanced_back_edge(&views)
                .map_or(Readiness::Idle, Readiness::Fire);
        };

        match self.policy {
            InputPolicy::Immediate => Readiness::Fire(ts),
            InputPolicy::Synchronized => {
                // Back-edge ports are consumed when they happen to match and
                // are never waited on.
                let settled = self
                    .inputs
                    .iter()
                    .zip(&views)
                    .filter(|(input, _)| !input.back_edge)
                    .all(|(_, view)| view.head == Some(ts) || view.is_empty_at(ts));
                if settled {
                    Readiness::Fire(ts)
                } else {
                    Readiness::Idle
                }
            }
        }
    }

    /// Under the immediate policy a back-edge bound that moved since the last
    /// firing is progress on its own. Fires at the last settled timestamp.
    fn advanced_back_edge(&self, views: &[PortView]) -> Option<Timestamp> {
        if self.policy != InputPolicy::Immediate {
            return None;
        }
        self.inputs
            .iter()
            .zip(views)
            .zip(&self.seen_bounds)
            .filter(|((input, view), seen)| input.back_edge && view.bound > **seen)
            .map(|((_, view), _)| view.bound.prev())
            .min()
    }

    fn current_bounds(&self) -> Vec<Timestamp> {
        self.inputs.iter().map(|input| input.stream.bound()).collect()
    }

    /// Pops every head packet stamped `ts`; other ports get a placeholder.
    pub fn take_inputs(&mut self, ts: Timestamp) -> InputSet {
        let packets = self
            .inputs
            .iter()
            .map(|input| {
                input
                    .stream
                    .pop_at(input.consumer, ts)
                    .unwrap_or_else(Packet::empty)
            })
            .collect();
        self.seen_bounds = self.current_bounds();
        InputSet::new(self.input_layout.clone(), packets, self.seen_bounds.clone())
    }

    pub fn empty_inputs(&self) -> InputSet {
        InputSet::new(
            self.input_layout.clone(),
            self.inputs.iter().map(|_| Packet::empty()).collect(),
            self.current_bounds(),
        )
    }

    /// Unsubscribes every input so a closed node no longer holds back its
    /// producers. Unread packets are dropped.
    pub fn detach_inputs(&self) {
        for input in &self.inputs {
            let dropped = input.stream.detach(input.consumer).len();
            if dropped > 0 {
                debug!(node = %self.name, stream = input.stream.name(), dropped, "discarded unread packets at close");
            }
        }
    }

    pub fn close_outputs(&self) {
        for stream in &self.outputs {
            stream.close();
        }
    }

    /// Required side packets this node expects, by store name.
    pub fn required_side_packets(&self) -> impl Iterator<Item = &str> {
        self.side_bindings
            .iter()
            .filter_map(|binding| binding.name.as_deref())
    }

    fn resolve_side_packets(&self, store: &SidePacketStore) -> GraphResult<SidePackets> {
        let mut packets = Vec::with_capacity(self.side_bindings.len());
        for binding in &self.side_bindings {
            let packet = match &binding.name {
                None => Packet::empty(),
                Some(name) => {
                    let packet = store.get(name).ok_or_else(|| {
                        GraphError::config(format!(
                            "side packet `{}` needed by node `{}` is not bound",
                            name, self.name
                        ))
                    })?;
                    if !binding.packet_type.accepts(packet) {
                        return Err(GraphError::config(format!(
                            "side packet `{}` for node `{}` port {} holds `{}`, expected `{}`",
                            name,
                            self.name,
                            binding.port,
                            packet.type_name(),
                            binding.packet_type.name()
                        )));
                    }
                    packet.clone()
                }
            };
            packets.push(packet);
        }
        Ok(SidePackets::new(self.side_layout.clone(), packets))
    }

    /// Binds side packets and runs the calculator's `open`.
    pub async fn open(&mut self, store: &SidePacketStore) -> GraphResult<()> {
        let side_packets = match self.resolve_side_packets(store) {
            Ok(side_packets) => side_packets,
            Err(e) => {
                self.fail();
                return Err(e);
            }
        };
        self.side_packets = side_packets.clone();

        let calculator = self
            .calculator
            .as_mut()
            .ok_or_else(|| GraphError::Internal(format!("node `{}` has no calculator", self.name)))?;
        let mut ctx = OpenContext::new(self.name.clone(), side_packets);
        if let Err(e) = calculator.open(&mut ctx).await {
            self.metrics.record_error();
            self.fail();
            return Err(GraphError::processing(&self.name, Timestamp::UNSTARTED, &e));
        }
        self.transition_to(NodeState::Opened)
    }
}
