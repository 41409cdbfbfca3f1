use super::{Contract, Packet, PortLayout, PortRef, SidePackets, Timestamp};
use crate::observability::NodeMetrics;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Result of a successful firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// The node emits nothing more; its outputs are closed after `close`.
    Stop,
}

/// User-supplied body of a graph node.
///
/// A calculator is owned by exactly one node. Per-node state lives in the
/// implementing struct and is only touched by that node's firings, which
/// never overlap.
#[async_trait]
pub trait Calculator: Send {
    /// Called once with the node's `options` blob, before `contract`.
    fn configure(&mut self, _options: &Value) -> Result<()> {
        Ok(())
    }

    /// Declares ports, their types and side packets.
    fn contract(&self, cc: &mut Contract) -> Result<()>;

    /// Called once per run after side packets are bound. Stream packets are
    /// not available yet.
    async fn open(&mut self, _ctx: &mut OpenContext) -> Result<()> {
        Ok(())
    }

    /// Called once per ready input set, or repeatedly for a source node.
    async fn process(&mut self, ctx: &mut ProcessContext) -> Result<Outcome>;

    /// Called once after the inputs are exhausted or `process` returned
    /// `Outcome::Stop`. Packets emitted here are flushed before the outputs
    /// close.
    async fn close(&mut self, _ctx: &mut ProcessContext) -> Result<()> {
        Ok(())
    }
}

pub struct OpenContext {
    node: Arc<str>,
    side_packets: SidePackets,
}

impl OpenContext {
    pub(crate) fn new(node: Arc<str>, side_packets: SidePackets) -> Self {
        Self { node, side_packets }
    }

    pub fn node_name(&self) -> &str {
        &self.node
    }

    pub fn side_packets(&self) -> &SidePackets {
        &self.side_packets
    }
}

/// Packets of one firing, one per input port. Ports without a packet at the
/// firing timestamp hold an empty placeholder.
#[derive(Debug, Clone)]
pub struct InputSet {
    layout: Arc<PortLayout>,
    packets: Vec<Packet>,
    bounds: Vec<Timestamp>,
}

impl InputSet {
    pub(crate) fn new(layout: Arc<PortLayout>, packets: Vec<Packet>, bounds: Vec<Timestamp>) -> Self {
        Self {
            layout,
            packets,
            bounds,
        }
    }

    pub fn index(&self, index: usize) -> &Packet {
        self.port(&PortRef::index(index))
    }

    pub fn tag(&self, tag: &str) -> &Packet {
        self.port(&PortRef::tag(tag))
    }

    pub fn get(&self, tag: &str, index: usize) -> &Packet {
        self.port(&PortRef::new(tag, index))
    }

    /// Packet at a position in contract order.
    pub fn at(&self, position: usize) -> &Packet {
        static EMPTY: std::sync::OnceLock<Packet> = std::sync::OnceLock::new();
        self.packets
            .get(position)
            .unwrap_or_else(|| EMPTY.get_or_init(Packet::empty))
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.packets.iter()
    }

    /// Timestamp bound of a port's stream when the firing was selected: no
    /// packet below it will still arrive there. `Timestamp::UNSTARTED` for
    /// an undeclared port.
    pub fn bound(&self, port: &PortRef) -> Timestamp {
        self.layout
            .position(port)
            .and_then(|position| self.bounds.get(position))
            .copied()
            .unwrap_or(Timestamp::UNSTARTED)
    }

    pub fn tag_bound(&self, tag: &str) -> Timestamp {
        self.bound(&PortRef::tag(tag))
    }

    fn port(&self, port: &PortRef) -> &Packet {
        self.at(self.layout.position(port).unwrap_or(usize::MAX))
    }
}

/// Packets emitted on one output port during a firing.
#[derive(Debug, Default)]
pub struct OutputPort {
    packets: Vec<Packet>,
    bound: Option<Timestamp>,
}

impl OutputPort {
    pub fn add_packet(&mut self, packet: Packet) {
        self.packets.push(packet);
    }

    /// Promise that no packet below `bound` will follow on this port.
    pub fn set_next_timestamp_bound(&mut self, bound: Timestamp) {
        self.bound = Some(self.bound.map_or(bound, |b| b.max(bound)));
    }

    pub(crate) fn into_parts(self) -> (Vec<Packet>, Option<Timestamp>) {
        (self.packets, self.bound)
    }
}

#[derive(Debug)]
pub struct OutputSet {
    layout: Arc<PortLayout>,
    ports: Vec<OutputPort>,
}

impl OutputSet {
    pub(crate) fn new(layout: Arc<PortLayout>) -> Self {
        let ports = (0..layout.len()).map(|_| OutputPort::default()).collect();
        Self { layout, ports }
    }

    pub fn index(&mut self, index: usize) -> Result<&mut OutputPort> {
        self.port(PortRef::index(index))
    }

    pub fn tag(&mut self, tag: &str) -> Result<&mut OutputPort> {
        self.port(PortRef::tag(tag))
    }

    pub fn get(&mut self, tag: &str, index: usize) -> Result<&mut OutputPort> {
        self.port(PortRef::new(tag, index))
    }

    pub fn at(&mut self, position: usize) -> Result<&mut OutputPort> {
        self.ports
            .get_mut(position)
            .ok_or_else(|| anyhow!("no output port at position {}", position))
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    fn port(&mut self, port: PortRef) -> Result<&mut OutputPort> {
        let position = self
            .layout
            .position(&port)
            .ok_or_else(|| anyhow!("output port {} is not declared", port))?;
        self.at(position)
    }

    pub(crate) fn into_ports(self) -> Vec<OutputPort> {
        self.ports
    }
}

/// Everything a firing may see and do.
pub struct ProcessContext {
    node: Arc<str>,
    input_timestamp: Timestamp,
    inputs: InputSet,
    outputs: OutputSet,
    side_packets: SidePackets,
    metrics: Arc<NodeMetrics>,
}

impl ProcessContext {
    pub(crate) fn new(
        node: Arc<str>,
        input_timestamp: Timestamp,
        inputs: InputSet,
        outputs: OutputSet,
        side_packets: SidePackets,
        metrics: Arc<NodeMetrics>,
    ) -> Self {
        Self {
            node,
            input_timestamp,
            inputs,
            outputs,
            side_packets,
            metrics,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node
    }

    /// Timestamp shared by the input set; `Timestamp::UNSTARTED` for
    /// sources and `Timestamp::DONE` during `close`.
    pub fn input_timestamp(&self) -> Timestamp {
        self.input_timestamp
    }

    pub fn inputs(&self) -> &InputSet {
        &self.inputs
    }

    pub fn outputs(&mut self) -> &mut OutputSet {
        &mut self.outputs
    }

    pub fn side_packets(&self) -> &SidePackets {
        &self.side_packets
    }

    /// Counts an input packet the calculator discarded on purpose.
    pub fn record_drop(&self) {
        self.metrics.record_drop();
    }

    pub(crate) fn into_outputs(self) -> OutputSet {
        self.outputs
    }
}
