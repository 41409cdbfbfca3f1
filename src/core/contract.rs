use super::Packet;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;

/// Address of a port: an optional tag plus an index within that tag.
///
/// Untagged ports use the empty tag and are addressed positionally.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortRef {
    pub tag: String,
    pub index: usize,
}

impl PortRef {
    pub fn new(tag: impl Into<String>, index: usize) -> Self {
        Self {
            tag: tag.into(),
            index,
        }
    }

    pub fn index(index: usize) -> Self {
        Self::new("", index)
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        Self::new(tag, 0)
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tag.is_empty() {
            write!(f, "#{}", self.index)
        } else {
            write!(f, "{}:{}", self.tag, self.index)
        }
    }
}

/// Static type a port carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Any,
    Of { id: TypeId, name: &'static str },
}

impl PacketType {
    pub fn of<T: Any>() -> Self {
        Self::Of {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Of { name, .. } => *name,
        }
    }

    /// Whether a stream typed `self` may feed a port typed `other`.
    pub fn is_compatible_with(&self, other: &PacketType) -> bool {
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::Of { id: a, .. }, Self::Of { id: b, .. }) => a == b,
        }
    }

    pub fn accepts(&self, packet: &Packet) -> bool {
        match self {
            Self::Any => true,
            Self::Of { id, .. } => packet.payload_type_id() == Some(*id),
        }
    }
}

impl Default for PacketType {
    fn default() -> Self {
        Self::Any
    }
}

#[derive(Debug, Clone, Default)]
pub struct PortSpec {
    pub packet_type: PacketType,
    pub optional: bool,
}

impl PortSpec {
    pub fn set<T: Any>(&mut self) -> &mut Self {
        self.packet_type = PacketType::of::<T>();
        self
    }

    pub fn set_any(&mut self) -> &mut Self {
        self.packet_type = PacketType::Any;
        self
    }

    /// The port may be left unbound. Only honoured for side packets.
    pub fn optional(&mut self) -> &mut Self {
        self.optional = true;
        self
    }
}

/// Ordered set of declared ports. Order is by tag, then index.
#[derive(Debug, Clone, Default)]
pub struct PortSet {
    ports: BTreeMap<PortRef, PortSpec>,
}

impl PortSet {
    pub fn index(&mut self, index: usize) -> &mut PortSpec {
        self.get("", index)
    }

    pub fn tag(&mut self, tag: &str) -> &mut PortSpec {
        self.get(tag, 0)
    }

    pub fn get(&mut self, tag: &str, index: usize) -> &mut PortSpec {
        self.ports.entry(PortRef::new(tag, index)).or_default()
    }

    pub fn spec(&self, port: &PortRef) -> Option<&PortSpec> {
        self.ports.get(port)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PortRef, &PortSpec)> {
        self.ports.iter()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn layout(&self) -> PortLayout {
        PortLayout {
            ports: self.ports.keys().cloned().collect(),
        }
    }
}

/// How a multi-input node decides it may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputPolicy {
    /// Fire for timestamp T once every port holds a packet at T or is
    /// provably empty at T.
    #[default]
    Synchronized,
    /// Fire as soon as any port holds a packet, at the smallest queued
    /// timestamp, without waiting for the other ports to settle.
    Immediate,
}

/// Ports, types and side packets a calculator declares before any data
/// flows. Taken once per node when the graph is built.
#[derive(Debug, Clone, Default)]
pub struct Contract {
    inputs: PortSet,
    outputs: PortSet,
    side_packets: PortSet,
    input_policy: InputPolicy,
}

impl Contract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inputs(&mut self) -> &mut PortSet {
        &mut self.inputs
    }

    pub fn outputs(&mut self) -> &mut PortSet {
        &mut self.outputs
    }

    pub fn side_packets(&mut self) -> &mut PortSet {
        &mut self.side_packets
    }

    pub fn set_input_policy(&mut self, policy: InputPolicy) {
        self.input_policy = policy;
    }

    pub fn input_ports(&self) -> &PortSet {
        &self.inputs
    }

    pub fn output_ports(&self) -> &PortSet {
        &self.outputs
    }

    pub fn side_packet_ports(&self) -> &PortSet {
        &self.side_packets
    }

    pub fn input_policy(&self) -> InputPolicy {
        self.input_policy
    }
}

/// Positional view over a port set, shared by a node's contexts.
#[derive(Debug, Clone, Default)]
pub struct PortLayout {
    ports: Vec<PortRef>,
}

impl PortLayout {
    pub fn position(&self, port: &PortRef) -> Option<usize> {
        self.ports.binary_search(port).ok()
    }

    pub fn ports(&self) -> &[PortRef] {
        &self.ports
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}
