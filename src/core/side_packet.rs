use super::{Packet, PortLayout, PortRef};
use std::collections::HashMap;
use std::sync::Arc;

/// Named side packets, filled before a run and frozen once it starts.
#[derive(Debug, Clone, Default)]
pub struct SidePacketStore {
    packets: HashMap<String, Packet>,
}

impl SidePacketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name`. Returns false if the name is already bound.
    pub fn insert(&mut self, name: impl Into<String>, packet: Packet) -> bool {
        let name = name.into();
        if self.packets.contains_key(&name) {
            return false;
        }
        self.packets.insert(name, packet);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Packet> {
        self.packets.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packets.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

impl FromIterator<(String, Packet)> for SidePacketStore {
    fn from_iter<I: IntoIterator<Item = (String, Packet)>>(iter: I) -> Self {
        Self {
            packets: iter.into_iter().collect(),
        }
    }
}

/// A node's side packets, resolved against its contract.
///
/// Unbound optional ports hold an empty packet.
#[derive(Debug, Clone, Default)]
pub struct SidePackets {
    layout: Arc<PortLayout>,
    packets: Arc<Vec<Packet>>,
}

impl SidePackets {
    pub(crate) fn new(layout: Arc<PortLayout>, packets: Vec<Packet>) -> Self {
        Self {
            layout,
            packets: Arc::new(packets),
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

    fn port(&self, port: &PortRef) -> &Packet {
        static EMPTY: std::sync::OnceLock<Packet> = std::sync::OnceLock::new();
        self.layout
            .position(port)
            .and_then(|i| self.packets.get(i))
            .unwrap_or_else(|| EMPTY.get_or_init(Packet::empty))
    }
}
