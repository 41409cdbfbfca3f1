//! Topology description consumed by [`Graph::new`](crate::Graph::new).
//!
//! Port bindings are plain strings: `"TAG:INDEX:stream"`, `"TAG:stream"` or
//! `"stream"`. Untagged bindings take consecutive indices in the order they
//! are listed, as do repeated `"TAG:stream"` bindings of the same tag.

use crate::core::PortRef;
use crate::error::{GraphError, GraphResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueFullPolicy {
    /// `add_packet` waits until the consumer drains the queue.
    #[default]
    Block,
    /// `add_packet` returns `StreamError::QueueFull`.
    FailFast,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Per-consumer queue limit. `None` leaves queues unbounded.
    pub max_queue_depth: Option<usize>,
    pub queue_full_policy: QueueFullPolicy,
    /// Firings allowed in flight at once. `None` means no limit.
    pub max_concurrent_firings: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub calculator: String,
    pub name: Option<String>,
    pub input_streams: Vec<String>,
    pub output_streams: Vec<String>,
    pub input_side_packets: Vec<String>,
    /// Input ports (`"TAG"`, `"TAG:1"` or `"1"`) fed by a back-edge.
    pub back_edges: Vec<String>,
    pub options: Value,
}

impl NodeConfig {
    pub fn new(calculator: impl Into<String>) -> Self {
        Self {
            calculator: calculator.into(),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn input(mut self, binding: impl Into<String>) -> Self {
        self.input_streams.push(binding.into());
        self
    }

    pub fn output(mut self, binding: impl Into<String>) -> Self {
        self.output_streams.push(binding.into());
        self
    }

    pub fn side_packet(mut self, binding: impl Into<String>) -> Self {
        self.input_side_packets.push(binding.into());
        self
    }

    pub fn back_edge(mut self, port: impl Into<String>) -> Self {
        self.back_edges.push(port.into());
        self
    }

    pub fn options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub input_streams: Vec<String>,
    pub output_streams: Vec<String>,
    pub input_side_packets: Vec<String>,
    pub nodes: Vec<NodeConfig>,
    pub scheduler: SchedulerConfig,
}

impl GraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(config: Value) -> GraphResult<Self> {
        serde_json::from_value(config)
            .map_err(|e| GraphError::config(format!("invalid graph config: {}", e)))
    }

    pub fn from_json_str(config: &str) -> GraphResult<Self> {
        serde_json::from_str(config)
            .map_err(|e| GraphError::config(format!("invalid graph config: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> GraphResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            GraphError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn input_stream(mut self, name: impl Into<String>) -> Self {
        self.input_streams.push(name.into());
        self
    }

    pub fn output_stream(mut self, name: impl Into<String>) -> Self {
        self.output_streams.push(name.into());
        self
    }

    pub fn side_packet(mut self, name: impl Into<String>) -> Self {
        self.input_side_packets.push(name.into());
        self
    }

    pub fn node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn max_queue_depth(mut self, depth: usize) -> Self {
        self.scheduler.max_queue_depth = Some(depth);
        self
    }

    pub fn queue_full_policy(mut self, policy: QueueFullPolicy) -> Self {
        self.scheduler.queue_full_policy = policy;
        self
    }

    pub fn max_concurrent_firings(mut self, limit: usize) -> Self {
        self.scheduler.max_concurrent_firings = Some(limit);
        self
    }
}

fn is_tag(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase() || c == '_')
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn is_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Splits one binding string into `(tag, explicit index, name)`.
fn parse_binding(binding: &str) -> GraphResult<(String, Option<usize>, String)> {
    let bad = || GraphError::config(format!("malformed port binding `{}`", binding));
    let parts: Vec<&str> = binding.split(':').collect();
    let (tag, index, name) = match parts.as_slice() {
        [name] => ("", None, *name),
        [tag, name] => (*tag, None, *name),
        [tag, index, name] => (*tag, Some(index.parse::<usize>().map_err(|_| bad())?), *name),
        _ => return Err(bad()),
    };
    if (!tag.is_empty() && !is_tag(tag)) || (parts.len() > 1 && tag.is_empty() && index.is_none()) {
        return Err(bad());
    }
    if !is_name(name) {
        return Err(bad());
    }
    Ok((tag.to_string(), index, name.to_string()))
}

/// Resolves a node's binding list to concrete ports, in listed order.
pub(crate) fn resolve_bindings(bindings: &[String]) -> GraphResult<Vec<(PortRef, String)>> {
    let mut next_index: HashMap<String, usize> = HashMap::new();
    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(bindings.len());

    for binding in bindings {
        let (tag, index, name) = parse_binding(binding)?;
        let counter = next_index.entry(tag.clone()).or_insert(0);
        let index = index.unwrap_or(*counter);
        let after = index
            .checked_add(1)
            .ok_or_else(|| GraphError::config(format!("port index in `{}` is out of range", binding)))?;
        *counter = (*counter).max(after);

        let port = PortRef::new(tag, index);
        if !seen.insert(port.clone()) {
            return Err(GraphError::config(format!("port {} bound twice", port)));
        }
        resolved.push((port, name));
    }

    Ok(resolved)
}

/// Parses a back-edge port reference: `"TAG"`, `"TAG:1"` or `"1"`.
pub(crate) fn parse_port_ref(port: &str) -> GraphResult<PortRef> {
    let bad = || GraphError::config(format!("malformed port reference `{}`", port));
    match port.split_once(':') {
        Some((tag, index)) if is_tag(tag) => {
            Ok(PortRef::new(tag, index.parse().map_err(|_| bad())?))
        }
        Some(_) => Err(bad()),
        None if is_tag(port) => Ok(PortRef::tag(port)),
        None => port.parse().map(PortRef::index).map_err(|_| bad()),
    }
}
