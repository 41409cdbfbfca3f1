use super::NodeMetrics;
use std::collections::HashMap;
use std::sync::Arc;

/// Point-in-time copy of one node's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub node_id: String,
    pub firings: u64,
    pub errors_count: u64,
    pub packets_dropped: u64,
    pub avg_latency_us: u64,
}

impl MetricsSnapshot {
    fn of(metrics: &NodeMetrics) -> Self {
        Self {
            node_id: metrics.node_id().to_string(),
            firings: metrics.firings(),
            errors_count: metrics.errors_count(),
            packets_dropped: metrics.packets_dropped(),
            avg_latency_us: metrics.avg_latency_us(),
        }
    }
}

/// Metrics of every node in a graph, keyed by node name. Clones share the
/// same counters.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    metrics: HashMap<String, Arc<NodeMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, node_id: impl Into<String>, metrics: Arc<NodeMetrics>) {
        self.metrics.insert(node_id.into(), metrics);
    }

    pub fn snapshot(&self) -> HashMap<String, MetricsSnapshot> {
        self.metrics
            .iter()
            .map(|(id, metrics)| (id.clone(), MetricsSnapshot::of(metrics)))
            .collect()
    }

    /// Node names in sorted order.
    pub fn node_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.metrics.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn total_packets_dropped(&self) -> u64 {
        self.metrics.values().map(|m| m.packets_dropped()).sum()
    }

    pub fn get_node_metrics(&self, node_id: &str) -> Option<Arc<NodeMetrics>> {
        self.metrics.get(node_id).cloned()
    }
}
