use super::MetricsCollector;

pub struct GraphMonitor {
    collector: MetricsCollector,
}

impl GraphMonitor {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }

    /// Plain-text summary, one block per node in name order.
    pub fn generate_report(&self) -> String {
        let snapshot = self.collector.snapshot();

        if snapshot.is_empty() {
            return "No nodes registered".to_string();
        }

        let mut report = String::from("=== Graph Metrics ===\n");
        for node_id in self.collector.node_ids() {
            let metrics = &snapshot[node_id];
            report.push_str(&format!(
                "\n[{}]\n  Firings: {}\n  Errors: {}\n  Dropped: {}\n  Avg Latency: {}μs\n",
                node_id,
                metrics.firings,
                metrics.errors_count,
                metrics.packets_dropped,
                metrics.avg_latency_us
            ));
        }
        let dropped = self.collector.total_packets_dropped();
        if dropped > 0 {
            report.push_str(&format!("\nTotal dropped: {}\n", dropped));
        }

        report
    }

    pub fn collector(&self) -> &MetricsCollector {
        &self.collector
    }
}
