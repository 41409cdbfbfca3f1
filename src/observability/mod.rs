pub mod metrics;
pub mod collector;
pub mod monitor;

pub use metrics::NodeMetrics;
pub use collector::{MetricsCollector, MetricsSnapshot};
pub use monitor::GraphMonitor;
