pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod nodes;
pub mod observability;
pub mod registry;

pub use config::{GraphConfig, NodeConfig, QueueFullPolicy, SchedulerConfig};
pub use core::{
    Calculator, Contract, InputPolicy, OpenContext, Outcome, Packet, PacketType, ProcessContext,
    Timestamp,
};
pub use engine::{Graph, GraphInput, GraphState, NodeState, Observer};
pub use error::{GraphError, GraphResult, StreamError};
pub use registry::CalculatorRegistry;
