mod graph;
mod node;
mod observer;
mod scheduler;
pub mod state;
pub mod stream;

pub use graph::{Graph, GraphInput};
pub use observer::Observer;
pub use state::{GraphState, NodeState};
pub use stream::Stream;
