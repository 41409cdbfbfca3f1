use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Lifecycle of one node within a graph run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Created,
    Contracted,
    Opened,
    Running,
    Closing,
    Closed,
    Failed,
}

impl NodeState {
    pub fn can_transition_to(&self, target: NodeState) -> bool {
        use NodeState::*;

        matches!(
            (self, target),
            (Created, Contracted)
                | (Contracted, Opened)
                | (Opened, Running)
                | (Running, Closing)
                | (Closing, Closed)
                | (Created | Contracted | Opened | Running | Closing, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Created => "Created",
            Self::Contracted => "Contracted",
            Self::Opened => "Opened",
            Self::Running => "Running",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
            Self::Failed => "Failed",
        }
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::Created
    }
}

/// Execution state of a whole graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphState {
    Idle,
    Running {
        #[serde(skip)]
        start_time: Option<Instant>,
    },
    Completed {
        #[serde(skip)]
        duration: Option<Duration>,
    },
    Failed {
        error_msg: String,
    },
}

impl GraphState {
    pub fn can_transition_to(&self, target: &GraphState) -> bool {
        use GraphState::*;

        matches!(
            (self, target),
            (Idle, Running { .. })
                | (Idle, Failed { .. })
                | (Running { .. }, Completed { .. })
                | (Running { .. }, Failed { .. })
        )
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Idle => "Idle",
            Self::Running { .. } => "Running",
            Self::Completed { .. } => "Completed",
            Self::Failed { .. } => "Failed",
        }
    }
}

impl Default for GraphState {
    fn default() -> Self {
        Self::Idle
    }
}
