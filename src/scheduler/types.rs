//! Scheduler state types.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one stream's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Stopped,
    Running,
}

impl StreamState {
    pub fn is_running(&self) -> bool {
        matches!(self, StreamState::Running)
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamState::Stopped => write!(f, "stopped"),
            StreamState::Running => write!(f, "running"),
        }
    }
}
