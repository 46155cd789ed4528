use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Deployment state of the migration stack as seen by the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InfrastructureDeploymentState {
    #[default]
    NotDeploying,
    CreateInProgress,
    CreateComplete,
    CreateFailed,
}

impl fmt::Display for InfrastructureDeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InfrastructureDeploymentState::NotDeploying => "NOT_DEPLOYING",
            InfrastructureDeploymentState::CreateInProgress => "CREATE_IN_PROGRESS",
            InfrastructureDeploymentState::CreateComplete => "CREATE_COMPLETE",
            InfrastructureDeploymentState::CreateFailed => "CREATE_FAILED",
        };
        f.write_str(s)
    }
}

/// Status reported by the stack API for a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackStatus {
    InProgress,
    Complete,
    Failed(String),
}

impl StackStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StackStatus::InProgress)
    }
}

/// Outputs and physical resource ids of a deployed stack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackDescription {
    pub outputs: HashMap<String, String>,
    pub resources: HashMap<String, String>,
}

/// How a poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentOutcome {
    /// Stack created and its outputs persisted
    Complete,
    /// Deployment failed, the migration was moved to its error stage
    Failed(String),
    /// Polling was stopped before the stack reached a terminal status
    Stopped,
    /// The migration moved on without this poll loop
    Superseded,
}
