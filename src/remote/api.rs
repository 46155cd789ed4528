use super::RemoteCommandError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

/// A document run against a single target instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub document_name: String,
    pub target_id: String,
    /// Parameter name to its lines. Plain string parameters have one line.
    pub parameters: HashMap<String, Vec<String>>,
    pub timeout_secs: u64,
    pub comment: String,
    pub output_bucket: String,
    pub output_key_prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Cancelled,
    TimedOut,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandStatus::Pending | CommandStatus::InProgress)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandStatus::Pending => "pending",
            CommandStatus::InProgress => "in-progress",
            CommandStatus::Success => "success",
            CommandStatus::Failed => "failed",
            CommandStatus::Cancelled => "cancelled",
            CommandStatus::TimedOut => "timed-out",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Remote service running documents on instances.
#[async_trait]
pub trait RemoteCommandApi: Send + Sync {
    /// Send the command. Returns its command id.
    async fn run(&self, request: CommandRequest) -> Result<String, RemoteCommandError>;

    async fn invocation(
        &self,
        command_id: &str,
        target_id: &str,
    ) -> Result<CommandInvocation, RemoteCommandError>;
}
