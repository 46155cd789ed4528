//! Remote command dispatch on the migration host.
//!
//! Documents produced by the migration stack (filesystem and database
//! restore) run on the migration host through a `RemoteCommandApi`. The
//! runner resolves the log bucket from the deployment, sends the command and
//! polls its invocation until it reaches a terminal status.

mod api;
mod restore;
mod runner;

pub use api::{CommandInvocation, CommandRequest, CommandStatus, RemoteCommandApi};
pub use restore::RemoteDatabaseRestore;
pub use runner::RemoteCommandRunner;

use crate::deployment::DeploymentError;
use thiserror::Error;

/// Comment attached to every command sent by the orchestrator
pub const COMMAND_COMMENT: &str = "Command run by cloud-migrate";

#[derive(Error, Debug)]
pub enum RemoteCommandError {
    #[error("Remote command API error: {0}")]
    ApiError(String),

    #[error("Cannot launch remote command: {0}")]
    CannotLaunch(#[source] DeploymentError),

    #[error("Remote command {command_id} ended with status {status}: {stderr}")]
    CommandFailed {
        command_id: String,
        status: CommandStatus,
        stderr: String,
    },

    #[error("Remote command {command_id} did not finish within {timeout_secs}s")]
    TimedOut { command_id: String, timeout_secs: u64 },
}
