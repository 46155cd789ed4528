use super::api::{CommandInvocation, CommandRequest, CommandStatus, RemoteCommandApi};
use super::{RemoteCommandError, COMMAND_COMMENT};
use crate::config::MigrationConfig;
use crate::deployment::MigrationStackDeployment;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Sends documents to the migration host and waits for their outcome.
pub struct RemoteCommandRunner {
    api: Arc<dyn RemoteCommandApi>,
    deployment: Arc<MigrationStackDeployment>,
    timeout: Duration,
    log_prefix: String,
    poll_interval: Duration,
}

impl RemoteCommandRunner {
    pub fn new(
        api: Arc<dyn RemoteCommandApi>,
        deployment: Arc<MigrationStackDeployment>,
        config: &MigrationConfig,
    ) -> Self {
        Self {
            api,
            deployment,
            timeout: config.command_timeout(),
            log_prefix: config.command_log_prefix.clone(),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Send `document_name` to `target_id`. Command logs go to the migration
    /// bucket, so the stack must have been deployed.
    pub async fn run_document(
        &self,
        document_name: &str,
        target_id: &str,
        parameters: HashMap<String, Vec<String>>,
    ) -> Result<String, RemoteCommandError> {
        let output_bucket = self
            .deployment
            .migration_bucket_name()
            .await
            .map_err(RemoteCommandError::CannotLaunch)?;

        debug!(
            document = %document_name,
            target = %target_id,
            params = ?parameters.keys().collect::<Vec<_>>(),
            "Running remote document"
        );

        let request = CommandRequest {
            document_name: document_name.to_string(),
            target_id: target_id.to_string(),
            parameters,
            timeout_secs: self.timeout.as_secs(),
            comment: COMMAND_COMMENT.to_string(),
            output_bucket,
            output_key_prefix: self.log_prefix.clone(),
        };
        self.api.run(request).await
    }

    /// Poll the invocation until it is terminal. Anything but success is an
    /// error carrying the command's stderr.
    pub async fn wait_for(
        &self,
        command_id: &str,
        target_id: &str,
    ) -> Result<CommandInvocation, RemoteCommandError> {
        let poll = async {
            loop {
                let invocation = self.api.invocation(command_id, target_id).await?;
                if invocation.status.is_terminal() {
                    return Ok::<_, RemoteCommandError>(invocation);
                }
                debug!(
                    command_id = %command_id,
                    status = %invocation.status,
                    "Remote command still running"
                );
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        let invocation = tokio::time::timeout(self.timeout, poll)
            .await
            .map_err(|_| RemoteCommandError::TimedOut {
                command_id: command_id.to_string(),
                timeout_secs: self.timeout.as_secs(),
            })??;

        if invocation.status != CommandStatus::Success {
            warn!(
                command_id = %command_id,
                status = %invocation.status,
                "Remote command did not succeed"
            );
            return Err(RemoteCommandError::CommandFailed {
                command_id: command_id.to_string(),
                status: invocation.status,
                stderr: invocation.stderr,
            });
        }
        Ok(invocation)
    }

    pub async fn run_and_wait(
        &self,
        document_name: &str,
        target_id: &str,
        parameters: HashMap<String, Vec<String>>,
    ) -> Result<CommandInvocation, RemoteCommandError> {
        let command_id = self
            .run_document(document_name, target_id, parameters)
            .await?;
        info!(
            command_id = %command_id,
            document = %document_name,
            target = %target_id,
            "Remote command sent"
        );
        self.wait_for(&command_id, target_id).await
    }
}
