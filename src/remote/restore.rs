use super::runner::RemoteCommandRunner;
use super::RemoteCommandError;
use crate::db::{DatabaseRestorer, RestoreError};
use crate::deployment::MigrationStackDeployment;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Restores the uploaded dump by running the stack's database restore
/// document on the migration host.
pub struct RemoteDatabaseRestore {
    runner: Arc<RemoteCommandRunner>,
    deployment: Arc<MigrationStackDeployment>,
}

impl RemoteDatabaseRestore {
    pub fn new(
        runner: Arc<RemoteCommandRunner>,
        deployment: Arc<MigrationStackDeployment>,
    ) -> Self {
        Self { runner, deployment }
    }
}

#[async_trait]
impl DatabaseRestorer for RemoteDatabaseRestore {
    async fn restore_database(&self) -> Result<(), RestoreError> {
        let document = self
            .deployment
            .db_restore_document()
            .await
            .map_err(RemoteCommandError::CannotLaunch)?;
        let instance = self
            .deployment
            .migration_host_instance_id()
            .await
            .map_err(RemoteCommandError::CannotLaunch)?;

        info!(document = %document, instance = %instance, "Restoring database on migration host");
        let invocation = self
            .runner
            .run_and_wait(&document, &instance, HashMap::new())
            .await?;
        debug!(stdout = %invocation.stdout, "Database restore output");
        Ok(())
    }
}
