use super::api::StackApi;
use super::state::{DeploymentOutcome, InfrastructureDeploymentState, StackDescription, StackStatus};
use super::{
    overrides, DeploymentError, OUTPUT_DB_RESTORE_DOCUMENT, OUTPUT_FS_RESTORE_DOCUMENT,
    OUTPUT_FS_RESTORE_STATUS_DOCUMENT, OUTPUT_MIGRATION_BUCKET, OUTPUT_SERVER_GROUP,
    RESOURCE_DEAD_LETTER_QUEUE, RESOURCE_MIGRATION_QUEUE,
};
use crate::config::{ConfigOverrides, MigrationConfig};
use crate::migration::{MigrationError, MigrationService};
use crate::stage::MigrationStage;
use crate::store::MigrationContext;
use crate::utils::{is_blank, now_epoch};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Stack names: a letter followed by letters, digits and hyphens.
static STACK_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][-a-zA-Z0-9]{0,127}$").expect("stack name regex is valid"));

/// Consecutive failed status queries tolerated before the deployment is
/// considered failed.
const MAX_STATUS_ERRORS: u32 = 5;

/// Name of the migration stack deployed next to an application stack.
pub fn migration_stack_name(application_deployment_id: &str) -> Result<String, DeploymentError> {
    let name = format!("{}-migration", application_deployment_id.trim());
    if !STACK_NAME.is_match(&name) {
        return Err(DeploymentError::InvalidStackName(name));
    }
    Ok(name)
}

/// Drives creation of the migration stack and exposes its outputs.
pub struct MigrationStackDeployment {
    migration: Arc<MigrationService>,
    stack_api: Arc<dyn StackApi>,
    overrides: ConfigOverrides,
    template_url: String,
    poll_interval: Duration,
    shutdown: watch::Sender<bool>,
    poller: Mutex<Option<JoinHandle<DeploymentOutcome>>>,
}

impl MigrationStackDeployment {
    pub fn new(
        migration: Arc<MigrationService>,
        stack_api: Arc<dyn StackApi>,
        config: &MigrationConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            migration,
            stack_api,
            overrides: config.overrides.clone(),
            template_url: config.migration_stack_template_url.clone(),
            poll_interval: config.poll_interval(),
            shutdown,
            poller: Mutex::new(None),
        }
    }

    /// Use a different poll interval than the configured one.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Request the migration stack and start polling it in the background.
    ///
    /// The stack name is persisted together with the transition to
    /// `ProvisionMigrationStackWait` before polling starts, so a restarted
    /// process can pick the deployment up again with `resume`.
    pub async fn deploy(
        self: &Arc<Self>,
        params: HashMap<String, String>,
    ) -> Result<(), DeploymentError> {
        self.migration
            .assert_current_stage(MigrationStage::ProvisionMigrationStack)
            .await?;

        let migration = self.migration.current_migration().await?;
        let context = self.migration.current_context().await?;
        let stack_name = match migration_stack_name(&context.application_deployment_id) {
            Ok(name) => name,
            Err(e) => {
                self.migration.error(e.to_string()).await;
                return Err(e);
            }
        };

        info!(
            template = %self.template_url,
            stack = %stack_name,
            params = ?params.keys().collect::<Vec<_>>(),
            "Deploying migration stack"
        );

        if let Err(e) = self
            .stack_api
            .provision(&self.template_url, &stack_name, &params)
            .await
        {
            let e = DeploymentError::ProvisionFailed(e.to_string());
            self.migration
                .error_for_migration(migration.id, e.to_string(), |context| {
                    context.deployment_state = InfrastructureDeploymentState::CreateFailed;
                })
                .await;
            return Err(e);
        }

        let persisted_name = stack_name.clone();
        self.migration
            .transition_if_current(
                migration.id,
                MigrationStage::ProvisionMigrationStack,
                MigrationStage::ProvisionMigrationStackWait,
                move |context| {
                    context.helper_stack_deployment_id = persisted_name;
                    context.deployment_state = InfrastructureDeploymentState::CreateInProgress;
                    context.provisioning_start_epoch = now_epoch();
                },
            )
            .await?;

        self.spawn_poller(migration.id, stack_name).await;
        Ok(())
    }

    /// Restart polling for a deployment left in progress by a previous
    /// process. Returns `false` when there is nothing to resume.
    pub async fn resume(self: &Arc<Self>) -> Result<bool, DeploymentError> {
        if self.migration.current_stage().await? != MigrationStage::ProvisionMigrationStackWait {
            return Ok(false);
        }
        if self.is_polling().await {
            return Ok(false);
        }

        let migration = self.migration.current_migration().await?;
        let stack_name = self.migration_stack_id().await?;
        info!(migration_id = migration.id, stack = %stack_name, "Resuming migration stack polling");
        self.spawn_poller(migration.id, stack_name).await;
        Ok(true)
    }

    /// Stop polling. A poll already in flight finishes but acts only if its
    /// migration is still current.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub async fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .await
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Wait for the running poll loop to end. `None` if none was started.
    pub async fn await_deployment(&self) -> Result<Option<DeploymentOutcome>, DeploymentError> {
        let handle = self.poller.lock().await.take();
        match handle {
            Some(handle) => handle
                .await
                .map(Some)
                .map_err(|e| DeploymentError::PollerFailed(e.to_string())),
            None => Ok(None),
        }
    }

    async fn spawn_poller(self: &Arc<Self>, migration_id: u64, stack_name: String) {
        self.shutdown.send_replace(false);
        let shutdown = self.shutdown.subscribe();
        let this = Arc::clone(self);

        let handle = tokio::spawn(async move {
            this.poll_until_terminal(migration_id, stack_name, shutdown)
                .await
        });

        if let Some(previous) = self.poller.lock().await.replace(handle) {
            previous.abort();
        }
    }

    async fn poll_until_terminal(
        &self,
        migration_id: u64,
        stack_name: String,
        mut shutdown: watch::Receiver<bool>,
    ) -> DeploymentOutcome {
        let mut status_errors = 0;

        loop {
            if *shutdown.borrow() {
                info!(stack = %stack_name, "Migration stack polling stopped");
                return DeploymentOutcome::Stopped;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(stack = %stack_name, "Migration stack polling stopped");
                        return DeploymentOutcome::Stopped;
                    }
                }
            }

            match self
                .migration
                .is_current(migration_id, MigrationStage::ProvisionMigrationStackWait)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    info!(
                        migration_id,
                        stack = %stack_name,
                        "Migration no longer waiting for its stack, stopping polling"
                    );
                    return DeploymentOutcome::Superseded;
                }
                Err(e) => {
                    status_errors += 1;
                    warn!(
                        migration_id,
                        error = %e,
                        attempt = status_errors,
                        "Failed to read migration while polling its stack"
                    );
                    if status_errors >= MAX_STATUS_ERRORS {
                        let reason = format!("unable to read migration state: {}", e);
                        self.handle_failed_deployment(migration_id, &reason).await;
                        return DeploymentOutcome::Failed(reason);
                    }
                    continue;
                }
            }

            match self.stack_api.status(&stack_name).await {
                Ok(StackStatus::InProgress) => {
                    status_errors = 0;
                    debug!(stack = %stack_name, "Migration stack still being created");
                }
                Ok(StackStatus::Complete) => {
                    info!(stack = %stack_name, "Migration stack created");
                    return match self
                        .handle_successful_deployment(migration_id, &stack_name)
                        .await
                    {
                        Ok(()) => DeploymentOutcome::Complete,
                        Err(DeploymentError::MigrationError(e)) if e.is_stage_error() => {
                            warn!(error = %e, "Migration moved on while storing stack outputs");
                            DeploymentOutcome::Superseded
                        }
                        Err(e) => {
                            let reason = e.to_string();
                            self.handle_failed_deployment(migration_id, &reason).await;
                            DeploymentOutcome::Failed(reason)
                        }
                    };
                }
                Ok(StackStatus::Failed(reason)) => {
                    self.handle_failed_deployment(migration_id, &reason).await;
                    return DeploymentOutcome::Failed(reason);
                }
                Err(e) => {
                    status_errors += 1;
                    warn!(
                        stack = %stack_name,
                        error = %e,
                        attempt = status_errors,
                        "Failed to query migration stack status"
                    );
                    if status_errors >= MAX_STATUS_ERRORS {
                        let reason = format!("unable to query migration stack status: {}", e);
                        self.handle_failed_deployment(migration_id, &reason).await;
                        return DeploymentOutcome::Failed(reason);
                    }
                }
            }
        }
    }

    /// Persist the stack outputs and advance to the filesystem copy.
    async fn handle_successful_deployment(
        &self,
        migration_id: u64,
        stack_name: &str,
    ) -> Result<(), DeploymentError> {
        let description = self
            .stack_api
            .describe(stack_name)
            .await?
            .ok_or_else(|| DeploymentError::StackNotFound(stack_name.to_string()))?;

        self.migration
            .transition_if_current(
                migration_id,
                MigrationStage::ProvisionMigrationStackWait,
                MigrationStage::FsMigrationCopy,
                move |context| {
                    persist_stack_details(context, &description);
                    context.deployment_state = InfrastructureDeploymentState::CreateComplete;
                },
            )
            .await?;
        Ok(())
    }

    async fn handle_failed_deployment(&self, migration_id: u64, reason: &str) {
        error!(migration_id, reason = %reason, "Migration stack deployment failed");
        self.migration
            .error_for_migration(migration_id, reason, |context| {
                context.deployment_state = InfrastructureDeploymentState::CreateFailed;
            })
            .await;
    }

    /// Deployment state derived from the current stage and the last polled
    /// status. Stable at `CreateComplete` once the workflow is past the
    /// deployment.
    pub async fn deployment_status(
        &self,
    ) -> Result<InfrastructureDeploymentState, DeploymentError> {
        let stage = self.migration.current_stage().await?;
        match stage {
            MigrationStage::ProvisionMigrationStack
            | MigrationStage::ProvisionMigrationStackWait
            | MigrationStage::ProvisioningError => {
                Ok(self.migration.current_context().await?.deployment_state)
            }
            stage if stage.is_after(MigrationStage::ProvisionMigrationStackWait) => {
                Ok(InfrastructureDeploymentState::CreateComplete)
            }
            _ => Ok(InfrastructureDeploymentState::NotDeploying),
        }
    }

    /// Blank every stack detail persisted in the current context.
    pub async fn clear_persisted_stack_details(&self) -> Result<(), DeploymentError> {
        self.migration
            .update_context(|context| {
                context.helper_stack_deployment_id.clear();
                context.fs_restore_document.clear();
                context.fs_restore_status_document.clear();
                context.db_restore_document.clear();
                context.migration_stack_group.clear();
                context.migration_bucket_name.clear();
                context.migration_queue_url.clear();
                context.migration_dead_letter_queue_url.clear();
            })
            .await?;
        info!("Cleared persisted migration stack details");
        Ok(())
    }

    pub async fn migration_stack_id(&self) -> Result<String, DeploymentError> {
        self.stack_property(overrides::MIGRATION_STACK_ID, "migration stack id", |c| {
            c.helper_stack_deployment_id
        })
        .await
    }

    pub async fn fs_restore_document(&self) -> Result<String, DeploymentError> {
        self.stack_property(overrides::FS_RESTORE_DOCUMENT, OUTPUT_FS_RESTORE_DOCUMENT, |c| {
            c.fs_restore_document
        })
        .await
    }

    pub async fn fs_restore_status_document(&self) -> Result<String, DeploymentError> {
        self.stack_property(
            overrides::FS_RESTORE_STATUS_DOCUMENT,
            OUTPUT_FS_RESTORE_STATUS_DOCUMENT,
            |c| c.fs_restore_status_document,
        )
        .await
    }

    pub async fn db_restore_document(&self) -> Result<String, DeploymentError> {
        self.stack_property(overrides::DB_RESTORE_DOCUMENT, OUTPUT_DB_RESTORE_DOCUMENT, |c| {
            c.db_restore_document
        })
        .await
    }

    pub async fn migration_bucket_name(&self) -> Result<String, DeploymentError> {
        self.stack_property(overrides::MIGRATION_BUCKET, OUTPUT_MIGRATION_BUCKET, |c| {
            c.migration_bucket_name
        })
        .await
    }

    pub async fn queue_resource(&self) -> Result<String, DeploymentError> {
        self.stack_property(overrides::MIGRATION_QUEUE, RESOURCE_MIGRATION_QUEUE, |c| {
            c.migration_queue_url
        })
        .await
    }

    pub async fn dead_letter_queue_resource(&self) -> Result<String, DeploymentError> {
        self.stack_property(overrides::DEAD_LETTER_QUEUE, RESOURCE_DEAD_LETTER_QUEUE, |c| {
            c.migration_dead_letter_queue_url
        })
        .await
    }

    /// Instance running restore commands: the override, or the first
    /// instance of the migration host group.
    pub async fn migration_host_instance_id(&self) -> Result<String, DeploymentError> {
        if let Some(instance_id) = self.overrides.get(overrides::MIGRATION_HOST_INSTANCE_ID) {
            return Ok(instance_id.to_string());
        }

        let group = self
            .stack_property(overrides::MIGRATION_HOST_GROUP, OUTPUT_SERVER_GROUP, |c| {
                c.migration_stack_group
            })
            .await?;

        self.stack_api
            .group_instances(&group)
            .await?
            .into_iter()
            .next()
            .ok_or(DeploymentError::NoHostInstance(group))
    }

    async fn stack_property(
        &self,
        override_key: &str,
        name: &'static str,
        field: fn(MigrationContext) -> String,
    ) -> Result<String, DeploymentError> {
        if let Some(value) = self.overrides.get(override_key) {
            return Ok(value.to_string());
        }

        let context = match self.migration.current_context().await {
            Ok(context) => context,
            Err(MigrationError::NoMigrationInProgress) => {
                return Err(DeploymentError::OutputsNotSet(name))
            }
            Err(e) => return Err(e.into()),
        };

        let value = field(context);
        if is_blank(&value) {
            return Err(DeploymentError::OutputsNotSet(name));
        }
        Ok(value)
    }
}

/// Copy the stack outputs the migration needs into the context. Missing
/// outputs are stored blank and reported by the accessors.
fn persist_stack_details(context: &mut MigrationContext, description: &StackDescription) {
    let output = |key: &str| description.outputs.get(key).cloned().unwrap_or_default();
    let resource = |key: &str| description.resources.get(key).cloned().unwrap_or_default();

    context.fs_restore_document = output(OUTPUT_FS_RESTORE_DOCUMENT);
    context.fs_restore_status_document = output(OUTPUT_FS_RESTORE_STATUS_DOCUMENT);
    context.db_restore_document = output(OUTPUT_DB_RESTORE_DOCUMENT);
    context.migration_stack_group = output(OUTPUT_SERVER_GROUP);
    context.migration_bucket_name = output(OUTPUT_MIGRATION_BUCKET);
    context.migration_queue_url = resource(RESOURCE_MIGRATION_QUEUE);
    context.migration_dead_letter_queue_url = resource(RESOURCE_DEAD_LETTER_QUEUE);
}
