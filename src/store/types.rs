use super::StoreError;
use crate::deployment::InfrastructureDeploymentState;
use crate::stage::MigrationStage;
use crate::utils::now_iso;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One migration run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    pub id: u64,
    pub stage: MigrationStage,
    pub created_at: String,
    pub updated_at: String,
}

/// Flat key/value details attached to a migration run.
///
/// The stack fields are written by the migration stack deployment once the
/// stack reaches a terminal state and blanked by
/// `MigrationStackDeployment::clear_persisted_stack_details`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrationContext {
    pub migration_id: u64,
    pub application_deployment_id: String,
    pub helper_stack_deployment_id: String,
    pub service_url: String,
    pub deployment_state: InfrastructureDeploymentState,
    pub error_message: String,
    pub start_epoch: i64,
    pub end_epoch: i64,
    pub provisioning_start_epoch: i64,
    pub fs_restore_document: String,
    pub fs_restore_status_document: String,
    pub db_restore_document: String,
    pub migration_stack_group: String,
    pub migration_bucket_name: String,
    pub migration_queue_url: String,
    pub migration_dead_letter_queue_url: String,
}

impl MigrationContext {
    /// Copy of the deployment details, for a new run reusing the same
    /// infrastructure.
    pub fn retaining_infrastructure(&self) -> Self {
        Self {
            migration_id: 0,
            application_deployment_id: self.application_deployment_id.clone(),
            helper_stack_deployment_id: self.helper_stack_deployment_id.clone(),
            service_url: self.service_url.clone(),
            deployment_state: InfrastructureDeploymentState::CreateComplete,
            fs_restore_document: self.fs_restore_document.clone(),
            fs_restore_status_document: self.fs_restore_status_document.clone(),
            db_restore_document: self.db_restore_document.clone(),
            migration_stack_group: self.migration_stack_group.clone(),
            migration_bucket_name: self.migration_bucket_name.clone(),
            migration_queue_url: self.migration_queue_url.clone(),
            migration_dead_letter_queue_url: self.migration_dead_letter_queue_url.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub migration: Migration,
    pub context: MigrationContext,
}

/// All migration runs, as persisted in `migrations.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecords {
    /// Schema version for future migrations
    pub schema_version: u32,

    /// When the records were last modified
    pub updated_at: String,

    /// Id handed to the next created migration
    pub next_id: u64,

    pub migrations: BTreeMap<u64, MigrationRecord>,
}

impl Default for MigrationRecords {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationRecords {
    pub fn new() -> Self {
        Self {
            schema_version: 1,
            updated_at: now_iso(),
            next_id: 1,
            migrations: BTreeMap::new(),
        }
    }

    /// The most recently created migration
    pub fn current(&self) -> Option<&Migration> {
        self.migrations.values().next_back().map(|r| &r.migration)
    }

    /// Create a migration unless a non-terminal one exists.
    pub fn create(
        &mut self,
        stage: MigrationStage,
        mut context: MigrationContext,
    ) -> Result<Migration, StoreError> {
        if let Some(current) = self.current() {
            if !current.stage.is_terminal() {
                return Err(StoreError::MigrationInProgress(current.id));
            }
        }

        let now = now_iso();
        let id = self.next_id;
        let migration = Migration {
            id,
            stage,
            created_at: now.clone(),
            updated_at: now.clone(),
        };
        context.migration_id = id;

        self.next_id += 1;
        self.updated_at = now;
        self.migrations.insert(
            id,
            MigrationRecord {
                migration: migration.clone(),
                context,
            },
        );
        Ok(migration)
    }

    pub fn migration(&self, id: u64) -> Result<&Migration, StoreError> {
        self.migrations
            .get(&id)
            .map(|r| &r.migration)
            .ok_or(StoreError::MigrationNotFound(id))
    }

    pub fn context(&self, id: u64) -> Result<&MigrationContext, StoreError> {
        self.migrations
            .get(&id)
            .map(|r| &r.context)
            .ok_or(StoreError::MigrationNotFound(id))
    }

    pub fn put_migration(&mut self, migration: &Migration) -> Result<(), StoreError> {
        let record = self
            .migrations
            .get_mut(&migration.id)
            .ok_or(StoreError::MigrationNotFound(migration.id))?;
        record.migration = migration.clone();
        self.updated_at = now_iso();
        Ok(())
    }

    pub fn put_context(&mut self, context: &MigrationContext) -> Result<(), StoreError> {
        let record = self
            .migrations
            .get_mut(&context.migration_id)
            .ok_or(StoreError::MigrationNotFound(context.migration_id))?;
        record.context = context.clone();
        self.updated_at = now_iso();
        Ok(())
    }

    pub fn put_record(
        &mut self,
        migration: &Migration,
        context: &MigrationContext,
    ) -> Result<(), StoreError> {
        if migration.id != context.migration_id {
            return Err(StoreError::MigrationNotFound(context.migration_id));
        }
        let record = self
            .migrations
            .get_mut(&migration.id)
            .ok_or(StoreError::MigrationNotFound(migration.id))?;
        record.migration = migration.clone();
        record.context = context.clone();
        self.updated_at = now_iso();
        Ok(())
    }

    pub fn list(&self) -> Vec<Migration> {
        self.migrations.values().map(|r| r.migration.clone()).collect()
    }
}
