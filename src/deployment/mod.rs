//! Deployment of the migration stack.
//!
//! The migration stack is a bundle of cloud resources (artifact bucket,
//! restore documents, messaging queues, a migration host) created from a
//! template. `MigrationStackDeployment` requests its creation, polls it in
//! the background until it reaches a terminal status and persists the
//! resulting outputs into the migration context, where downstream components
//! discover them through the accessor methods.

mod api;
mod service;
mod state;

pub use api::{StackApi, StackApiError};
pub use service::{migration_stack_name, MigrationStackDeployment};
pub use state::{DeploymentOutcome, InfrastructureDeploymentState, StackDescription, StackStatus};

use crate::migration::MigrationError;
use thiserror::Error;

/// Stack output holding the filesystem restore document
pub const OUTPUT_FS_RESTORE_DOCUMENT: &str = "DownloadSSMDocument";
/// Stack output holding the filesystem restore status document
pub const OUTPUT_FS_RESTORE_STATUS_DOCUMENT: &str = "DownloadStatusSSMDocument";
/// Stack output holding the database restore document
pub const OUTPUT_DB_RESTORE_DOCUMENT: &str = "RdsRestoreSSMDocument";
/// Stack output holding the migration host group
pub const OUTPUT_SERVER_GROUP: &str = "ServerGroup";
/// Stack output holding the artifact bucket
pub const OUTPUT_MIGRATION_BUCKET: &str = "MigrationBucket";
/// Stack resource of the migration queue
pub const RESOURCE_MIGRATION_QUEUE: &str = "MigrationQueue";
/// Stack resource of the dead letter queue
pub const RESOURCE_DEAD_LETTER_QUEUE: &str = "DeadLetterQueue";

/// Override keys checked before the persisted context
pub mod overrides {
    pub const MIGRATION_STACK_ID: &str = "migration_stack.id";
    pub const FS_RESTORE_DOCUMENT: &str = "fs_restore.document";
    pub const FS_RESTORE_STATUS_DOCUMENT: &str = "fs_restore.status_document";
    pub const DB_RESTORE_DOCUMENT: &str = "db_restore.document";
    pub const MIGRATION_BUCKET: &str = "migration.bucket";
    pub const MIGRATION_QUEUE: &str = "migration.queue";
    pub const DEAD_LETTER_QUEUE: &str = "migration.dead_letter_queue";
    pub const MIGRATION_HOST_GROUP: &str = "migration_host.group";
    pub const MIGRATION_HOST_INSTANCE_ID: &str = "migration_host.instance_id";
}

#[derive(Error, Debug)]
pub enum DeploymentError {
    #[error("Migration stack output is not set: {0}")]
    OutputsNotSet(&'static str),

    #[error("Invalid migration stack name: '{0}'")]
    InvalidStackName(String),

    #[error("Migration stack provisioning failed: {0}")]
    ProvisionFailed(String),

    #[error("Migration stack {0} was not found even though its deployment succeeded")]
    StackNotFound(String),

    #[error("No instance found in migration host group {0}")]
    NoHostInstance(String),

    #[error("Stack API error: {0}")]
    ApiError(#[from] StackApiError),

    #[error("Deployment poller failed: {0}")]
    PollerFailed(String),

    #[error("Migration error: {0}")]
    MigrationError(#[from] MigrationError),
}
