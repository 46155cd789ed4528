//! Durable storage for migration runs and their contexts.
//!
//! Storage enforces "at most one active migration": a new run can only be
//! created when no run exists or the most recent one reached a terminal
//! stage.

mod file;
mod memory;
mod types;

pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use types::{Migration, MigrationContext, MigrationRecord, MigrationRecords};

use crate::stage::MigrationStage;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Migration {0} not found")]
    MigrationNotFound(u64),

    #[error("Migration {0} is still in progress")]
    MigrationInProgress(u64),
}

#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// The most recently created migration, if any.
    async fn find_current(&self) -> Result<Option<Migration>, StoreError>;

    async fn load_migration(&self, id: u64) -> Result<Migration, StoreError>;

    async fn save_migration(&self, migration: &Migration) -> Result<(), StoreError>;

    async fn load_context(&self, migration_id: u64) -> Result<MigrationContext, StoreError>;

    async fn save_context(&self, context: &MigrationContext) -> Result<(), StoreError>;

    /// Persist a migration together with its context in one write.
    async fn save_record(
        &self,
        migration: &Migration,
        context: &MigrationContext,
    ) -> Result<(), StoreError>;

    /// Create a migration with its context. Fails with
    /// `StoreError::MigrationInProgress` while the current run is not terminal.
    async fn create_migration(
        &self,
        stage: MigrationStage,
        context: MigrationContext,
    ) -> Result<Migration, StoreError>;

    /// All migrations, oldest first.
    async fn list_migrations(&self) -> Result<Vec<Migration>, StoreError>;
}
