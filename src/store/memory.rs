use super::types::{Migration, MigrationContext, MigrationRecords};
use super::{MigrationStore, StoreError};
use crate::stage::MigrationStage;
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Non-persistent store with the same semantics as `JsonFileStore`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<MigrationRecords>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    async fn find_current(&self) -> Result<Option<Migration>, StoreError> {
        Ok(self.records.lock().await.current().cloned())
    }

    async fn load_migration(&self, id: u64) -> Result<Migration, StoreError> {
        self.records.lock().await.migration(id).cloned()
    }

    async fn save_migration(&self, migration: &Migration) -> Result<(), StoreError> {
        self.records.lock().await.put_migration(migration)
    }

    async fn load_context(&self, migration_id: u64) -> Result<MigrationContext, StoreError> {
        self.records.lock().await.context(migration_id).cloned()
    }

    async fn save_context(&self, context: &MigrationContext) -> Result<(), StoreError> {
        self.records.lock().await.put_context(context)
    }

    async fn save_record(
        &self,
        migration: &Migration,
        context: &MigrationContext,
    ) -> Result<(), StoreError> {
        self.records.lock().await.put_record(migration, context)
    }

    async fn create_migration(
        &self,
        stage: MigrationStage,
        context: MigrationContext,
    ) -> Result<Migration, StoreError> {
        self.records.lock().await.create(stage, context)
    }

    async fn list_migrations(&self) -> Result<Vec<Migration>, StoreError> {
        Ok(self.records.lock().await.list())
    }
}
