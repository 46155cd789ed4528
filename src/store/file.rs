use super::types::{Migration, MigrationContext, MigrationRecords};
use super::{MigrationStore, StoreError};
use crate::stage::MigrationStage;
use crate::utils::get_migrations_path;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Store keeping every migration in a single JSON document
/// (`<data-dir>/migrations.json`).
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    /// Guards the read-modify-write cycle on the records file
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: get_migrations_path(data_dir),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the records from disk
    async fn read_records(&self) -> Result<MigrationRecords, StoreError> {
        if !self.path.exists() {
            return Ok(MigrationRecords::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        let records: MigrationRecords = serde_json::from_str(&content)?;
        Ok(records)
    }

    /// Write the records to disk without acquiring the lock (caller must hold lock)
    async fn write_records_unlocked(&self, records: &MigrationRecords) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write atomically using temp file + rename
        let temp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(records)?;
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }

    async fn modify<T>(
        &self,
        f: impl FnOnce(&mut MigrationRecords) -> Result<T, StoreError> + Send,
    ) -> Result<T, StoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_records().await?;
        let value = f(&mut records)?;
        self.write_records_unlocked(&records).await?;
        Ok(value)
    }
}

#[async_trait]
impl MigrationStore for JsonFileStore {
    async fn find_current(&self) -> Result<Option<Migration>, StoreError> {
        let records = self.read_records().await?;
        Ok(records.current().cloned())
    }

    async fn load_migration(&self, id: u64) -> Result<Migration, StoreError> {
        let records = self.read_records().await?;
        records.migration(id).cloned()
    }

    async fn save_migration(&self, migration: &Migration) -> Result<(), StoreError> {
        self.modify(|records| records.put_migration(migration)).await
    }

    async fn load_context(&self, migration_id: u64) -> Result<MigrationContext, StoreError> {
        let records = self.read_records().await?;
        records.context(migration_id).cloned()
    }

    async fn save_context(&self, context: &MigrationContext) -> Result<(), StoreError> {
        self.modify(|records| records.put_context(context)).await
    }

    async fn save_record(
        &self,
        migration: &Migration,
        context: &MigrationContext,
    ) -> Result<(), StoreError> {
        self.modify(|records| records.put_record(migration, context)).await
    }

    async fn create_migration(
        &self,
        stage: MigrationStage,
        context: MigrationContext,
    ) -> Result<Migration, StoreError> {
        self.modify(move |records| records.create(stage, context)).await
    }

    async fn list_migrations(&self) -> Result<Vec<Migration>, StoreError> {
        let records = self.read_records().await?;
        Ok(records.list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_survive_a_new_store_instance() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(temp_dir.path());

        let migration = store
            .create_migration(MigrationStage::Started, MigrationContext::default())
            .await
            .unwrap();
        let mut context = store.load_context(migration.id).await.unwrap();
        context.migration_bucket_name = "bucket-a".to_string();
        store.save_context(&context).await.unwrap();

        let reopened = JsonFileStore::new(temp_dir.path());
        let current = reopened.find_current().await.unwrap().unwrap();
        assert_eq!(current.id, migration.id);
        assert_eq!(current.stage, MigrationStage::Started);
        let context = reopened.load_context(migration.id).await.unwrap();
        assert_eq!(context.migration_bucket_name, "bucket-a");
        assert!(!temp_dir.path().join("migrations.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_empty_store_has_no_current_migration() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(temp_dir.path());
        assert!(store.find_current().await.unwrap().is_none());
        assert!(matches!(
            store.load_migration(7).await,
            Err(StoreError::MigrationNotFound(7))
        ));
    }

    #[tokio::test]
    async fn test_create_refused_while_active() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(temp_dir.path());
        let first = store
            .create_migration(MigrationStage::Started, MigrationContext::default())
            .await
            .unwrap();

        let second = store
            .create_migration(MigrationStage::Started, MigrationContext::default())
            .await;
        assert!(matches!(second, Err(StoreError::MigrationInProgress(id)) if id == first.id));

        let mut finished = first.clone();
        finished.stage = MigrationStage::Done;
        store.save_migration(&finished).await.unwrap();

        let third = store
            .create_migration(MigrationStage::Started, MigrationContext::default())
            .await
            .unwrap();
        assert!(third.id > first.id);
        assert_eq!(store.list_migrations().await.unwrap().len(), 2);
    }
}
