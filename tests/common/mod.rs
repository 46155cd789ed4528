#![allow(dead_code)]

use async_trait::async_trait;
use cloud_migrate::config::{ConfigOverrides, MigrationConfig};
use cloud_migrate::db::{ArchiveError, DatabaseArchiver, DatabaseRestorer, RestoreError};
use cloud_migrate::deployment::{
    MigrationStackDeployment, StackApi, StackApiError, StackDescription, StackStatus,
};
use cloud_migrate::fs::{ObjectTransfer, UploadError, UploadReport};
use cloud_migrate::migration::MigrationService;
use cloud_migrate::remote::{
    CommandInvocation, CommandRequest, CommandStatus, RemoteCommandApi, RemoteCommandError,
};
use cloud_migrate::stage::MigrationStage;
use cloud_migrate::store::{
    MemoryStore, Migration, MigrationContext, MigrationStore, StoreError,
};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

pub const APPLICATION_DEPLOYMENT_ID: &str = "jira-prod";
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Create a temporary directory for testing
pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Configuration with small queues and few uploaders
pub fn test_config() -> MigrationConfig {
    MigrationConfig {
        uploader_count: 2,
        queue_capacity: 4,
        ..Default::default()
    }
}

pub fn config_with_overrides(overrides: ConfigOverrides) -> MigrationConfig {
    MigrationConfig {
        overrides,
        ..test_config()
    }
}

/// A migration service over an in-memory store whose current migration sits
/// at `stage`
pub async fn migration_at(stage: MigrationStage) -> Arc<MigrationService> {
    migration_with_context(stage, MigrationContext::default()).await
}

pub async fn migration_with_context(
    stage: MigrationStage,
    context: MigrationContext,
) -> Arc<MigrationService> {
    let store = Arc::new(MemoryStore::new());
    let context = MigrationContext {
        application_deployment_id: APPLICATION_DEPLOYMENT_ID.to_string(),
        ..context
    };
    let mut migration = store
        .create_migration(MigrationStage::Started, context)
        .await
        .expect("Should create migration");
    migration.stage = stage;
    store
        .save_migration(&migration)
        .await
        .expect("Should save migration");
    Arc::new(MigrationService::new(store))
}

/// Like `migration_at`, over a store whose reads can be made to fail
pub async fn flaky_migration_at(
    stage: MigrationStage,
) -> (Arc<MigrationService>, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::default());
    let mut migration = store
        .create_migration(
            MigrationStage::Started,
            MigrationContext {
                application_deployment_id: APPLICATION_DEPLOYMENT_ID.to_string(),
                ..Default::default()
            },
        )
        .await
        .expect("Should create migration");
    migration.stage = stage;
    store
        .save_migration(&migration)
        .await
        .expect("Should save migration");
    (Arc::new(MigrationService::new(store.clone())), store)
}

/// Context of a migration whose stack was deployed with an artifact bucket
pub fn deployed_context(bucket: &str) -> MigrationContext {
    MigrationContext {
        migration_bucket_name: bucket.to_string(),
        ..Default::default()
    }
}

pub fn deployment(
    migration: &Arc<MigrationService>,
    stack_api: &Arc<FakeStackApi>,
    config: &MigrationConfig,
) -> Arc<MigrationStackDeployment> {
    Arc::new(
        MigrationStackDeployment::new(Arc::clone(migration), stack_api.clone(), config)
            .with_poll_interval(POLL_INTERVAL),
    )
}

/// Create `newfile.txt` and `subdirectory/subfile.txt` below `root`
pub fn create_home_files(root: &Path) -> Vec<PathBuf> {
    let newfile = root.join("newfile.txt");
    std::fs::write(&newfile, "newfile content").expect("Should write file");
    let subdirectory = root.join("subdirectory");
    std::fs::create_dir_all(&subdirectory).expect("Should create directory");
    let subfile = subdirectory.join("subfile.txt");
    std::fs::write(&subfile, "subfile content in the subdirectory").expect("Should write file");
    vec![newfile, subfile]
}

/// Stack API answering status queries from a script. Once the script is
/// exhausted every query reports `InProgress`.
#[derive(Default)]
pub struct FakeStackApi {
    statuses: Mutex<VecDeque<Result<StackStatus, StackApiError>>>,
    description: Mutex<Option<StackDescription>>,
    provision_error: Mutex<Option<String>>,
    instances: Mutex<HashMap<String, Vec<String>>>,
    provisioned: Mutex<Vec<(String, String)>>,
    status_calls: AtomicUsize,
    describe_calls: AtomicUsize,
}

impl FakeStackApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_statuses(statuses: Vec<StackStatus>) -> Arc<Self> {
        let api = Self::default();
        *api.statuses.lock().unwrap() = statuses.into_iter().map(Ok).collect();
        Arc::new(api)
    }

    pub fn push_status(&self, status: Result<StackStatus, StackApiError>) {
        self.statuses.lock().unwrap().push_back(status);
    }

    pub fn set_outputs(&self, outputs: &[(&str, &str)], resources: &[(&str, &str)]) {
        let to_map = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>()
        };
        *self.description.lock().unwrap() = Some(StackDescription {
            outputs: to_map(outputs),
            resources: to_map(resources),
        });
    }

    pub fn fail_provisioning(&self, reason: &str) {
        *self.provision_error.lock().unwrap() = Some(reason.to_string());
    }

    pub fn set_instances(&self, group: &str, instances: &[&str]) {
        self.instances.lock().unwrap().insert(
            group.to_string(),
            instances.iter().map(|i| i.to_string()).collect(),
        );
    }

    /// (template url, stack name) of every provision request
    pub fn provisioned(&self) -> Vec<(String, String)> {
        self.provisioned.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StackApi for FakeStackApi {
    async fn provision(
        &self,
        template_url: &str,
        stack_name: &str,
        _params: &HashMap<String, String>,
    ) -> Result<String, StackApiError> {
        if let Some(reason) = self.provision_error.lock().unwrap().clone() {
            return Err(StackApiError(reason));
        }
        self.provisioned
            .lock()
            .unwrap()
            .push((template_url.to_string(), stack_name.to_string()));
        Ok(format!("arn:stack/{}", stack_name))
    }

    async fn status(&self, _stack_name: &str) -> Result<StackStatus, StackApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(StackStatus::InProgress))
    }

    async fn describe(&self, _stack_name: &str) -> Result<Option<StackDescription>, StackApiError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.description.lock().unwrap().clone())
    }

    async fn group_instances(&self, group: &str) -> Result<Vec<String>, StackApiError> {
        Ok(self
            .instances
            .lock()
            .unwrap()
            .get(group)
            .cloned()
            .unwrap_or_default())
    }
}

/// Records uploads in memory. Files whose name is listed in `failing` are
/// rejected. Uploads wait on the gate when one is set.
#[derive(Default)]
pub struct FakeTransfer {
    failing: Mutex<Vec<String>>,
    uploaded: Mutex<Vec<(PathBuf, String, String)>>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
}

impl FakeTransfer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(names: &[&str]) -> Arc<Self> {
        let transfer = Self::default();
        *transfer.failing.lock().unwrap() = names.iter().map(|n| n.to_string()).collect();
        Arc::new(transfer)
    }

    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Default::default()
        })
    }

    pub fn stop_failing(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// Object keys uploaded so far, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .uploaded
            .lock()
            .unwrap()
            .iter()
            .map(|(_, key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn buckets(&self) -> Vec<String> {
        self.uploaded
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, bucket)| bucket.clone())
            .collect()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectTransfer for FakeTransfer {
    async fn upload(
        &self,
        local: &Path,
        key: &str,
        bucket: &str,
    ) -> Result<UploadReport, UploadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.map_err(|e| UploadError::Rejected(e.to_string()))?;
        }

        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.failing.lock().unwrap().contains(&name) {
            return Err(UploadError::Rejected(format!("access denied: {}", name)));
        }

        self.uploaded
            .lock()
            .unwrap()
            .push((local.to_path_buf(), key.to_string(), bucket.to_string()));
        Ok(UploadReport {
            bucket: bucket.to_string(),
            key: key.to_string(),
            bytes: 0,
        })
    }
}

/// Writes a dump file into the target directory, or fails.
#[derive(Default)]
pub struct FakeArchiver {
    fail_with: Option<String>,
    calls: AtomicUsize,
}

impl FakeArchiver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(reason.to_string()),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseArchiver for FakeArchiver {
    async fn archive_database(&self, target_dir: &Path) -> Result<PathBuf, ArchiveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.fail_with {
            return Err(ArchiveError::ExportFailed(reason.clone()));
        }
        let dump = target_dir.join("db.dump");
        tokio::fs::write(&dump, "dump").await?;
        Ok(dump)
    }
}

#[derive(Default)]
pub struct FakeRestorer {
    fail_with: Option<String>,
    calls: AtomicUsize,
}

impl FakeRestorer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(reason.to_string()),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseRestorer for FakeRestorer {
    async fn restore_database(&self) -> Result<(), RestoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(reason) => Err(RestoreError::Failed(reason.clone())),
            None => Ok(()),
        }
    }
}

/// Remote command API answering invocation queries from a script. Once the
/// script is exhausted the command stays in progress.
#[derive(Default)]
pub struct FakeRemoteApi {
    invocations: Mutex<VecDeque<CommandStatus>>,
    requests: Mutex<Vec<CommandRequest>>,
}

impl FakeRemoteApi {
    pub fn with_statuses(statuses: Vec<CommandStatus>) -> Arc<Self> {
        let api = Self::default();
        *api.invocations.lock().unwrap() = statuses.into();
        Arc::new(api)
    }

    pub fn requests(&self) -> Vec<CommandRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteCommandApi for FakeRemoteApi {
    async fn run(&self, request: CommandRequest) -> Result<String, RemoteCommandError> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request);
        Ok(format!("command-{}", requests.len()))
    }

    async fn invocation(
        &self,
        _command_id: &str,
        _target_id: &str,
    ) -> Result<CommandInvocation, RemoteCommandError> {
        let status = self
            .invocations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CommandStatus::InProgress);
        let stderr = if status == CommandStatus::Failed {
            "restore failed".to_string()
        } else {
            String::new()
        };
        Ok(CommandInvocation {
            status,
            stdout: "ok".to_string(),
            stderr,
        })
    }
}

/// In-memory store whose next `find_current` calls fail on demand.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing_reads: AtomicUsize,
}

impl FlakyStore {
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    fn injected_failure(&self) -> Option<StoreError> {
        self.failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()
            .map(|_| {
                StoreError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "store temporarily unavailable",
                ))
            })
    }
}

#[async_trait]
impl MigrationStore for FlakyStore {
    async fn find_current(&self) -> Result<Option<Migration>, StoreError> {
        if let Some(e) = self.injected_failure() {
            return Err(e);
        }
        self.inner.find_current().await
    }

    async fn load_migration(&self, id: u64) -> Result<Migration, StoreError> {
        self.inner.load_migration(id).await
    }

    async fn save_migration(&self, migration: &Migration) -> Result<(), StoreError> {
        self.inner.save_migration(migration).await
    }

    async fn load_context(&self, migration_id: u64) -> Result<MigrationContext, StoreError> {
        self.inner.load_context(migration_id).await
    }

    async fn save_context(&self, context: &MigrationContext) -> Result<(), StoreError> {
        self.inner.save_context(context).await
    }

    async fn save_record(
        &self,
        migration: &Migration,
        context: &MigrationContext,
    ) -> Result<(), StoreError> {
        self.inner.save_record(migration, context).await
    }

    async fn create_migration(
        &self,
        stage: MigrationStage,
        context: MigrationContext,
    ) -> Result<Migration, StoreError> {
        self.inner.create_migration(stage, context).await
    }

    async fn list_migrations(&self) -> Result<Vec<Migration>, StoreError> {
        self.inner.list_migrations().await
    }
}
