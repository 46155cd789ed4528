use super::crawler::DirectoryCrawler;
use super::queue::UploadQueue;
use super::report::{FileSystemMigrationReport, FsMigrationStatus, ReportSnapshot};
use super::transfer::ObjectTransfer;
use super::uploader::Uploader;
use super::{CrawlError, FsMigrationError};
use crate::config::MigrationConfig;
use crate::deployment::MigrationStackDeployment;
use crate::migration::{MigrationError, MigrationService};
use crate::stage::MigrationStage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{info, warn};

/// Copies the application's home directory into the migration bucket.
pub struct FilesystemMigrationService {
    migration: Arc<MigrationService>,
    deployment: Arc<MigrationStackDeployment>,
    transfer: Arc<dyn ObjectTransfer>,
    uploader_count: usize,
    queue_capacity: usize,
    report: RwLock<Arc<FileSystemMigrationReport>>,
    last_root: RwLock<Option<PathBuf>>,
    /// Held for as long as a pipeline runs
    pipeline: Mutex<()>,
    cancel: watch::Sender<bool>,
}

impl FilesystemMigrationService {
    pub fn new(
        migration: Arc<MigrationService>,
        deployment: Arc<MigrationStackDeployment>,
        transfer: Arc<dyn ObjectTransfer>,
        config: &MigrationConfig,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            migration,
            deployment,
            transfer,
            uploader_count: config.uploader_count,
            queue_capacity: config.queue_capacity,
            report: RwLock::new(Arc::new(FileSystemMigrationReport::new())),
            last_root: RwLock::new(None),
            pipeline: Mutex::new(()),
            cancel,
        }
    }

    /// Report of the current or last run.
    pub async fn report(&self) -> Arc<FileSystemMigrationReport> {
        Arc::clone(&*self.report.read().await)
    }

    pub fn is_running(&self) -> bool {
        self.pipeline.try_lock().is_err()
    }

    /// Crawl `root` and upload every file found.
    ///
    /// Runs until the pipeline completes. Files failing to upload are only
    /// recorded in the report; the migration still advances to
    /// `OfflineWarning`. An unreadable root moves it to its error stage.
    pub async fn start_migration(&self, root: &Path) -> Result<ReportSnapshot, FsMigrationError> {
        self.migration
            .assert_current_stage(MigrationStage::FsMigrationCopy)
            .await?;

        let _pipeline = self
            .pipeline
            .try_lock()
            .map_err(|_| FsMigrationError::AlreadyRunning)?;

        let migration = self.migration.current_migration().await?;
        let bucket = match self.deployment.migration_bucket_name().await {
            Ok(bucket) => bucket,
            Err(e) => {
                let message = format!("cannot resolve the migration bucket: {}", e);
                self.migration
                    .error_for_migration(migration.id, message, |_| {})
                    .await;
                return Err(e.into());
            }
        };

        self.migration
            .transition_if_current(
                migration.id,
                MigrationStage::FsMigrationCopy,
                MigrationStage::FsMigrationCopyWait,
                |_| {},
            )
            .await?;

        let report = self.fresh_report().await;
        *self.last_root.write().await = Some(root.to_path_buf());
        self.cancel.send_replace(false);

        info!(
            migration_id = migration.id,
            root = %root.display(),
            bucket = %bucket,
            "Starting filesystem migration"
        );

        let crawl = self.run_pipeline(root, &bucket, &report).await;

        if *self.cancel.borrow() {
            report.set_status(FsMigrationStatus::Aborted);
            info!(migration_id = migration.id, "Filesystem migration aborted");
            return Err(FsMigrationError::Aborted);
        }

        if let Err(e) = crawl {
            report.set_status(FsMigrationStatus::Failed);
            self.migration
                .error_for_migration(migration.id, e.to_string(), |_| {})
                .await;
            return Err(e.into());
        }

        report.set_status(FsMigrationStatus::Done);
        let snapshot = report.snapshot();
        info!(
            migration_id = migration.id,
            found = snapshot.files_found,
            migrated = snapshot.files_migrated,
            failed = snapshot.files_failed,
            "Filesystem migration finished"
        );

        self.migration
            .transition_if_current(
                migration.id,
                MigrationStage::FsMigrationCopyWait,
                MigrationStage::OfflineWarning,
                |_| {},
            )
            .await?;

        Ok(snapshot)
    }

    async fn fresh_report(&self) -> Arc<FileSystemMigrationReport> {
        let report = Arc::new(FileSystemMigrationReport::new());
        report.set_status(FsMigrationStatus::Running);
        *self.report.write().await = Arc::clone(&report);
        report
    }

    /// Crawler and uploaders run concurrently; both are done when this
    /// returns.
    async fn run_pipeline(
        &self,
        root: &Path,
        bucket: &str,
        report: &Arc<FileSystemMigrationReport>,
    ) -> Result<u64, CrawlError> {
        let queue = Arc::new(UploadQueue::new(self.queue_capacity));
        let uploader = Uploader::new(Arc::clone(&self.transfer), Arc::clone(report), root, bucket);
        let crawler = DirectoryCrawler::new(Arc::clone(report));

        let (crawled, ()) = tokio::join!(
            crawler.crawl_directory(root, Arc::clone(&queue)),
            uploader.upload_all(Arc::clone(&queue), self.uploader_count, self.cancel.subscribe()),
        );
        crawled
    }

    /// Stop a running pipeline and move the migration to the filesystem
    /// error stage. Only valid during the filesystem phase.
    pub async fn abort_migration(&self) -> Result<(), FsMigrationError> {
        let stage = self.migration.current_stage().await?;
        if !stage.is_fs_phase() {
            return Err(MigrationError::StageNotAllowed {
                operation: "aborting the filesystem migration",
                actual: stage,
            }
            .into());
        }

        self.cancel.send_replace(true);
        warn!(stage = %stage, "Aborting filesystem migration");
        self.migration.error("Filesystem migration aborted").await;
        Ok(())
    }

    /// Upload again every file whose upload failed in the last run, into a
    /// fresh report. Entries the crawler could not read are not retried. The
    /// migration stage is left untouched.
    pub async fn retry_failed_files(&self) -> Result<ReportSnapshot, FsMigrationError> {
        let root = self
            .last_root
            .read()
            .await
            .clone()
            .ok_or(FsMigrationError::NoReport)?;

        let _pipeline = self
            .pipeline
            .try_lock()
            .map_err(|_| FsMigrationError::AlreadyRunning)?;

        let previous = self.report().await;
        let failed = previous.failed_uploads();
        let skipped = (previous.files_failed() as usize).saturating_sub(failed.len());
        if skipped > 0 {
            warn!(entries = skipped, "Not retrying entries the crawler could not read");
        }
        let bucket = self.deployment.migration_bucket_name().await?;
        let report = self.fresh_report().await;
        self.cancel.send_replace(false);

        info!(files = failed.len(), "Retrying failed file uploads");

        let queue = Arc::new(UploadQueue::new(failed.len().max(1)));
        for file in failed {
            report.report_file_found();
            if queue.add(file.path).await.is_err() {
                break;
            }
        }
        queue.finish();

        Uploader::new(Arc::clone(&self.transfer), Arc::clone(&report), &root, &bucket)
            .upload_all(queue, self.uploader_count, self.cancel.subscribe())
            .await;

        report.set_status(if *self.cancel.borrow() {
            FsMigrationStatus::Aborted
        } else {
            FsMigrationStatus::Done
        });
        Ok(report.snapshot())
    }
}
