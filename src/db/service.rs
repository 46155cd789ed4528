use super::scheduler::{Job, MigrationScheduler};
use super::{DatabaseArchiver, DatabaseMigrationError, DatabaseRestorer, MigrationStep};
use crate::deployment::MigrationStackDeployment;
use crate::fs::{object_key, ObjectTransfer, UploadError, UploadReport};
use crate::migration::{FailureCause, MigrationError, MigrationService};
use crate::stage::MigrationStage;
use crate::utils::now_epoch;
use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// Prefix of the scheduler job id, followed by the migration id
pub const DATABASE_MIGRATION_JOB_KEY: &str = "database-migration-job-";

/// Objects uploaded for the database dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseUploadReport {
    pub bucket: String,
    pub uploads: Vec<UploadReport>,
}

pub struct DatabaseMigrationService {
    migration: Arc<MigrationService>,
    deployment: Arc<MigrationStackDeployment>,
    archiver: Arc<dyn DatabaseArchiver>,
    transfer: Arc<dyn ObjectTransfer>,
    restorer: Arc<dyn DatabaseRestorer>,
    scheduler: Arc<dyn MigrationScheduler>,
    temp_dir: PathBuf,
    started_at: Mutex<Option<Instant>>,
}

fn job_id(migration_id: u64) -> String {
    format!("{}{}", DATABASE_MIGRATION_JOB_KEY, migration_id)
}

impl DatabaseMigrationService {
    pub fn new(
        migration: Arc<MigrationService>,
        deployment: Arc<MigrationStackDeployment>,
        archiver: Arc<dyn DatabaseArchiver>,
        transfer: Arc<dyn ObjectTransfer>,
        restorer: Arc<dyn DatabaseRestorer>,
        scheduler: Arc<dyn MigrationScheduler>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            migration,
            deployment,
            archiver,
            transfer,
            restorer,
            scheduler,
            temp_dir: temp_dir.into(),
            started_at: Mutex::new(None),
        }
    }

    /// Export, upload and restore the database.
    ///
    /// Runs to completion on the calling task; use `schedule_migration` to
    /// run it in the background. Only starts from `OfflineWarning`, and every
    /// step only runs while the migration is still current and at the
    /// expected stage. Stage precondition failures are returned as is. A
    /// failing step moves the migration to its error stage and is returned as
    /// `DatabaseMigrationError::Failure`.
    pub async fn perform_migration(&self) -> Result<DatabaseUploadReport, DatabaseMigrationError> {
        self.migration
            .assert_current_stage(MigrationStage::OfflineWarning)
            .await?;
        let migration = self.migration.current_migration().await?;
        let id = migration.id;

        self.advance(id, MigrationStage::OfflineWarning, MigrationStage::DbMigrationExport).await?;
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        info!(migration_id = id, "Starting database migration");

        self.advance(
            id,
            MigrationStage::DbMigrationExport,
            MigrationStage::DbMigrationExportWait,
        )
        .await?;
        let artifact = match self.archiver.archive_database(&self.temp_dir).await {
            Ok(artifact) => artifact,
            Err(e) => return Err(self.fail(id, MigrationStep::Export, e).await),
        };
        info!(artifact = %artifact.display(), "Database exported");

        self.advance(
            id,
            MigrationStage::DbMigrationExportWait,
            MigrationStage::DbMigrationUpload,
        )
        .await?;
        let bucket = match self.deployment.migration_bucket_name().await {
            Ok(bucket) => bucket,
            Err(e) => return Err(self.fail(id, MigrationStep::Upload, e).await),
        };

        self.advance(
            id,
            MigrationStage::DbMigrationUpload,
            MigrationStage::DbMigrationUploadWait,
        )
        .await?;
        let report = match self.upload_artifact(&artifact, &bucket).await {
            Ok(report) => report,
            Err(e) => return Err(self.fail(id, MigrationStep::Upload, e).await),
        };
        info!(bucket = %bucket, objects = report.uploads.len(), "Database dump uploaded");

        self.advance(
            id,
            MigrationStage::DbMigrationUploadWait,
            MigrationStage::DataMigrationImport,
        )
        .await?;
        if let Err(e) = self.restorer.restore_database().await {
            return Err(self.fail(id, MigrationStep::Restore, e).await);
        }

        self.advance(id, MigrationStage::DataMigrationImport, MigrationStage::Validate).await?;
        info!(
            migration_id = id,
            elapsed_secs = self.elapsed_time().map(|d| d.as_secs()),
            "Database migration finished"
        );
        Ok(report)
    }

    /// Move `migration_id` from `from` to `to`, failing when it was aborted
    /// or replaced in the meantime.
    async fn advance(
        &self,
        migration_id: u64,
        from: MigrationStage,
        to: MigrationStage,
    ) -> Result<(), MigrationError> {
        self.migration
            .transition_if_current(migration_id, from, to, |_| {})
            .await?;
        Ok(())
    }

    /// Record the failure against the migration, then hand it back.
    async fn fail<E>(&self, migration_id: u64, step: MigrationStep, e: E) -> DatabaseMigrationError
    where
        E: StdError + Send + Sync + 'static,
    {
        let source: Arc<dyn StdError + Send + Sync> = Arc::new(e);
        error!(migration_id, step = %step, error = %source, "Database migration step failed");
        self.migration
            .error_for_migration(migration_id, FailureCause::Error(Arc::clone(&source)), |_| {})
            .await;
        DatabaseMigrationError::Failure { step, source }
    }

    async fn upload_artifact(
        &self,
        artifact: &Path,
        bucket: &str,
    ) -> Result<DatabaseUploadReport, UploadError> {
        let base = artifact.parent().unwrap_or(artifact).to_path_buf();
        let mut uploads = Vec::new();

        for file in artifact_files(artifact).await? {
            let key = object_key(&base, &file)?;
            uploads.push(self.transfer.upload(&file, &key, bucket).await?);
        }

        Ok(DatabaseUploadReport {
            bucket: bucket.to_string(),
            uploads,
        })
    }

    /// Time since the last migration run started, `None` before any run.
    pub fn elapsed_time(&self) -> Option<Duration> {
        self.started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|started| started.elapsed())
    }

    /// Run `perform_migration` in the background under the current
    /// migration's job id. A job that cannot be scheduled fails the
    /// migration.
    pub async fn schedule_migration(self: &Arc<Self>) -> Result<bool, MigrationError> {
        let migration = self.migration.current_migration().await?;
        let job_id = job_id(migration.id);

        let this = Arc::clone(self);
        let job: Job = Box::pin(async move {
            if let Err(e) = this.perform_migration().await {
                error!(error = %e, "Database migration job failed");
            }
        });

        let scheduled = self.scheduler.schedule(&job_id, job).await;
        if scheduled {
            info!(job_id = %job_id, "Scheduled database migration");
        } else {
            self.migration
                .error("Unable to start database migration job.")
                .await;
        }
        Ok(scheduled)
    }

    /// Cancel the job of `migration_id`, if any.
    pub async fn unschedule_migration(&self, migration_id: u64) -> bool {
        self.scheduler.cancel(&job_id(migration_id)).await
    }

    /// Cancel the running job and move the migration to `FinalSyncError`.
    ///
    /// The job is cancelled whatever the stage. Only valid during the
    /// database phase.
    pub async fn abort_migration(&self) -> Result<(), MigrationError> {
        let migration = self.migration.current_migration().await?;
        self.unschedule_migration(migration.id).await;

        let stage = self.migration.current_stage().await?;
        if !stage.is_db_phase() {
            return Err(MigrationError::StageNotAllowed {
                operation: "cancelling the database migration",
                actual: stage,
            });
        }

        self.migration
            .transition_with_context(MigrationStage::FinalSyncError, |context| {
                context.error_message = "Database migration aborted".to_string();
                context.end_epoch = now_epoch();
            })
            .await?;
        warn!(migration_id = migration.id, "Aborted database migration");
        Ok(())
    }
}

/// Regular files making up the artifact, which may be a single file.
async fn artifact_files(artifact: &Path) -> Result<Vec<PathBuf>, UploadError> {
    let artifact = artifact.to_path_buf();
    let files = tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in WalkDir::new(&artifact) {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok::<_, UploadError>(files)
    })
    .await
    .map_err(|e| UploadError::Rejected(e.to_string()))??;

    if files.is_empty() {
        return Err(UploadError::Rejected("database dump is empty".to_string()));
    }
    Ok(files)
}
