//! Database migration sequencer.
//!
//! Drives archive, upload and remote restore of the application database as
//! an ordered run of stage transitions. Each step is delegated to a
//! collaborator; a failing step moves the migration to `FinalSyncError`
//! before the failure is returned, and no later step runs.

mod scheduler;
mod service;

pub use scheduler::{Job, MigrationScheduler, TokioScheduler};
pub use service::{DatabaseMigrationService, DatabaseUploadReport, DATABASE_MIGRATION_JOB_KEY};

use crate::remote::RemoteCommandError;
use async_trait::async_trait;
use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Database export failed: {0}")]
    ExportFailed(String),
}

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Remote command error: {0}")]
    RemoteError(#[from] RemoteCommandError),

    #[error("Database restore failed: {0}")]
    Failed(String),
}

/// Dumps the application database into a local artifact.
#[async_trait]
pub trait DatabaseArchiver: Send + Sync {
    /// Write the dump below `target_dir` and return its path, a file or a
    /// directory.
    async fn archive_database(&self, target_dir: &Path) -> Result<PathBuf, ArchiveError>;
}

/// Restores the uploaded dump into the cloud database.
#[async_trait]
pub trait DatabaseRestorer: Send + Sync {
    async fn restore_database(&self) -> Result<(), RestoreError>;
}

/// Step of the database migration that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStep {
    Export,
    Upload,
    Restore,
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationStep::Export => "exporting the database",
            MigrationStep::Upload => "uploading the database dump",
            MigrationStep::Restore => "restoring the database",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum DatabaseMigrationError {
    #[error("Migration error: {0}")]
    MigrationError(#[from] crate::migration::MigrationError),

    #[error("Database migration failed while {step}: {source}")]
    Failure {
        step: MigrationStep,
        #[source]
        source: Arc<dyn StdError + Send + Sync>,
    },
}

impl DatabaseMigrationError {
    /// The error that made the step fail.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            DatabaseMigrationError::Failure { source, .. } => Some(source.as_ref()),
            DatabaseMigrationError::MigrationError(_) => None,
        }
    }
}
