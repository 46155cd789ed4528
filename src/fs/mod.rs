//! Filesystem crawl and upload pipeline.
//!
//! A `DirectoryCrawler` walks the application's home directory on a blocking
//! thread and feeds every regular file into a bounded `UploadQueue`. A pool of
//! `Uploader` workers drains the queue through an `ObjectTransfer` into the
//! migration bucket. Both sides update a shared `FileSystemMigrationReport`.
//! Per-file failures are accumulated in the report and never abort the run.

mod crawler;
mod queue;
mod report;
mod service;
mod transfer;
mod uploader;

pub use crawler::DirectoryCrawler;
pub use queue::{QueueFinished, UploadQueue};
pub use report::{FailedFile, FileSystemMigrationReport, FsMigrationStatus, ReportSnapshot};
pub use service::FilesystemMigrationService;
pub use transfer::{object_key, LocalDirectoryTransfer, ObjectTransfer, UploadError, UploadReport};
pub use uploader::Uploader;

use crate::deployment::DeploymentError;
use crate::migration::MigrationError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Cannot read directory {}: {source}", .root.display())]
    RootUnreadable {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Crawler interrupted: {0}")]
    Interrupted(String),
}

#[derive(Error, Debug)]
pub enum FsMigrationError {
    #[error("Migration error: {0}")]
    MigrationError(#[from] MigrationError),

    #[error("Deployment error: {0}")]
    DeploymentError(#[from] DeploymentError),

    #[error("Crawl error: {0}")]
    CrawlError(#[from] CrawlError),

    #[error("A filesystem migration is already running")]
    AlreadyRunning,

    #[error("Filesystem migration was aborted")]
    Aborted,

    #[error("No filesystem migration has run yet")]
    NoReport,
}
