use super::queue::UploadQueue;
use super::report::FileSystemMigrationReport;
use super::CrawlError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Walks a directory tree and feeds every regular file to the upload queue.
pub struct DirectoryCrawler {
    report: Arc<FileSystemMigrationReport>,
}

impl DirectoryCrawler {
    pub fn new(report: Arc<FileSystemMigrationReport>) -> Self {
        Self { report }
    }

    /// Crawl `root` on a blocking thread. Returns the number of files queued.
    ///
    /// The queue is finished whatever the outcome. An unreadable root fails
    /// the crawl; unreadable entries below it are reported as failed and the
    /// walk goes on.
    pub async fn crawl_directory(
        &self,
        root: &Path,
        queue: Arc<UploadQueue<PathBuf>>,
    ) -> Result<u64, CrawlError> {
        let report = Arc::clone(&self.report);
        let root = root.to_path_buf();
        let walk_queue = Arc::clone(&queue);

        let result = tokio::task::spawn_blocking(move || {
            let result = walk(&root, &report, &walk_queue);
            walk_queue.finish();
            result
        })
        .await;

        match result {
            Ok(result) => result,
            Err(e) => {
                queue.finish();
                Err(CrawlError::Interrupted(e.to_string()))
            }
        }
    }
}

fn walk(
    root: &Path,
    report: &FileSystemMigrationReport,
    queue: &UploadQueue<PathBuf>,
) -> Result<u64, CrawlError> {
    std::fs::read_dir(root).map_err(|source| CrawlError::RootUnreadable {
        root: root.to_path_buf(),
        source,
    })?;

    info!(root = %root.display(), "Crawling directory");
    let mut queued = 0;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                warn!(path = %path.display(), error = %e, "Failed to read directory entry");
                report.report_crawl_failure(&path, e.to_string());
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        report.report_file_found();
        if queue.blocking_add(entry.into_path()).is_err() {
            // Uploaders are gone, nothing left to feed
            warn!(root = %root.display(), "Upload queue closed while crawling");
            break;
        }
        queued += 1;
    }

    debug!(root = %root.display(), files = queued, "Finished crawling directory");
    Ok(queued)
}
