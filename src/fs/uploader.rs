use super::queue::UploadQueue;
use super::report::FileSystemMigrationReport;
use super::transfer::{object_key, ObjectTransfer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Pool of workers draining the upload queue into the migration bucket.
#[derive(Clone)]
pub struct Uploader {
    transfer: Arc<dyn ObjectTransfer>,
    report: Arc<FileSystemMigrationReport>,
    root: Arc<PathBuf>,
    bucket: Arc<str>,
}

impl Uploader {
    pub fn new(
        transfer: Arc<dyn ObjectTransfer>,
        report: Arc<FileSystemMigrationReport>,
        root: &Path,
        bucket: &str,
    ) -> Self {
        Self {
            transfer,
            report,
            root: Arc::new(root.to_path_buf()),
            bucket: Arc::from(bucket),
        }
    }

    /// Run `workers` uploaders until the queue is finished and drained, or
    /// until `cancel` turns true. Uploads already started are completed.
    pub async fn upload_all(
        &self,
        queue: Arc<UploadQueue<PathBuf>>,
        workers: usize,
        cancel: watch::Receiver<bool>,
    ) {
        let handles: Vec<_> = (0..workers.max(1))
            .map(|worker| {
                let uploader = self.clone();
                let queue = Arc::clone(&queue);
                let cancel = cancel.clone();
                tokio::spawn(async move { uploader.run_worker(worker, queue, cancel).await })
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Upload worker terminated abnormally");
            }
        }

        if *cancel.borrow() {
            // Release a crawler blocked on the full queue
            queue.close().await;
        }
    }

    async fn run_worker(
        &self,
        worker: usize,
        queue: Arc<UploadQueue<PathBuf>>,
        mut cancel: watch::Receiver<bool>,
    ) {
        loop {
            if *cancel.borrow() {
                debug!(worker, "Upload worker cancelled");
                return;
            }

            let path = tokio::select! {
                path = queue.remove() => path,
                changed = cancel.changed() => {
                    if changed.is_err() {
                        // Sender gone, nobody can cancel anymore
                        queue.remove().await
                    } else {
                        continue;
                    }
                }
            };

            match path {
                Some(path) => self.upload_file(&path).await,
                None => {
                    debug!(worker, "Upload queue drained");
                    return;
                }
            }
        }
    }

    async fn upload_file(&self, path: &Path) {
        self.report.report_file_in_flight();

        let result = match object_key(&self.root, path) {
            Ok(key) => self.transfer.upload(path, &key, &self.bucket).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(upload) => {
                debug!(
                    path = %path.display(),
                    key = %upload.key,
                    bytes = upload.bytes,
                    "Uploaded file"
                );
                self.report.report_file_migrated(path);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to upload file");
                self.report.report_file_failed(path, e.to_string());
            }
        }
    }
}
