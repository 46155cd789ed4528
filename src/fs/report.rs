use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FsMigrationStatus {
    #[default]
    NotStarted,
    Running,
    Done,
    Failed,
    Aborted,
}

impl FsMigrationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FsMigrationStatus::Done | FsMigrationStatus::Failed | FsMigrationStatus::Aborted
        )
    }
}

impl fmt::Display for FsMigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FsMigrationStatus::NotStarted => "NOT_STARTED",
            FsMigrationStatus::Running => "RUNNING",
            FsMigrationStatus::Done => "DONE",
            FsMigrationStatus::Failed => "FAILED",
            FsMigrationStatus::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Point-in-time view of a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSnapshot {
    pub status: FsMigrationStatus,
    pub files_found: u64,
    pub files_in_flight: u64,
    pub files_migrated: u64,
    pub files_failed: u64,
    pub elapsed_secs: Option<u64>,
}

#[derive(Default)]
struct Timing {
    started: Option<Instant>,
    ended: Option<Instant>,
}

/// Progress of one filesystem migration, shared by the crawler and the
/// uploaders.
///
/// A file moves found -> in flight -> migrated or failed. Entries the
/// crawler cannot read go straight from found to failed.
#[derive(Default)]
pub struct FileSystemMigrationReport {
    status: Mutex<FsMigrationStatus>,
    timing: Mutex<Timing>,
    files_found: AtomicU64,
    files_in_flight: AtomicU64,
    files_migrated: AtomicU64,
    files_failed: AtomicU64,
    migrated: Mutex<HashSet<PathBuf>>,
    failed: Mutex<HashMap<PathBuf, String>>,
    unreadable: Mutex<HashSet<PathBuf>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn decrement(counter: &AtomicU64) {
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
}

impl FileSystemMigrationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> FsMigrationStatus {
        *lock(&self.status)
    }

    /// Moving to `Running` starts the clock, a terminal status stops it.
    pub fn set_status(&self, status: FsMigrationStatus) {
        let mut timing = lock(&self.timing);
        if status == FsMigrationStatus::Running {
            timing.started = Some(Instant::now());
            timing.ended = None;
        } else if status.is_terminal() && timing.ended.is_none() {
            timing.ended = Some(Instant::now());
        }
        *lock(&self.status) = status;
    }

    /// Time spent running, `None` before the migration started.
    pub fn elapsed(&self) -> Option<Duration> {
        let timing = lock(&self.timing);
        let started = timing.started?;
        Some(timing.ended.unwrap_or_else(Instant::now).duration_since(started))
    }

    pub fn report_file_found(&self) {
        self.files_found.fetch_add(1, Ordering::SeqCst);
    }

    pub fn report_file_in_flight(&self) {
        self.files_in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub fn report_file_migrated(&self, path: &Path) {
        decrement(&self.files_in_flight);
        lock(&self.migrated).insert(path.to_path_buf());
        self.files_migrated.fetch_add(1, Ordering::SeqCst);
    }

    /// An in-flight upload failed.
    pub fn report_file_failed(&self, path: &Path, reason: impl Into<String>) {
        decrement(&self.files_in_flight);
        lock(&self.unreadable).remove(path);
        self.record_failure(path, reason.into());
    }

    /// An entry the crawler could not read. Counted as found and failed.
    pub fn report_crawl_failure(&self, path: &Path, reason: impl Into<String>) {
        self.report_file_found();
        lock(&self.unreadable).insert(path.to_path_buf());
        self.record_failure(path, reason.into());
    }

    fn record_failure(&self, path: &Path, reason: String) {
        lock(&self.failed).insert(path.to_path_buf(), reason);
        self.files_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn files_found(&self) -> u64 {
        self.files_found.load(Ordering::SeqCst)
    }

    pub fn files_in_flight(&self) -> u64 {
        self.files_in_flight.load(Ordering::SeqCst)
    }

    pub fn files_migrated(&self) -> u64 {
        self.files_migrated.load(Ordering::SeqCst)
    }

    pub fn files_failed(&self) -> u64 {
        self.files_failed.load(Ordering::SeqCst)
    }

    pub fn migrated_files(&self) -> HashSet<PathBuf> {
        lock(&self.migrated).clone()
    }

    pub fn failed_files(&self) -> Vec<FailedFile> {
        let mut files: Vec<FailedFile> = lock(&self.failed)
            .iter()
            .map(|(path, reason)| FailedFile {
                path: path.clone(),
                reason: reason.clone(),
            })
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    /// Failed files that reached an uploader. Entries the crawler could not
    /// read, directories included, are left out.
    pub fn failed_uploads(&self) -> Vec<FailedFile> {
        let unreadable = lock(&self.unreadable).clone();
        self.failed_files()
            .into_iter()
            .filter(|file| !unreadable.contains(&file.path))
            .collect()
    }

    /// Counters are read completed first, then in flight, then found, so
    /// `in_flight + migrated + failed <= found` holds for every snapshot.
    pub fn snapshot(&self) -> ReportSnapshot {
        let files_migrated = self.files_migrated();
        let files_failed = self.files_failed();
        let files_in_flight = self.files_in_flight();
        let files_found = self.files_found();

        ReportSnapshot {
            status: self.status(),
            files_found,
            files_in_flight,
            files_migrated,
            files_failed,
            elapsed_secs: self.elapsed().map(|d| d.as_secs()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_report_is_empty() {
        let report = FileSystemMigrationReport::new();
        assert_eq!(report.status(), FsMigrationStatus::NotStarted);
        assert!(report.migrated_files().is_empty());
        assert!(report.failed_files().is_empty());
        assert!(report.elapsed().is_none());
    }

    #[test]
    fn test_migrated_file_leaves_in_flight() {
        let report = FileSystemMigrationReport::new();
        report.report_file_found();
        report.report_file_found();
        report.report_file_in_flight();
        report.report_file_in_flight();
        assert_eq!(report.files_in_flight(), 2);

        report.report_file_migrated(Path::new("test"));
        assert_eq!(report.files_in_flight(), 1);
        assert_eq!(report.files_migrated(), 1);
        assert!(report.migrated_files().contains(Path::new("test")));
    }

    #[test]
    fn test_failed_upload_records_reason() {
        let report = FileSystemMigrationReport::new();
        report.report_file_found();
        report.report_file_in_flight();
        report.report_file_failed(Path::new("broken"), "access denied");

        assert_eq!(report.files_in_flight(), 0);
        assert_eq!(
            report.failed_files(),
            vec![FailedFile {
                path: PathBuf::from("broken"),
                reason: "access denied".to_string()
            }]
        );
    }

    #[test]
    fn test_crawl_failure_counts_as_found_and_failed() {
        let report = FileSystemMigrationReport::new();
        report.report_crawl_failure(Path::new("unreadable"), "permission denied");

        let snapshot = report.snapshot();
        assert_eq!(snapshot.files_found, 1);
        assert_eq!(snapshot.files_failed, 1);
        assert_eq!(snapshot.files_in_flight, 0);
    }

    #[test]
    fn test_failed_uploads_leave_out_crawl_failures() {
        let report = FileSystemMigrationReport::new();
        report.report_crawl_failure(Path::new("locked-directory"), "permission denied");
        report.report_file_found();
        report.report_file_in_flight();
        report.report_file_failed(Path::new("broken"), "access denied");

        assert_eq!(report.failed_files().len(), 2);
        let uploads = report.failed_uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].path, PathBuf::from("broken"));
    }

    #[test]
    fn test_in_flight_never_goes_negative() {
        let report = FileSystemMigrationReport::new();
        report.report_file_migrated(Path::new("orphan"));
        assert_eq!(report.files_in_flight(), 0);
    }

    #[test]
    fn test_elapsed_stops_at_terminal_status() {
        let report = FileSystemMigrationReport::new();
        report.set_status(FsMigrationStatus::Running);
        report.set_status(FsMigrationStatus::Done);

        let first = report.elapsed().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(report.elapsed().unwrap(), first);
    }
}
