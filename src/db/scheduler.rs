use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs background jobs under a caller-chosen id.
#[async_trait]
pub trait MigrationScheduler: Send + Sync {
    /// Start `job` unless a job with the same id is still running.
    async fn schedule(&self, job_id: &str, job: Job) -> bool;

    /// Stop the job if it is running. Returns whether one was stopped.
    async fn cancel(&self, job_id: &str) -> bool;
}

/// Scheduler backed by tokio tasks.
#[derive(Default)]
pub struct TokioScheduler {
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_running(&self, job_id: &str) -> bool {
        self.jobs
            .lock()
            .await
            .get(job_id)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

#[async_trait]
impl MigrationScheduler for TokioScheduler {
    async fn schedule(&self, job_id: &str, job: Job) -> bool {
        let mut jobs = self.jobs.lock().await;
        jobs.retain(|_, handle| !handle.is_finished());

        if jobs.contains_key(job_id) {
            debug!(job_id = %job_id, "Job already running");
            return false;
        }

        info!(job_id = %job_id, "Scheduling job");
        jobs.insert(job_id.to_string(), tokio::spawn(job));
        true
    }

    async fn cancel(&self, job_id: &str) -> bool {
        match self.jobs.lock().await.remove(job_id) {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                info!(job_id = %job_id, "Cancelled job");
                true
            }
            _ => false,
        }
    }
}
