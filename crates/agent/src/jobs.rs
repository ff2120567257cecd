//! Background-job bookkeeping for long-running actions.
//!
//! The job table sits behind an injected `JobStore` so deployments can swap
//! the mutex-guarded in-memory table for an external store. Discipline:
//! exactly one worker task drives a given job's status and progress; polling
//! callers only ever read.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as Retention, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use merchat_core::config::JobsConfig;
use merchat_core::{BackgroundJob, DomainError, JobId, JobStatus};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error(transparent)]
    Transition(#[from] DomainError),
    #[error("progress updates are only valid while processing (job {job_id} is {status:?})")]
    ProgressOutsideProcessing { job_id: JobId, status: JobStatus },
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: BackgroundJob);
    async fn get(&self, job_id: &JobId) -> Option<BackgroundJob>;
    async fn update(&self, job: BackgroundJob) -> Result<(), JobError>;
    /// Removes terminal jobs whose completion is older than `cutoff`.
    async fn remove_terminal_before(&self, cutoff: DateTime<Utc>) -> usize;
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, BackgroundJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: BackgroundJob) {
        self.jobs.lock().await.insert(job.job_id.clone(), job);
    }

    async fn get(&self, job_id: &JobId) -> Option<BackgroundJob> {
        self.jobs.lock().await.get(job_id).cloned()
    }

    async fn update(&self, job: BackgroundJob) -> Result<(), JobError> {
        let mut jobs = self.jobs.lock().await;
        if !jobs.contains_key(&job.job_id) {
            return Err(JobError::NotFound(job.job_id));
        }
        jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    async fn remove_terminal_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal()
                && job.completed_at.map_or(false, |completed| completed < cutoff))
        });
        before - jobs.len()
    }
}

/// Lets the executing work report progress while its job is PROCESSING.
#[derive(Clone)]
pub struct ProgressHandle {
    store: Arc<dyn JobStore>,
    job_id: JobId,
}

impl ProgressHandle {
    pub async fn set(&self, progress: u8) -> Result<(), JobError> {
        let mut job =
            self.store.get(&self.job_id).await.ok_or(JobError::NotFound(self.job_id.clone()))?;
        if job.status != JobStatus::Processing {
            return Err(JobError::ProgressOutsideProcessing {
                job_id: self.job_id.clone(),
                status: job.status,
            });
        }
        job.progress = progress.min(100);
        self.store.update(job).await
    }
}

pub struct JobManager {
    store: Arc<dyn JobStore>,
    retention: Retention,
}

impl JobManager {
    pub fn new(store: Arc<dyn JobStore>, config: &JobsConfig) -> Self {
        Self { store, retention: Retention::hours(config.retention_hours as i64) }
    }

    pub async fn create(&self, job_type: &str, owner_id: &str) -> BackgroundJob {
        let job = BackgroundJob::new(job_type, owner_id);
        info!(
            event_name = "jobs.created",
            job_id = %job.job_id,
            job_type = job_type,
            "background job created"
        );
        self.store.insert(job.clone()).await;
        job
    }

    /// Drives one job through PROCESSING to a terminal state. The work's
    /// failure is recorded on the job, never propagated.
    pub async fn run<F, Fut>(&self, job_id: &JobId, work: F) -> Result<BackgroundJob, JobError>
    where
        F: FnOnce(ProgressHandle) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
    {
        let mut job =
            self.store.get(job_id).await.ok_or(JobError::NotFound(job_id.clone()))?;
        job.transition_to(JobStatus::Processing)?;
        self.store.update(job).await?;

        let handle = ProgressHandle { store: Arc::clone(&self.store), job_id: job_id.clone() };
        let outcome = work(handle).await;

        // Reload to pick up progress written by the work itself.
        let mut job =
            self.store.get(job_id).await.ok_or(JobError::NotFound(job_id.clone()))?;
        match outcome {
            Ok(result) => {
                job.transition_to(JobStatus::Completed)?;
                job.result = Some(result);
                info!(event_name = "jobs.completed", job_id = %job.job_id, "job completed");
            }
            Err(error) => {
                job.transition_to(JobStatus::Failed)?;
                job.error = Some(error.to_string());
                warn!(
                    event_name = "jobs.failed",
                    job_id = %job.job_id,
                    error = %error,
                    "job failed"
                );
            }
        }
        self.store.update(job.clone()).await?;
        Ok(job)
    }

    pub async fn poll(&self, job_id: &JobId) -> Result<BackgroundJob, JobError> {
        self.store.get(job_id).await.ok_or(JobError::NotFound(job_id.clone()))
    }

    /// Deletes terminal jobs older than the retention window.
    pub async fn sweep(&self) -> usize {
        let cutoff = Utc::now() - self.retention;
        let removed = self.store.remove_terminal_before(cutoff).await;
        if removed > 0 {
            info!(event_name = "jobs.swept", removed, "expired jobs removed");
        }
        removed
    }
}

/// Periodically sweeps expired terminal jobs. The returned handle is the
/// only way to stop the task; the embedding binary owns its lifetime.
pub fn spawn_reaper(manager: Arc<JobManager>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            manager.sweep().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration as Retention, Utc};
    use serde_json::json;

    use merchat_core::config::JobsConfig;
    use merchat_core::{BackgroundJob, JobStatus};

    use super::{spawn_reaper, InMemoryJobStore, JobError, JobManager, JobStore};

    fn manager() -> JobManager {
        JobManager::new(
            Arc::new(InMemoryJobStore::new()),
            &JobsConfig { retention_hours: 24, sweep_interval_secs: 3_600 },
        )
    }

    #[tokio::test]
    async fn successful_run_records_result_and_full_progress() {
        let manager = manager();
        let job = manager.create("order.extraction", "user-1").await;
        assert_eq!(job.status, JobStatus::Pending);

        let finished = manager
            .run(&job.job_id, |progress| async move {
                progress.set(40).await?;
                Ok(json!({"dispatched": true}))
            })
            .await
            .expect("run");

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.progress, 100);
        assert_eq!(finished.result, Some(json!({"dispatched": true})));
        assert!(finished.completed_at.is_some());
    }

    #[tokio::test]
    async fn failing_work_is_recorded_not_propagated() {
        let manager = manager();
        let job = manager.create("order.extraction", "user-1").await;

        let finished = manager
            .run(&job.job_id, |_progress| async move {
                Err(anyhow::anyhow!("backend rejected the order"))
            })
            .await
            .expect("run itself succeeds");

        assert_eq!(finished.status, JobStatus::Failed);
        assert_eq!(finished.error.as_deref(), Some("backend rejected the order"));
    }

    #[tokio::test]
    async fn terminal_jobs_cannot_be_run_again() {
        let manager = manager();
        let job = manager.create("order.extraction", "user-1").await;
        manager.run(&job.job_id, |_p| async move { Ok(json!({})) }).await.expect("first run");

        let rerun = manager.run(&job.job_id, |_p| async move { Ok(json!({})) }).await;
        assert!(matches!(rerun, Err(JobError::Transition(_))));
    }

    #[tokio::test]
    async fn progress_updates_outside_processing_are_rejected() {
        let manager = manager();
        let job = manager.create("order.extraction", "user-1").await;

        let handle_error = manager
            .run(&job.job_id, |progress| async move {
                progress.set(10).await?;
                Ok(json!({}))
            })
            .await
            .expect("run");
        assert_eq!(handle_error.status, JobStatus::Completed);

        // A stale handle after completion must not mutate the job.
        let store = Arc::new(InMemoryJobStore::new());
        let manager = JobManager::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            &JobsConfig { retention_hours: 24, sweep_interval_secs: 3_600 },
        );
        let job = manager.create("order.extraction", "user-1").await;
        let captured = Arc::new(tokio::sync::Mutex::new(None));
        let slot = Arc::clone(&captured);
        manager
            .run(&job.job_id, |progress| async move {
                *slot.lock().await = Some(progress);
                Ok(json!({}))
            })
            .await
            .expect("run");

        let stale = captured.lock().await.take().expect("handle captured");
        let result = stale.set(50).await;
        assert!(matches!(result, Err(JobError::ProgressOutsideProcessing { .. })));
    }

    #[tokio::test]
    async fn poll_of_unknown_job_is_not_found() {
        let manager = manager();
        let ghost = merchat_core::JobId::generate();
        assert!(matches!(manager.poll(&ghost).await, Err(JobError::NotFound(_))));
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_terminal_jobs() {
        let store = Arc::new(InMemoryJobStore::new());
        let manager = JobManager::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            &JobsConfig { retention_hours: 24, sweep_interval_secs: 3_600 },
        );

        let mut expired = BackgroundJob::new("order.extraction", "user-1");
        expired.transition_to(JobStatus::Processing).expect("processing");
        expired.transition_to(JobStatus::Completed).expect("completed");
        expired.completed_at = Some(Utc::now() - Retention::hours(48));
        store.insert(expired.clone()).await;

        let fresh = manager.create("order.extraction", "user-2").await;

        assert_eq!(manager.sweep().await, 1);
        assert!(manager.poll(&expired.job_id).await.is_err());
        assert!(manager.poll(&fresh.job_id).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_sweeps_on_its_interval() {
        let store = Arc::new(InMemoryJobStore::new());
        let manager = Arc::new(JobManager::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            &JobsConfig { retention_hours: 24, sweep_interval_secs: 60 },
        ));

        let mut expired = BackgroundJob::new("order.extraction", "user-1");
        expired.transition_to(JobStatus::Processing).expect("processing");
        expired.transition_to(JobStatus::Completed).expect("completed");
        expired.completed_at = Some(Utc::now() - Retention::hours(48));
        store.insert(expired.clone()).await;

        let reaper = spawn_reaper(Arc::clone(&manager), 60);
        tokio::task::yield_now().await;
        tokio::time::advance(std::time::Duration::from_secs(61)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
            if manager.poll(&expired.job_id).await.is_err() {
                break;
            }
        }

        assert!(matches!(manager.poll(&expired.job_id).await, Err(JobError::NotFound(_))));
        reaper.abort();
    }
}
