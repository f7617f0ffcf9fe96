//! In-memory job queue
//!
//! Mirrors the semantics of the Postgres store functions (single-winner
//! claim, attempt accounting, stale release) behind one mutex. Used to
//! exercise the pipeline and scheduler without a database.

use agentry_core::domain::job::{Job, JobConfig, JobStatus};
use agentry_core::domain::result::JobResult;
use agentry_core::dto::result::WriteResult;
use agentry_core::dto::stats::QueueStats;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use super::{JobQueue, QueueError, Result};

#[derive(Default)]
struct State {
    /// Insertion order doubles as FIFO claim order
    jobs: Vec<Job>,
    results: Vec<JobResult>,
}

#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
    fail_writes: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a pending job with default settings
    pub fn push(&self, prompt: &str) -> Uuid {
        self.push_job(|_| {}, prompt)
    }

    /// Enqueues a pending job after letting `customize` adjust it
    pub fn push_job(&self, customize: impl FnOnce(&mut Job), prompt: &str) -> Uuid {
        let now = chrono::Utc::now();
        let mut job = Job {
            id: Uuid::new_v4(),
            org_id: None,
            user_id: None,
            status: JobStatus::Pending,
            prompt: prompt.to_string(),
            repo_url: None,
            branch: None,
            config: JobConfig::default(),
            metadata: Default::default(),
            claimed_at: None,
            claimed_by: None,
            attempts: 0,
            max_attempts: 3,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        customize(&mut job);
        let id = job.id;
        self.state.lock().unwrap().jobs.push(job);
        id
    }

    pub fn job(&self, id: Uuid) -> Option<Job> {
        let state = self.state.lock().unwrap();
        state.jobs.iter().find(|j| j.id == id).cloned()
    }

    pub fn results_for(&self, id: Uuid) -> Vec<JobResult> {
        let state = self.state.lock().unwrap();
        state.results.iter().filter(|r| r.job_id == id).cloned().collect()
    }

    /// Moves a job's lease into the past to simulate a crashed worker
    pub fn age_lease(&self, id: Uuid, minutes: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.iter_mut().find(|j| j.id == id) {
            if let Some(claimed_at) = job.claimed_at.as_mut() {
                *claimed_at -= chrono::Duration::minutes(minutes);
            }
        }
    }

    /// Makes every subsequent `write_result` fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn claim_next(&self, worker_id: &str) -> Option<Job> {
        let mut state = self.state.lock().unwrap();
        let now = chrono::Utc::now();

        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.status == JobStatus::Pending && j.attempts < j.max_attempts)?;

        job.status = JobStatus::Processing;
        job.claimed_at = Some(now);
        job.claimed_by = Some(worker_id.to_string());
        job.attempts += 1;
        job.updated_at = now;

        Some(job.clone())
    }

    async fn write_result(&self, params: WriteResult) -> Result<JobResult> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(QueueError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut state = self.state.lock().unwrap();
        let now = chrono::Utc::now();

        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == params.job_id)
            .ok_or(QueueError::JobNotFound(params.job_id))?;

        let holds_lease = job.status == JobStatus::Processing
            && params
                .worker_id
                .as_ref()
                .is_none_or(|w| job.claimed_by.as_ref() == Some(w));
        if !holds_lease {
            return Err(QueueError::LeaseLost {
                id: job.id,
                status: job.status.as_str().to_string(),
                holder: job.claimed_by.clone(),
            });
        }

        job.status = params.status.job_status();
        if let Some(error) = &params.error {
            job.last_error = Some(error.clone());
        }
        job.updated_at = now;

        let result = params.into_result(Uuid::new_v4(), now);
        state.results.push(result.clone());

        Ok(result)
    }

    async fn renew_lease(&self, job_id: Uuid, worker_id: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let now = chrono::Utc::now();

        let Some(job) = state.jobs.iter_mut().find(|j| {
            j.id == job_id
                && j.status == JobStatus::Processing
                && j.claimed_by.as_deref() == Some(worker_id)
        }) else {
            return Ok(false);
        };

        job.claimed_at = Some(now);
        job.updated_at = now;
        Ok(true)
    }

    async fn release_stale(&self, threshold_minutes: u32) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let now = chrono::Utc::now();
        let cutoff = now - chrono::Duration::minutes(i64::from(threshold_minutes));

        let mut released = 0;
        for job in state.jobs.iter_mut() {
            let expired = job.status == JobStatus::Processing
                && job.claimed_at.is_some_and(|at| at < cutoff);
            if !expired {
                continue;
            }

            if job.attempts >= job.max_attempts {
                job.status = JobStatus::Failed;
                job.last_error = Some(format!("lease expired after {} attempt(s)", job.attempts));
            } else {
                job.status = JobStatus::Pending;
                released += 1;
            }
            job.claimed_at = None;
            job.claimed_by = None;
            job.updated_at = now;
        }

        Ok(released)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.state.lock().unwrap();
        let mut stats = QueueStats::default();
        for job in &state.jobs {
            stats.record(job.status, 1);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentry_core::domain::result::{ResultOutput, ResultStatus};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn write(job_id: Uuid, status: ResultStatus, error: Option<&str>) -> WriteResult {
        WriteResult {
            job_id,
            status,
            output: ResultOutput::default(),
            pr_url: None,
            commit_sha: None,
            branch_name: None,
            duration_ms: Some(10),
            worker_id: Some("worker-0".to_string()),
            error: error.map(str::to_string),
            error_details: None,
        }
    }

    #[tokio::test]
    async fn test_claim_marks_processing_and_stamps_lease() {
        let queue = MemoryQueue::new();
        let id = queue.push("task");

        let job = queue.claim_next("worker-7").await.unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.claimed_by.as_deref(), Some("worker-7"));
        assert!(job.claimed_at.is_some());
        assert_eq!(job.attempts, 1);

        assert!(queue.claim_next("worker-8").await.is_none());
    }

    #[tokio::test]
    async fn test_claims_are_fifo() {
        let queue = MemoryQueue::new();
        let first = queue.push("first");
        let second = queue.push("second");

        assert_eq!(queue.claim_next("w").await.unwrap().id, first);
        assert_eq!(queue.claim_next("w").await.unwrap().id, second);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_never_duplicate() {
        let queue = Arc::new(MemoryQueue::new());
        for i in 0..20 {
            queue.push(&format!("job {}", i));
        }

        let mut handles = Vec::new();
        for w in 0..8 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                let worker_id = format!("worker-{}", w);
                let mut claimed = Vec::new();
                while let Some(job) = queue.claim_next(&worker_id).await {
                    claimed.push(job.id);
                    tokio::task::yield_now().await;
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }

        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), all.len());
        assert!(all.len() <= 20);
        assert_eq!(queue.stats().await.unwrap().processing, all.len() as i64);
    }

    #[tokio::test]
    async fn test_success_result_completes_job() {
        let queue = MemoryQueue::new();
        let id = queue.push("task");
        queue.claim_next("worker-0").await.unwrap();

        let result = queue
            .write_result(write(id, ResultStatus::Success, None))
            .await
            .unwrap();

        assert_eq!(result.job_id, id);
        assert_eq!(queue.job(id).unwrap().status, JobStatus::Completed);
        assert_eq!(queue.results_for(id).len(), 1);
    }

    #[tokio::test]
    async fn test_non_success_results_fail_job() {
        for status in [ResultStatus::Error, ResultStatus::Partial, ResultStatus::Timeout] {
            let queue = MemoryQueue::new();
            let id = queue.push("task");
            queue.claim_next("worker-0").await.unwrap();

            queue
                .write_result(write(id, status, Some("boom")))
                .await
                .unwrap();

            let job = queue.job(id).unwrap();
            assert_eq!(job.status, JobStatus::Failed, "status {}", status);
            assert_eq!(job.last_error.as_deref(), Some("boom"));
        }
    }

    #[tokio::test]
    async fn test_write_for_unknown_job_fails() {
        let queue = MemoryQueue::new();
        let err = queue
            .write_result(write(Uuid::new_v4(), ResultStatus::Success, None))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_release_stale_is_idempotent() {
        let queue = MemoryQueue::new();
        let stale = queue.push("stale");
        let fresh = queue.push("fresh");
        queue.claim_next("w-0").await.unwrap();
        queue.claim_next("w-1").await.unwrap();
        queue.age_lease(stale, 45);

        assert_eq!(queue.release_stale(30).await.unwrap(), 1);
        assert_eq!(queue.release_stale(30).await.unwrap(), 0);

        let job = queue.job(stale).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.claimed_by.is_none());
        assert!(job.claimed_at.is_none());
        assert_eq!(queue.job(fresh).unwrap().status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_exhausted_job_fails_instead_of_requeueing() {
        let queue = MemoryQueue::new();
        let id = queue.push_job(|j| j.max_attempts = 1, "one shot");
        queue.claim_next("w").await.unwrap();
        queue.age_lease(id, 60);

        assert_eq!(queue.release_stale(30).await.unwrap(), 0);

        let job = queue.job(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.last_error.unwrap().contains("lease expired"));
        assert!(queue.claim_next("w").await.is_none());
    }

    #[tokio::test]
    async fn test_write_from_non_holder_is_rejected() {
        let queue = MemoryQueue::new();
        let id = queue.push("task");
        queue.claim_next("worker-1").await.unwrap();

        let err = queue
            .write_result(write(id, ResultStatus::Success, None))
            .await
            .unwrap_err();

        assert!(!err.is_transient());
        match err {
            QueueError::LeaseLost { holder, .. } => assert_eq!(holder.as_deref(), Some("worker-1")),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(queue.job(id).unwrap().status, JobStatus::Processing);
        assert!(queue.results_for(id).is_empty());
    }

    #[tokio::test]
    async fn test_write_after_stale_release_is_rejected() {
        let queue = MemoryQueue::new();
        let id = queue.push("slow");
        queue.claim_next("worker-0").await.unwrap();
        queue.age_lease(id, 45);
        queue.release_stale(30).await.unwrap();

        let err = queue
            .write_result(write(id, ResultStatus::Success, None))
            .await
            .unwrap_err();

        assert!(matches!(err, QueueError::LeaseLost { .. }));
        assert_eq!(queue.job(id).unwrap().status, JobStatus::Pending);
        assert!(queue.results_for(id).is_empty());
    }

    #[tokio::test]
    async fn test_renew_lease_only_for_holder() {
        let queue = MemoryQueue::new();
        let id = queue.push("long");
        queue.claim_next("worker-0").await.unwrap();
        queue.age_lease(id, 45);

        assert!(!queue.renew_lease(id, "worker-1").await.unwrap());
        assert!(queue.renew_lease(id, "worker-0").await.unwrap());
        assert_eq!(queue.release_stale(30).await.unwrap(), 0);
        assert_eq!(queue.job(id).unwrap().claimed_by.as_deref(), Some("worker-0"));

        assert!(!queue.renew_lease(Uuid::new_v4(), "worker-0").await.unwrap());
    }
}
