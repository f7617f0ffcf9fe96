//! Result DTOs
//!
//! Parameters for recording the outcome of a processing attempt.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::result::{ErrorDetails, JobResult, ResultOutput, ResultStatus};

/// Request to persist a result and settle the owning job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResult {
    pub job_id: Uuid,
    pub status: ResultStatus,
    pub output: ResultOutput,
    pub pr_url: Option<String>,
    pub commit_sha: Option<String>,
    pub branch_name: Option<String>,
    pub duration_ms: Option<i64>,
    pub worker_id: Option<String>,
    pub error: Option<String>,
    pub error_details: Option<ErrorDetails>,
}

impl WriteResult {
    /// An `error` result with empty output
    pub fn failure(
        job_id: Uuid,
        error: impl Into<String>,
        error_details: Option<ErrorDetails>,
    ) -> Self {
        Self {
            job_id,
            status: ResultStatus::Error,
            output: ResultOutput::default(),
            pr_url: None,
            commit_sha: None,
            branch_name: None,
            duration_ms: None,
            worker_id: None,
            error: Some(error.into()),
            error_details,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    /// Materializes the row that will be stored for these parameters
    pub fn into_result(self, id: Uuid, created_at: chrono::DateTime<chrono::Utc>) -> JobResult {
        JobResult {
            id,
            job_id: self.job_id,
            status: self.status,
            output: self.output,
            pr_url: self.pr_url,
            commit_sha: self.commit_sha,
            branch_name: self.branch_name,
            duration_ms: self.duration_ms,
            worker_id: self.worker_id,
            error: self.error,
            error_details: self.error_details,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_has_empty_output() {
        let job_id = Uuid::new_v4();
        let params = WriteResult::failure(job_id, "clone failed", None)
            .with_duration_ms(42)
            .with_worker("worker-0");

        assert_eq!(params.status, ResultStatus::Error);
        assert!(params.output.is_empty());
        assert_eq!(params.duration_ms, Some(42));
        assert_eq!(params.worker_id.as_deref(), Some("worker-0"));

        let result = params.into_result(Uuid::new_v4(), chrono::Utc::now());
        assert_eq!(result.job_id, job_id);
        assert_eq!(result.error.as_deref(), Some("clone failed"));
    }
}
