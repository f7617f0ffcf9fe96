//! Postgres Job Queue
//!
//! Claim and stale-release delegate to server-side functions so the
//! single-winner guarantee lives in the database. Result writes run in one
//! transaction: the job is settled only while the writer still holds its
//! lease, and the result row is inserted alongside so neither lands alone.

use agentry_core::domain::job::{Job, JobStatus};
use agentry_core::domain::result::{ErrorDetails, JobResult};
use agentry_core::dto::result::WriteResult;
use agentry_core::dto::stats::QueueStats;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{JobQueue, QueueError, Result};

/// Job queue backed by the `orchestration_requests` / `orchestration_results`
/// tables
#[derive(Debug, Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn try_claim(&self, worker_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, created_at, updated_at, org_id, user_id, status, repo_url,
                   branch, prompt, config, metadata, claimed_at, claimed_by,
                   attempts, max_attempts, last_error
            FROM claim_next_request($1)
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    /// Settles a claimed job whose row could not be decoded
    ///
    /// The claim already counted an attempt, so the job gets an error result
    /// instead of sitting in `processing` until its lease expires.
    async fn reject_malformed(&self, id: Uuid, worker_id: &str, reason: String) {
        let params = WriteResult::failure(
            id,
            format!("malformed job: {}", reason),
            Some(ErrorDetails {
                code: Some("MALFORMED_JOB".to_string()),
                ..Default::default()
            }),
        )
        .with_worker(worker_id);

        if let Err(e) = self.write_result(params).await {
            tracing::error!("Failed to record rejection of job {}: {}", id, e);
        }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn claim_next(&self, worker_id: &str) -> Option<Job> {
        match self.try_claim(worker_id).await {
            Ok(Some(job)) => {
                tracing::info!("Worker {} claimed job {}", worker_id, job.id);
                Some(job)
            }
            Ok(None) => None,
            Err(QueueError::MalformedRow { id, reason }) => {
                tracing::error!(
                    "Worker {} claimed job {} but it is malformed: {}",
                    worker_id,
                    id,
                    reason
                );
                self.reject_malformed(id, worker_id, reason).await;
                None
            }
            Err(e) => {
                tracing::error!("Failed to claim job for {}: {}", worker_id, e);
                None
            }
        }
    }

    async fn write_result(&self, params: WriteResult) -> Result<JobResult> {
        let output = serde_json::to_value(&params.output).map_err(|source| QueueError::Encode {
            field: "output",
            source,
        })?;
        let error_details = params
            .error_details
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|source| QueueError::Encode {
                field: "error_details",
                source,
            })?;

        let id = Uuid::new_v4();
        let now = chrono::Utc::now();
        let job_status = params.status.job_status();

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE orchestration_requests
            SET status = $1, last_error = COALESCE($2, last_error), updated_at = $3
            WHERE id = $4
              AND status = 'processing'
              AND ($5::TEXT IS NULL OR claimed_by = $5)
            "#,
        )
        .bind(job_status.as_str())
        .bind(&params.error)
        .bind(now)
        .bind(params.job_id)
        .bind(&params.worker_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let current: Option<(String, Option<String>)> = sqlx::query_as(
                "SELECT status, claimed_by FROM orchestration_requests WHERE id = $1",
            )
            .bind(params.job_id)
            .fetch_optional(&mut *tx)
            .await?;

            return Err(match current {
                None => QueueError::JobNotFound(params.job_id),
                Some((status, holder)) => QueueError::LeaseLost {
                    id: params.job_id,
                    status,
                    holder,
                },
            });
        }

        sqlx::query(
            r#"
            INSERT INTO orchestration_results
                (id, request_id, created_at, status, output, pr_url, commit_sha,
                 branch_name, duration_ms, worker_id, error, error_details)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(id)
        .bind(params.job_id)
        .bind(now)
        .bind(params.status.as_str())
        .bind(output)
        .bind(&params.pr_url)
        .bind(&params.commit_sha)
        .bind(&params.branch_name)
        .bind(params.duration_ms)
        .bind(&params.worker_id)
        .bind(&params.error)
        .bind(error_details)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let status = params.status;
        let result = params.into_result(id, now);
        match result.duration_ms {
            Some(ms) => tracing::info!("Result written for job {}: {} ({}ms)", result.job_id, status, ms),
            None => tracing::info!("Result written for job {}: {}", result.job_id, status),
        }

        Ok(result)
    }

    async fn renew_lease(&self, job_id: Uuid, worker_id: &str) -> Result<bool> {
        let renewed = sqlx::query(
            r#"
            UPDATE orchestration_requests
            SET claimed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'processing' AND claimed_by = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(renewed.rows_affected() == 1)
    }

    async fn release_stale(&self, threshold_minutes: u32) -> Result<u64> {
        let minutes = i32::try_from(threshold_minutes).unwrap_or(i32::MAX);

        let released: Option<i32> =
            sqlx::query_scalar("SELECT release_stale_requests(make_interval(mins => $1))")
                .bind(minutes)
                .fetch_one(&self.pool)
                .await?;

        let released = released.unwrap_or(0).max(0) as u64;
        if released > 0 {
            tracing::warn!("Released {} stale job(s)", released);
        }

        Ok(released)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM orchestration_requests GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            match status.parse::<JobStatus>() {
                Ok(status) => stats.record(status, count),
                Err(e) => tracing::warn!("Ignoring {} job(s) with {}", count, e),
            }
        }

        Ok(stats)
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    org_id: Option<String>,
    user_id: Option<String>,
    status: String,
    repo_url: Option<String>,
    branch: Option<String>,
    prompt: String,
    config: serde_json::Value,
    metadata: Option<serde_json::Value>,
    claimed_at: Option<chrono::DateTime<chrono::Utc>>,
    claimed_by: Option<String>,
    attempts: i32,
    max_attempts: i32,
    last_error: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|reason| QueueError::MalformedRow { id: row.id, reason })?;

        let config = serde_json::from_value(row.config).map_err(|e| QueueError::MalformedRow {
            id: row.id,
            reason: format!("config: {}", e),
        })?;

        // Metadata may be NULL or `{}` in older rows
        let metadata = match row.metadata {
            None | Some(serde_json::Value::Null) => Default::default(),
            Some(value) => serde_json::from_value(value).map_err(|e| QueueError::MalformedRow {
                id: row.id,
                reason: format!("metadata: {}", e),
            })?,
        };

        Ok(Job {
            id: row.id,
            org_id: row.org_id,
            user_id: row.user_id,
            status,
            prompt: row.prompt,
            repo_url: row.repo_url,
            branch: row.branch,
            config,
            metadata,
            claimed_at: row.claimed_at,
            claimed_by: row.claimed_by,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
