//! Repository Module
//!
//! Access to the shared job queue. Exclusivity between workers comes from
//! the store's atomic claim operation; nothing in-process coordinates them.

#[cfg(test)]
pub mod memory;
pub mod postgres;

use agentry_core::domain::job::Job;
use agentry_core::domain::result::JobResult;
use agentry_core::dto::result::WriteResult;
use agentry_core::dto::stats::QueueStats;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[cfg(test)]
pub use memory::MemoryQueue;
pub use postgres::PgJobQueue;

/// Errors raised by queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error(
        "job {id} is no longer leased to this worker (status {status}, held by {})",
        .holder.as_deref().unwrap_or("nobody")
    )]
    LeaseLost {
        id: Uuid,
        status: String,
        holder: Option<String>,
    },

    #[error("failed to encode {field}: {source}")]
    Encode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed row for job {id}: {reason}")]
    MalformedRow { id: Uuid, reason: String },
}

impl QueueError {
    /// Whether retrying the same operation could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Gateway to the durable job queue
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Atomically claims the next eligible pending job for `worker_id`
    ///
    /// Never fails: store errors are logged and reported as "nothing to
    /// claim" so the caller simply retries on its next tick.
    async fn claim_next(&self, worker_id: &str) -> Option<Job>;

    /// Persists a result and moves the owning job to its terminal status
    ///
    /// Only a job still `processing` is settled, and when `worker_id` is set
    /// it must be the current lease holder. Otherwise nothing is written and
    /// [`QueueError::LeaseLost`] is returned.
    async fn write_result(&self, params: WriteResult) -> Result<JobResult>;

    /// Refreshes the claim timestamp of a job `worker_id` still holds
    ///
    /// # Returns
    /// `false` when the lease has already been released or taken over
    async fn renew_lease(&self, job_id: Uuid, worker_id: &str) -> Result<bool>;

    /// Returns expired `processing` leases to `pending`
    ///
    /// # Returns
    /// Number of jobs made claimable again
    async fn release_stale(&self, threshold_minutes: u32) -> Result<u64>;

    /// Job counts by status
    async fn stats(&self) -> Result<QueueStats>;
}
