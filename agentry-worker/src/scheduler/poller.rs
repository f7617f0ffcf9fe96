//! Polling scheduler
//!
//! One per worker slot. Claims a job when idle, runs it through the
//! pipeline, then waits for the next tick. Slots never coordinate with each
//! other; the queue's claim guarantees they get different jobs.

use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio::time::{self, Duration};
use tracing::{Instrument, debug, error, info, info_span};

use crate::repository::JobQueue;
use crate::service::JobPipeline;

/// Lifecycle state of a worker slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Processing,
    Stopped,
}

/// Polls the queue for one worker identity
pub struct PollingScheduler {
    worker_id: String,
    poll_interval: Duration,
    queue: Arc<dyn JobQueue>,
    pipeline: Arc<JobPipeline>,
    processing: AtomicBool,
    stopped: AtomicBool,
    wake: Notify,
}

impl PollingScheduler {
    pub fn new(
        worker_id: impl Into<String>,
        poll_interval: Duration,
        queue: Arc<dyn JobQueue>,
        pipeline: Arc<JobPipeline>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            poll_interval,
            queue,
            pipeline,
            processing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn state(&self) -> WorkerState {
        if self.stopped.load(Ordering::Acquire) {
            WorkerState::Stopped
        } else if self.processing.load(Ordering::Acquire) {
            WorkerState::Processing
        } else {
            WorkerState::Idle
        }
    }

    /// Runs the poll loop until [`stop`](Self::stop) is called
    pub async fn run(self: Arc<Self>) {
        let span = info_span!("worker", worker_id = %self.worker_id);
        self.poll_loop().instrument(span).await
    }

    async fn poll_loop(&self) {
        info!("Starting worker (interval: {:?})", self.poll_interval);

        while !self.stopped.load(Ordering::Acquire) {
            if self.state() == WorkerState::Idle {
                if let Err(e) = self.process_next().await {
                    error!("Error during poll cycle: {:#}", e);
                }
            }

            tokio::select! {
                _ = time::sleep(self.poll_interval) => {}
                _ = self.wake.notified() => {}
            }
        }

        info!("Worker stopped");
    }

    /// Claims and processes at most one job
    ///
    /// # Returns
    /// `true` if a job was processed. `false` when the queue was empty or
    /// another cycle is already running on this worker.
    pub async fn process_next(&self) -> Result<bool> {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Cycle already in progress, skipping");
            return Ok(false);
        }

        let outcome = self.cycle().await;
        self.processing.store(false, Ordering::Release);
        outcome
    }

    async fn cycle(&self) -> Result<bool> {
        let Some(job) = self.queue.claim_next(&self.worker_id).await else {
            debug!("No jobs available");
            return Ok(false);
        };

        let span = info_span!("job", job_id = %job.id);
        self.pipeline
            .process(&job, &self.worker_id)
            .instrument(span)
            .await?;

        Ok(true)
    }

    /// Asks the loop to exit after the current cycle
    ///
    /// An in-flight job is never interrupted; a pending sleep is cut short.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}
