//! Stale lease reaper
//!
//! Periodically hands expired `processing` leases back to the queue so jobs
//! abandoned by crashed workers are picked up again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::repository::{JobQueue, QueueError};

pub struct StaleReaper {
    queue: Arc<dyn JobQueue>,
    threshold_minutes: u32,
    interval: Duration,
    stopped: AtomicBool,
    wake: Notify,
}

impl StaleReaper {
    pub fn new(queue: Arc<dyn JobQueue>, threshold_minutes: u32, interval: Duration) -> Self {
        Self {
            queue,
            threshold_minutes,
            interval,
            stopped: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Releases stale leases once and logs queue counts
    ///
    /// # Returns
    /// Number of jobs made claimable again
    pub async fn sweep(&self) -> Result<u64, QueueError> {
        let released = self.queue.release_stale(self.threshold_minutes).await?;

        match self.queue.stats().await {
            Ok(stats) => debug!(
                "Queue: {} pending, {} processing, {} completed, {} failed",
                stats.pending, stats.processing, stats.completed, stats.failed
            ),
            Err(e) => debug!("Failed to read queue stats: {}", e),
        }

        Ok(released)
    }

    /// Sweeps on every tick until [`stop`](Self::stop) is called
    pub async fn run(self: Arc<Self>) {
        info!(
            "Starting stale reaper (threshold: {}m, interval: {:?})",
            self.threshold_minutes, self.interval
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.stopped.load(Ordering::Acquire) {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => continue,
            }

            match self.sweep().await {
                Ok(released) if released > 0 => {
                    info!("Released {} stale job(s) back to the queue", released)
                }
                Ok(_) => {}
                Err(e) => error!("Stale release failed: {}", e),
            }
        }

        info!("Stale reaper stopped");
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryQueue;
    use agentry_core::domain::job::JobStatus;

    #[tokio::test]
    async fn test_sweep_releases_expired_leases() {
        let queue = Arc::new(MemoryQueue::new());
        let id = queue.push("abandoned");
        queue.claim_next("crashed-worker").await.unwrap();
        queue.age_lease(id, 31);

        let reaper = StaleReaper::new(queue.clone(), 30, Duration::from_secs(60));

        assert_eq!(reaper.sweep().await.unwrap(), 1);
        assert_eq!(reaper.sweep().await.unwrap(), 0);
        assert_eq!(queue.job(id).unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_run_sweeps_until_stopped() {
        let queue = Arc::new(MemoryQueue::new());
        let id = queue.push("abandoned");
        queue.claim_next("crashed-worker").await.unwrap();
        queue.age_lease(id, 90);

        let reaper = Arc::new(StaleReaper::new(queue.clone(), 30, Duration::from_millis(10)));
        let handle = tokio::spawn(Arc::clone(&reaper).run());

        for _ in 0..100 {
            if queue.job(id).unwrap().status == JobStatus::Pending {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        reaper.stop();
        handle.await.unwrap();

        assert_eq!(queue.job(id).unwrap().status, JobStatus::Pending);
    }
}
