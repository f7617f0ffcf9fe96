//! Worker pool
//!
//! Owns the worker slots and the stale reaper, and shuts them down together.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::poller::PollingScheduler;
use super::reaper::StaleReaper;
use crate::config::Config;
use crate::repository::JobQueue;
use crate::service::JobPipeline;

pub struct WorkerPool {
    workers: Vec<(Arc<PollingScheduler>, JoinHandle<()>)>,
    reaper: Option<(Arc<StaleReaper>, JoinHandle<()>)>,
}

impl WorkerPool {
    /// Spawns one scheduler task per configured worker slot, plus the
    /// reaper when a stale-check interval is set
    pub fn start(config: &Config, queue: Arc<dyn JobQueue>, pipeline: Arc<JobPipeline>) -> Self {
        let workers = (0..config.worker_count)
            .map(|index| {
                let scheduler = Arc::new(PollingScheduler::new(
                    config.worker_id(index),
                    config.poll_interval,
                    Arc::clone(&queue),
                    Arc::clone(&pipeline),
                ));
                let handle = tokio::spawn(Arc::clone(&scheduler).run());
                (scheduler, handle)
            })
            .collect::<Vec<_>>();

        info!("Started {} worker(s)", workers.len());

        let reaper = config.stale_check_interval.map(|interval| {
            let reaper = Arc::new(StaleReaper::new(
                Arc::clone(&queue),
                config.stale_threshold_minutes,
                interval,
            ));
            let handle = tokio::spawn(Arc::clone(&reaper).run());
            (reaper, handle)
        });

        Self { workers, reaper }
    }

    pub fn workers(&self) -> impl Iterator<Item = &Arc<PollingScheduler>> {
        self.workers.iter().map(|(scheduler, _)| scheduler)
    }

    /// Stops every worker and waits for in-flight jobs to finish
    pub async fn shutdown(self) {
        info!("Stopping {} worker(s)", self.workers.len());

        for (scheduler, _) in &self.workers {
            scheduler.stop();
        }
        if let Some((reaper, _)) = &self.reaper {
            reaper.stop();
        }

        for (scheduler, handle) in self.workers {
            if let Err(e) = handle.await {
                warn!("Worker {} task panicked: {}", scheduler.worker_id(), e);
            }
        }
        if let Some((_, handle)) = self.reaper {
            if let Err(e) = handle.await {
                warn!("Stale reaper task panicked: {}", e);
            }
        }

        info!("All workers stopped");
    }
}
