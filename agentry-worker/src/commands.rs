//! Commands module
//!
//! The worker binary runs the pool by default. The other subcommands are
//! one-off operator tools against the same queue.

use agentry_core::domain::job::JobStatus;
use agentry_core::dto::stats::QueueStats;
use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::repository::{JobQueue, PgJobQueue};
use crate::scheduler::WorkerPool;
use crate::service::{AgentRunner, CliAgentRunner, JobPipeline, PipelineSettings, WorkspaceManager};

/// Top-level CLI commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the worker pool until interrupted (default)
    Run,
    /// Print job counts by status
    Stats,
    /// Return expired leases to the queue once and exit
    ReleaseStale {
        /// Lease age in minutes after which a job counts as abandoned
        #[arg(long)]
        threshold_minutes: Option<u32>,
    },
}

/// Handle a CLI command
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - Validated worker configuration
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let pool = connect(config).await?;
    let queue = Arc::new(PgJobQueue::new(pool));

    match command {
        Commands::Run => run_pool(config, queue).await,
        Commands::Stats => print_stats(queue.as_ref()).await,
        Commands::ReleaseStale { threshold_minutes } => {
            release_stale(
                queue.as_ref(),
                threshold_minutes.unwrap_or(config.stale_threshold_minutes),
            )
            .await
        }
    }
}

async fn connect(config: &Config) -> Result<PgPool> {
    let pool = db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    info!("Database connection established");

    if config.run_migrations {
        db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;
        info!("Migrations completed");
    }

    Ok(pool)
}

/// Starts every worker slot and blocks until a shutdown signal arrives
async fn run_pool(config: &Config, queue: Arc<PgJobQueue>) -> Result<()> {
    let workspace = Arc::new(WorkspaceManager::new(
        config.workspace_base.clone(),
        config.agent_variant.clone(),
    ));
    let agent: Arc<dyn AgentRunner> = Arc::new(CliAgentRunner::new(
        config.agent_variant.clone(),
        config.agent_timeout,
    ));
    let queue: Arc<dyn JobQueue> = queue;
    let pipeline = Arc::new(JobPipeline::new(
        Arc::clone(&queue),
        agent,
        workspace,
        PipelineSettings {
            cleanup_after_complete: config.cleanup_after_complete,
            skills_dir: config.skills_dir.clone(),
            domain_knowledge_path: config.domain_knowledge_path.clone(),
            lease_renewal: config.lease_renewal_interval,
        },
    ));

    info!(
        "Agent: {} (timeout: {:?}), workspaces in {}",
        config.agent_variant,
        config.agent_timeout,
        config.workspace_base.display()
    );
    match config.lease_renewal_interval {
        Some(every) => info!("Leases renewed every {:?}", every),
        None => info!("Lease renewal disabled"),
    }

    let pool = WorkerPool::start(config, queue, pipeline);
    for worker in pool.workers() {
        info!("  - {}", worker.worker_id());
    }

    shutdown_signal().await?;
    info!("Shutdown signal received, waiting for in-flight jobs");

    pool.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
        _ = terminate.recv() => {}
    }

    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")
}

async fn print_stats(queue: &dyn JobQueue) -> Result<()> {
    let stats = queue.stats().await.context("Failed to read queue stats")?;

    println!("{}", format!("Queue ({} job(s)):", stats.total()).bold());
    for (status, count) in stat_rows(&stats) {
        println!("  {:<12} {}", colorize_status(status), count);
    }

    Ok(())
}

async fn release_stale(queue: &dyn JobQueue, threshold_minutes: u32) -> Result<()> {
    let released = queue
        .release_stale(threshold_minutes)
        .await
        .context("Failed to release stale jobs")?;

    if released == 0 {
        println!(
            "{}",
            format!("No leases older than {}m.", threshold_minutes).yellow()
        );
    } else {
        println!(
            "{}",
            format!("Released {} stale job(s) back to the queue.", released).green()
        );
    }

    Ok(())
}

fn stat_rows(stats: &QueueStats) -> [(JobStatus, i64); 4] {
    [
        (JobStatus::Pending, stats.pending),
        (JobStatus::Processing, stats.processing),
        (JobStatus::Completed, stats.completed),
        (JobStatus::Failed, stats.failed),
    ]
}

/// Colorize job status for display
fn colorize_status(status: JobStatus) -> ColoredString {
    match status {
        JobStatus::Pending => status.as_str().yellow(),
        JobStatus::Processing => status.as_str().cyan(),
        JobStatus::Completed => status.as_str().green(),
        JobStatus::Failed => status.as_str().red(),
    }
}
