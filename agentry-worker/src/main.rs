//! Agentry Worker
//!
//! A pool of stateless workers that execute coding-agent jobs from a shared
//! Postgres queue.
//!
//! Architecture:
//! - Configuration: settings from environment variables or flags
//! - Repository: the durable job queue (claim, result write, stale release)
//! - Services: workspace management, agent execution, the job pipeline
//! - Scheduler: one polling loop per worker slot plus the stale reaper
//!
//! Each worker claims one job at a time, runs the agent in a fresh
//! workspace, records the result and cleans up. Exclusivity between workers
//! comes from the queue's atomic claim.

mod commands;
mod config;
mod db;
mod repository;
mod scheduler;
mod service;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{Commands, handle_command};
use crate::config::{Config, ConfigArgs};

#[derive(Parser)]
#[command(name = "agentry-worker")]
#[command(about = "Coding-agent job worker pool", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentry_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    let config = Config::from(cli.config);
    config.validate()?;

    if command == Commands::Run {
        info!("Starting Agentry Worker");
        info!(
            "Loaded configuration: workers={}, prefix={}, poll_interval={:?}",
            config.worker_count, config.worker_id_prefix, config.poll_interval
        );
    }

    handle_command(command, &config).await
}
