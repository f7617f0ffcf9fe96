//! Job pipeline
//!
//! Processes one claimed job end to end:
//! workspace setup → optional clone → provisioning → agent run →
//! artifact extraction → result write → workspace cleanup.
//!
//! Any stage failure becomes an `error` result; cleanup runs regardless.
//! While a job is in flight its lease is renewed in the background so the
//! stale reaper does not hand it to another worker.

use agentry_core::domain::job::Job;
use agentry_core::domain::result::{ErrorDetails, JobResult, ResultOutput, ResultStatus};
use agentry_core::dto::result::WriteResult;
use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::repository::JobQueue;
use crate::service::agent::AgentRunner;
use crate::service::workspace::WorkspaceManager;

/// Attempts made to persist a result before giving up
const RESULT_WRITE_ATTEMPTS: u32 = 3;

const INITIAL_WRITE_BACKOFF: Duration = Duration::from_millis(500);

static PR_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://github\.com/[^/]+/[^/]+/pull/\d+").expect("PR URL pattern is valid")
});

/// First hosted pull-request URL mentioned in `output`
pub fn extract_pr_url(output: &str) -> Option<String> {
    PR_URL.find(output).map(|m| m.as_str().to_string())
}

/// Deployment-level pipeline options
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    /// Remove the workspace once the result is recorded
    pub cleanup_after_complete: bool,
    pub skills_dir: Option<PathBuf>,
    pub domain_knowledge_path: Option<PathBuf>,
    /// How often an in-flight job's lease is refreshed; `None` disables it
    pub lease_renewal: Option<Duration>,
}

/// Background task refreshing one job's lease, stopped on drop
struct LeaseHeartbeat(JoinHandle<()>);

impl LeaseHeartbeat {
    fn start(queue: Arc<dyn JobQueue>, job_id: Uuid, worker_id: String, every: Duration) -> Self {
        let task = async move {
            let mut ticker = tokio::time::interval(every);
            // The claim itself stamped the lease
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match queue.renew_lease(job_id, &worker_id).await {
                    Ok(true) => debug!("  Lease renewed"),
                    Ok(false) => {
                        warn!("  Lease on job {} is no longer held by {}", job_id, worker_id);
                        return;
                    }
                    Err(e) => warn!("  Failed to renew lease on job {}: {}", job_id, e),
                }
            }
        };
        Self(tokio::spawn(task.in_current_span()))
    }
}

impl Drop for LeaseHeartbeat {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs claimed jobs through their processing stages
///
/// Shared by every worker slot; holds no per-job state.
pub struct JobPipeline {
    queue: Arc<dyn JobQueue>,
    agent: Arc<dyn AgentRunner>,
    workspace: Arc<WorkspaceManager>,
    settings: PipelineSettings,
    write_backoff: Duration,
}

impl JobPipeline {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        agent: Arc<dyn AgentRunner>,
        workspace: Arc<WorkspaceManager>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            queue,
            agent,
            workspace,
            settings,
            write_backoff: INITIAL_WRITE_BACKOFF,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_write_backoff(mut self, backoff: Duration) -> Self {
        self.write_backoff = backoff;
        self
    }

    /// Processes a claimed job and records its result
    ///
    /// # Returns
    /// The stored result. An error means the result could not be persisted;
    /// the job is then left `processing` for stale-lease recovery.
    pub async fn process(&self, job: &Job, worker_id: &str) -> Result<JobResult> {
        let started = Instant::now();

        info!("Processing job {}", job.id);
        match job.repository() {
            Some(url) => info!("  Repo: {} ({})", url, job.branch_or_default()),
            None => info!("  Repo: (none - using empty workspace)"),
        }
        info!("  Prompt: {}", preview(&job.prompt, 100));
        if !job.metadata.is_empty() {
            let keys: Vec<&str> = job.metadata.keys().map(String::as_str).collect();
            info!("  Metadata keys: {}", keys.join(", "));
        }

        let heartbeat = self.settings.lease_renewal.map(|every| {
            LeaseHeartbeat::start(Arc::clone(&self.queue), job.id, worker_id.to_string(), every)
        });

        let mut root = None;
        let params = match self.run_stages(job, &mut root).await {
            Ok(params) => params,
            Err(e) => {
                error!("  Failed: {:#}", e);
                WriteResult::failure(
                    job.id,
                    format!("{:#}", e),
                    Some(ErrorDetails {
                        stack: Some(format!("{:?}", e)),
                        ..Default::default()
                    }),
                )
            }
        };

        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        let params = params.with_duration_ms(duration_ms).with_worker(worker_id);
        let status = params.status;
        let pr_url = params.pr_url.clone();

        let written = self.persist(params).await;
        drop(heartbeat);
        if written.is_ok() {
            info!("  Completed with status {} in {}ms", status, duration_ms);
            if let Some(url) = pr_url {
                info!("  PR created: {}", url);
            }
        }

        if let Some(root) = root {
            if self.settings.cleanup_after_complete {
                self.workspace.cleanup(&root).await;
                info!("  Workspace cleaned up");
            }
        }

        written
    }

    /// Runs every stage up to (not including) the result write
    ///
    /// `root` is filled in as soon as the workspace exists so the caller can
    /// clean it up whatever happens afterwards.
    async fn run_stages(&self, job: &Job, root: &mut Option<PathBuf>) -> Result<WriteResult> {
        let workspace = self
            .workspace
            .setup(job.id)
            .await
            .context("Failed to set up workspace")?;
        *root = Some(workspace.clone());
        info!("  Workspace: {}", workspace.display());

        let cloned = match job.repository() {
            Some(url) => {
                self.workspace
                    .clone_repo(&workspace, url, job.branch_or_default())
                    .await
                    .context("Failed to clone repository")?;
                info!("  Repository cloned");
                true
            }
            None => false,
        };

        self.provision(&workspace).await?;

        let run = self
            .agent
            .execute(&workspace, &job.prompt, &job.config, &job.metadata)
            .await
            .context("Agent execution failed")?
            .into_run();

        let pr_url = extract_pr_url(&run.stdout);
        let commit_sha = self.workspace.latest_commit(&workspace).await;
        let branch_name = self.workspace.current_branch(&workspace).await;
        let has_changes = if cloned {
            Some(self.workspace.has_changes(&workspace).await)
        } else {
            None
        };

        let status = if run.timed_out {
            ResultStatus::Timeout
        } else if run.exit_code == 0 {
            ResultStatus::Success
        } else {
            ResultStatus::Partial
        };

        let error = match status {
            ResultStatus::Timeout => Some("agent timed out".to_string()),
            _ => None,
        };

        Ok(WriteResult {
            job_id: job.id,
            status,
            output: ResultOutput {
                stdout: Some(run.stdout),
                stderr: Some(run.stderr),
                exit_code: Some(run.exit_code),
                timed_out: Some(run.timed_out),
                has_changes,
                extra: Default::default(),
            },
            pr_url,
            commit_sha,
            branch_name,
            duration_ms: None,
            worker_id: None,
            error,
            error_details: None,
        })
    }

    /// Copies operator-provided skills and domain knowledge into the workspace
    async fn provision(&self, workspace: &Path) -> Result<()> {
        if let Some(skills) = &self.settings.skills_dir {
            self.workspace
                .copy_skills(workspace, skills)
                .await
                .context("Failed to copy skills")?;
        }

        if let Some(knowledge) = &self.settings.domain_knowledge_path {
            self.workspace
                .copy_domain_knowledge(workspace, knowledge)
                .await
                .context("Failed to copy domain knowledge")?;
        }

        Ok(())
    }

    /// Writes a result, retrying transient store failures with backoff
    async fn persist(&self, params: WriteResult) -> Result<JobResult> {
        let mut delay = self.write_backoff;
        let mut attempt = 1;

        loop {
            match self.queue.write_result(params.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() && attempt < RESULT_WRITE_ATTEMPTS => {
                    warn!(
                        "Failed to write result for job {} (attempt {}/{}): {}",
                        params.job_id, attempt, RESULT_WRITE_ATTEMPTS, e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!(
                            "Failed to write result for job {} after {} attempt(s)",
                            params.job_id, attempt
                        )
                    });
                }
            }
        }
    }
}

/// First `max` characters of `text`, with an ellipsis when cut
fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
