//! Agent runner
//!
//! Drives the external coding-agent binary for one job:
//! - Builds its environment from job metadata and config
//! - Runs it non-interactively in the job workspace with a hard timeout
//! - Captures stdout and stderr, including output produced before a kill
//!
//! Every way the process can end maps to an [`AgentOutcome`] variant; only
//! failures outside that set surface as [`AgentError`].

use agentry_core::domain::job::JobConfig;
use agentry_core::domain::metadata::MetadataValue;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Exit code reported for runs killed by the timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Per-stream capture limit; output beyond it is read and discarded
const MAX_CAPTURE_BYTES: usize = 16 * 1024 * 1024;

/// How long to wait for pipes to drain once the process is gone
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Friendly model tiers and the concrete ids they resolve to
const MODEL_IDS: &[(&str, &str)] = &[
    ("haiku", "claude-3-5-haiku-latest"),
    ("sonnet", "claude-sonnet-4-20250514"),
    ("opus", "claude-opus-4-5-20251101"),
];

/// Failures the runner cannot express as an outcome
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent {0} pipe was not captured")]
    MissingPipe(&'static str),

    #[error("failed waiting for agent process: {0}")]
    Wait(#[source] std::io::Error),
}

/// How an agent invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    /// Process exited on its own, with any exit code
    Clean {
        stdout: String,
        stderr: String,
        exit_code: i32,
    },
    /// Process was killed after exceeding its timeout
    TimedOut { stdout: String, stderr: String },
    /// Process could not be started
    SpawnFailed { message: String },
}

/// Normalized view of an outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRun {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl AgentOutcome {
    pub fn into_run(self) -> AgentRun {
        match self {
            AgentOutcome::Clean {
                stdout,
                stderr,
                exit_code,
            } => AgentRun {
                stdout,
                stderr,
                exit_code,
                timed_out: false,
            },
            AgentOutcome::TimedOut { stdout, stderr } => AgentRun {
                stdout,
                stderr,
                exit_code: TIMEOUT_EXIT_CODE,
                timed_out: true,
            },
            AgentOutcome::SpawnFailed { message } => AgentRun {
                stdout: String::new(),
                stderr: message,
                exit_code: 1,
                timed_out: false,
            },
        }
    }
}

/// Service trait for running the coding agent
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Runs the agent against `workspace` with `prompt` as its task
    ///
    /// # Arguments
    /// * `workspace` - Working directory for the agent process
    /// * `prompt` - The task, passed as the sole non-interactive input
    /// * `config` - Per-job options (model tier, timeout override)
    /// * `metadata` - Values exported into the agent's environment
    async fn execute(
        &self,
        workspace: &Path,
        prompt: &str,
        config: &JobConfig,
        metadata: &BTreeMap<String, MetadataValue>,
    ) -> Result<AgentOutcome, AgentError>;
}

/// Runs the agent as `<binary> --print <prompt>`
pub struct CliAgentRunner {
    binary: String,
    default_timeout: Duration,
}

impl CliAgentRunner {
    pub fn new(binary: impl Into<String>, default_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            default_timeout,
        }
    }
}

#[async_trait]
impl AgentRunner for CliAgentRunner {
    async fn execute(
        &self,
        workspace: &Path,
        prompt: &str,
        config: &JobConfig,
        metadata: &BTreeMap<String, MetadataValue>,
    ) -> Result<AgentOutcome, AgentError> {
        let timeout = config.timeout().unwrap_or(self.default_timeout);
        let env = agent_env(config, metadata);

        info!("Executing {} (timeout: {:?})", self.binary, timeout);
        debug!("  Working directory: {}", workspace.display());
        debug!("  Prompt length: {} chars", prompt.len());
        if !metadata.is_empty() {
            let keys: Vec<&str> = env
                .iter()
                .take(metadata.len())
                .map(|(k, _)| k.as_str())
                .collect();
            debug!("  Metadata env vars: {}", keys.join(", "));
        }

        let mut command = Command::new(&self.binary);
        command
            .arg("--print")
            .arg(prompt)
            .current_dir(workspace)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", self.binary, e);
                return Ok(AgentOutcome::SpawnFailed {
                    message: format!("failed to start {}: {}", self.binary, e),
                });
            }
        };

        let stdout = capture(child.stdout.take().ok_or(AgentError::MissingPipe("stdout"))?);
        let stderr = capture(child.stderr.take().ok_or(AgentError::MissingPipe("stderr"))?);

        let waited = tokio::time::timeout(timeout, child.wait()).await;

        match waited {
            Ok(Ok(status)) => {
                let exit_code = status.code().unwrap_or(1);
                debug!("{} exited with code {}", self.binary, exit_code);
                Ok(AgentOutcome::Clean {
                    stdout: stdout.finish().await,
                    stderr: stderr.finish().await,
                    exit_code,
                })
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                Err(AgentError::Wait(e))
            }
            Err(_) => {
                warn!("{} timed out after {:?}", self.binary, timeout);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out agent: {}", e);
                }
                Ok(AgentOutcome::TimedOut {
                    stdout: stdout.finish().await,
                    stderr: stderr.finish().await,
                })
            }
        }
    }
}

/// Resolves a model tier name to a concrete model id
///
/// Unknown names are assumed to already be model ids and pass through.
pub fn resolve_model_id(model: &str) -> String {
    MODEL_IDS
        .iter()
        .find(|(tier, _)| *tier == model)
        .map(|(_, id)| id.to_string())
        .unwrap_or_else(|| model.to_string())
}

/// Converts a camelCase metadata key to an UPPER_SNAKE_CASE variable name
pub fn env_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
        }
        out.push(c);
    }
    let out = out.to_uppercase();
    match out.strip_prefix('_') {
        Some(rest) => rest.to_string(),
        None => out,
    }
}

/// Environment overrides for the agent process, in application order
///
/// Applied on top of the inherited environment; later entries win.
pub fn agent_env(
    config: &JobConfig,
    metadata: &BTreeMap<String, MetadataValue>,
) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = metadata
        .iter()
        .map(|(key, value)| (env_key(key), value.to_string()))
        .collect();

    env.push(("CC_MIRROR_SPLASH".to_string(), "0".to_string()));

    if let Some(model) = config.model.as_deref().filter(|m| !m.is_empty()) {
        env.push(("ANTHROPIC_DEFAULT_MODEL".to_string(), resolve_model_id(model)));
    }

    env
}

/// A stream being drained into a shared buffer
///
/// The buffer outlives the reader task so partial output survives a kill.
struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

fn capture<R>(mut reader: R) -> Capture
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buffer);

    let task = tokio::spawn(async move {
        let mut chunk = vec![0u8; 64 * 1024];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut out = sink.lock().unwrap_or_else(PoisonError::into_inner);
                    let room = MAX_CAPTURE_BYTES.saturating_sub(out.len());
                    out.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
    });

    Capture { buffer, task }
}

impl Capture {
    /// Waits briefly for the stream to close and returns what was read
    async fn finish(self) -> String {
        let Capture { buffer, mut task } = self;

        // Grandchildren can keep the pipe open after the agent is gone
        if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
            task.abort();
        }

        let bytes = std::mem::take(&mut *buffer.lock().unwrap_or_else(PoisonError::into_inner));
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
