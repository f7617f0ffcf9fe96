//! Workspace management
//!
//! Handles the per-job directory tree:
//! - Creating `<base>/<job_id>` with its reserved `.claude` directory
//! - Cloning the job's repository into `<workspace>/repo`
//! - Reading back commit, branch and dirty state after the agent ran
//! - Provisioning skills and domain knowledge
//! - Removing the tree once the result is recorded

use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Subdirectory the repository is cloned into
pub const REPO_DIR: &str = "repo";

/// Reserved directory for agent project configuration
pub const AGENT_CONFIG_DIR: &str = ".claude";

/// Host-key checking is disabled for clones. Remotes are assumed to sit on a
/// trusted network; anything else is exposed to man-in-the-middle attacks.
const GIT_SSH_COMMAND: &str = "ssh -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run git: {0}")]
    GitUnavailable(#[source] std::io::Error),

    #[error("git clone of {url} (branch {branch}) failed with exit code {exit_code}: {stderr}")]
    CloneFailed {
        url: String,
        branch: String,
        exit_code: i32,
        stderr: String,
    },
}

impl WorkspaceError {
    fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        WorkspaceError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;

/// Creates, inspects and removes job workspaces under one base directory
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base: PathBuf,
    agent_variant: String,
}

impl WorkspaceManager {
    /// Creates a new workspace manager
    ///
    /// # Arguments
    /// * `base` - Directory under which every job gets its own workspace
    /// * `agent_variant` - Agent name, used to locate its skills directory
    pub fn new(base: impl Into<PathBuf>, agent_variant: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            agent_variant: agent_variant.into(),
        }
    }

    /// Workspace path for a job; stable for a given id
    pub fn path_for(&self, job_id: Uuid) -> PathBuf {
        self.base.join(job_id.to_string())
    }

    /// Creates the workspace for a job
    ///
    /// Idempotent: an existing workspace is reused.
    pub async fn setup(&self, job_id: Uuid) -> Result<PathBuf> {
        let root = self.path_for(job_id);

        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| WorkspaceError::io("create workspace", &root, e))?;

        let config_dir = root.join(AGENT_CONFIG_DIR);
        tokio::fs::create_dir_all(&config_dir)
            .await
            .map_err(|e| WorkspaceError::io("create agent config directory", &config_dir, e))?;

        debug!("Created workspace: {}", root.display());
        Ok(root)
    }

    /// Shallow, single-branch clone of `url` into `<root>/repo`
    pub async fn clone_repo(&self, root: &Path, url: &str, branch: &str) -> Result<()> {
        info!("Cloning {} (branch: {})", url, branch);

        let repo_dir = root.join(REPO_DIR);

        // A retried job may find the previous attempt's checkout
        match tokio::fs::remove_dir_all(&repo_dir).await {
            Ok(()) => warn!("Removed leftover checkout at {}", repo_dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(WorkspaceError::io("remove leftover checkout", &repo_dir, e)),
        }

        let output = Command::new("git")
            .arg("clone")
            .arg("--depth")
            .arg("1")
            .arg("--branch")
            .arg(branch)
            .arg(url)
            .arg(&repo_dir)
            .current_dir(root)
            .env("GIT_SSH_COMMAND", GIT_SSH_COMMAND)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(WorkspaceError::GitUnavailable)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(WorkspaceError::CloneFailed {
                url: url.to_string(),
                branch: branch.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        debug!("Cloned to {}", repo_dir.display());
        Ok(())
    }

    /// HEAD commit of the cloned repository, if there is one
    pub async fn latest_commit(&self, root: &Path) -> Option<String> {
        git_stdout(root, &["rev-parse", "HEAD"]).await
    }

    /// Checked-out branch of the cloned repository, if there is one
    pub async fn current_branch(&self, root: &Path) -> Option<String> {
        git_stdout(root, &["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    /// Whether the cloned repository has uncommitted modifications
    ///
    /// False when there is no repository or git fails.
    pub async fn has_changes(&self, root: &Path) -> bool {
        match git_output(root, &["status", "--porcelain"]).await {
            Some(stdout) => !stdout.trim().is_empty(),
            None => false,
        }
    }

    /// Removes the workspace tree
    ///
    /// Never fails: a missing tree is fine and any other error is only
    /// logged, since the job's result has already been recorded.
    pub async fn cleanup(&self, root: &Path) {
        match tokio::fs::remove_dir_all(root).await {
            Ok(()) => debug!("Cleaned up workspace: {}", root.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Workspace {} already gone", root.display());
            }
            Err(e) => warn!("Failed to cleanup {}: {}", root.display(), e),
        }
    }

    /// Copies every skill directory in `skills_dir` into the agent's
    /// per-workspace skills location
    pub async fn copy_skills(&self, root: &Path, skills_dir: &Path) -> Result<()> {
        let target = self.skills_target(root);
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| WorkspaceError::io("create skills directory", &target, e))?;

        let mut entries = tokio::fs::read_dir(skills_dir)
            .await
            .map_err(|e| WorkspaceError::io("read skills directory", skills_dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| WorkspaceError::io("read skills directory", skills_dir, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| WorkspaceError::io("inspect", &entry.path(), e))?;

            if file_type.is_dir() {
                copy_dir(&entry.path(), &target.join(entry.file_name())).await?;
            }
        }

        debug!("Copied skills from {} to {}", skills_dir.display(), target.display());
        Ok(())
    }

    /// Copies a domain knowledge file to `<root>/repo/.claude/CLAUDE.md`
    pub async fn copy_domain_knowledge(&self, root: &Path, knowledge: &Path) -> Result<()> {
        let target_dir = root.join(REPO_DIR).join(AGENT_CONFIG_DIR);
        tokio::fs::create_dir_all(&target_dir)
            .await
            .map_err(|e| WorkspaceError::io("create", &target_dir, e))?;

        let target = target_dir.join("CLAUDE.md");
        tokio::fs::copy(knowledge, &target)
            .await
            .map_err(|e| WorkspaceError::io("copy domain knowledge from", knowledge, e))?;

        debug!("Copied CLAUDE.md to {}", target.display());
        Ok(())
    }

    fn skills_target(&self, root: &Path) -> PathBuf {
        root.join(".cc-mirror")
            .join(&self.agent_variant)
            .join("config")
            .join("skills")
    }
}

/// Recursively copies `src` into `dest`, overwriting existing files
async fn copy_dir(src: &Path, dest: &Path) -> Result<()> {
    // Iterative walk; async recursion would need boxing
    let mut pending = vec![(src.to_path_buf(), dest.to_path_buf())];

    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir_all(&to)
            .await
            .map_err(|e| WorkspaceError::io("create", &to, e))?;

        let mut entries = tokio::fs::read_dir(&from)
            .await
            .map_err(|e| WorkspaceError::io("read", &from, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| WorkspaceError::io("read", &from, e))?
        {
            let src_path = entry.path();
            let dest_path = to.join(entry.file_name());
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| WorkspaceError::io("inspect", &src_path, e))?;

            if file_type.is_dir() {
                pending.push((src_path, dest_path));
            } else {
                tokio::fs::copy(&src_path, &dest_path)
                    .await
                    .map_err(|e| WorkspaceError::io("copy", &src_path, e))?;
            }
        }
    }

    Ok(())
}

/// Runs git in `<root>/repo`, returning trimmed stdout when non-empty
async fn git_stdout(root: &Path, args: &[&str]) -> Option<String> {
    git_output(root, args)
        .await
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Runs git in `<root>/repo`, returning stdout on success
///
/// Failures are logged at debug level and reported as `None`.
async fn git_output(root: &Path, args: &[&str]) -> Option<String> {
    let repo_dir = root.join(REPO_DIR);
    if !repo_dir.is_dir() {
        return None;
    }

    let output = match Command::new("git")
        .args(args)
        .current_dir(&repo_dir)
        .stdin(Stdio::null())
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            debug!("git {} failed to start: {}", args.join(" "), e);
            return None;
        }
    };

    if !output.status.success() {
        debug!(
            "git {} exited with {:?}: {}",
            args.join(" "),
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return None;
    }

    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}
