//! Job domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::metadata::MetadataValue;

/// Branch checked out when a job names a repository but no branch
pub const DEFAULT_BRANCH: &str = "main";

/// A submitted coding task
///
/// Rows are created by the submission side of the service; workers only
/// claim them and record results against them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub org_id: Option<String>,
    pub user_id: Option<String>,
    pub status: JobStatus,
    pub prompt: String,
    pub repo_url: Option<String>,
    pub branch: Option<String>,
    pub config: JobConfig,
    pub metadata: BTreeMap<String, MetadataValue>,
    pub claimed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub claimed_by: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Job {
    /// Branch to clone, falling back to [`DEFAULT_BRANCH`]
    pub fn branch_or_default(&self) -> &str {
        self.branch
            .as_deref()
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_BRANCH)
    }

    /// Repository URL, if the job should run against a clone
    pub fn repository(&self) -> Option<&str> {
        self.repo_url.as_deref().filter(|url| !url.trim().is_empty())
    }
}

/// Job lifecycle status
///
/// `Pending -> Processing -> {Completed | Failed}`. Only stale-lease recovery
/// may move a job back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Per-job execution options
///
/// Unknown keys are kept in `extra` so rows written by newer submitters
/// survive a round trip through older workers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Model tier (`haiku`, `sonnet`, `opus`) or a concrete model id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Overrides the worker's default agent timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_overrides: Option<serde_json::Map<String, serde_json::Value>>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JobConfig {
    /// Timeout override, ignoring values that are not a usable duration
    pub fn timeout(&self) -> Option<std::time::Duration> {
        self.timeout_minutes
            .filter(|m| *m > 0.0)
            .and_then(|m| std::time::Duration::try_from_secs_f64(m * 60.0).ok())
    }
}
