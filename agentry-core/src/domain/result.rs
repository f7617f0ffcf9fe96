//! Job result domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::JobStatus;

/// One recorded outcome of processing a job
///
/// Results are append-only; a job accumulates one per processing attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub id: Uuid,
    pub job_id: Uuid,
    pub status: ResultStatus,
    pub output: ResultOutput,
    pub pr_url: Option<String>,
    pub commit_sha: Option<String>,
    pub branch_name: Option<String>,
    pub duration_ms: Option<i64>,
    pub worker_id: Option<String>,
    pub error: Option<String>,
    pub error_details: Option<ErrorDetails>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Outcome classification of one processing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    /// Agent exited 0
    Success,
    /// The pipeline failed before the agent could finish
    Error,
    /// Agent ran to completion with a non-zero exit code
    Partial,
    /// Agent was killed after exceeding its timeout
    Timeout,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Error => "error",
            ResultStatus::Partial => "partial",
            ResultStatus::Timeout => "timeout",
        }
    }

    /// Status the owning job moves to once this result is recorded
    pub fn job_status(&self) -> JobStatus {
        match self {
            ResultStatus::Success => JobStatus::Completed,
            _ => JobStatus::Failed,
        }
    }
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResultStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ResultStatus::Success),
            "error" => Ok(ResultStatus::Error),
            "partial" => Ok(ResultStatus::Partial),
            "timeout" => Ok(ResultStatus::Timeout),
            other => Err(format!("unknown result status '{}'", other)),
        }
    }
}

/// Captured agent output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<bool>,
    /// Whether the cloned repository had uncommitted changes afterwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_changes: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResultOutput {
    pub fn is_empty(&self) -> bool {
        *self == ResultOutput::default()
    }
}

/// Structured failure detail attached to `error` results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Full error chain, outermost first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_success_completes_the_job() {
        assert_eq!(ResultStatus::Success.job_status(), JobStatus::Completed);
        assert_eq!(ResultStatus::Error.job_status(), JobStatus::Failed);
        assert_eq!(ResultStatus::Partial.job_status(), JobStatus::Failed);
        assert_eq!(ResultStatus::Timeout.job_status(), JobStatus::Failed);
    }

    #[test]
    fn test_empty_output_serializes_to_empty_object() {
        let output = ResultOutput::default();
        assert!(output.is_empty());
        assert_eq!(serde_json::to_value(&output).unwrap(), serde_json::json!({}));
    }

    #[test]
    fn test_output_preserves_extension_fields() {
        let output: ResultOutput = serde_json::from_value(serde_json::json!({
            "stdout": "done",
            "exit_code": 0,
            "tokens": 1200
        }))
        .unwrap();

        assert_eq!(output.stdout.as_deref(), Some("done"));
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.extra.get("tokens"), Some(&serde_json::json!(1200)));
        assert!(!output.is_empty());
    }
}
