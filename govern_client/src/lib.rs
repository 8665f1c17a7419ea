pub mod api;
pub mod classify;
pub mod collection;
pub mod config;
pub mod error;
pub mod export;
pub mod forms;
pub mod logging;
pub mod models;
pub mod poll;
pub mod questionnaire;
pub mod render;
pub mod storage;
pub mod utils;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque job identifier. The API sends either strings or integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawJobId", into = "String")]
pub struct JobId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawJobId {
    Text(String),
    Number(i64),
}

impl From<RawJobId> for JobId {
    fn from(raw: RawJobId) -> Self {
        match raw {
            RawJobId::Text(s) => JobId(s),
            RawJobId::Number(n) => JobId(n.to_string()),
        }
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        JobId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Families of long-running backend jobs the client can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    BiasAudit,
    ArenaComparison,
    RiskAnalysis,
}

impl JobKind {
    pub fn collection_path(&self) -> &'static str {
        match self {
            JobKind::BiasAudit => "bias-audits",
            JobKind::ArenaComparison => "llm-arena/comparisons",
            JobKind::RiskAnalysis => "risk-analysis",
        }
    }

    pub fn status_path(&self, id: &JobId) -> String {
        format!("{}/{}/status", self.collection_path(), id)
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobKind::BiasAudit => "bias audit",
            JobKind::ArenaComparison => "arena comparison",
            JobKind::RiskAnalysis => "risk analysis",
        }
    }
}

/// A job as identified across the client: the same id may exist under two kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobRef {
    pub kind: JobKind,
    pub id: JobId,
}

impl JobRef {
    pub fn new(kind: JobKind, id: JobId) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.label(), self.id)
    }
}

/// Status of a remote job. Only the service moves a job between states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Unknown(String),
}

impl From<String> for JobStatus {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => JobStatus::Pending,
            "running" | "in_progress" | "processing" => JobStatus::Running,
            "completed" | "done" | "success" | "succeeded" => JobStatus::Completed,
            "failed" | "error" => JobStatus::Failed,
            _ => JobStatus::Unknown(raw),
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Unknown(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Job {
    pub id: JobId,
    #[serde(default)]
    pub kind: Option<JobKind>,
    pub status: JobStatus,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, status: JobStatus) -> Self {
        Self {
            id,
            kind: None,
            status,
            result: None,
            error: None,
            created_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_id_accepts_strings_and_numbers() {
        let job: Job = serde_json::from_value(json!({"id": 42, "status": "pending"})).unwrap();
        assert_eq!(job.id, JobId::new("42"));
        let job: Job = serde_json::from_value(json!({"id": "a-1", "status": "running"})).unwrap();
        assert_eq!(job.id.as_str(), "a-1");
    }

    #[test]
    fn status_aliases_normalise() {
        assert_eq!(JobStatus::from("done".to_string()), JobStatus::Completed);
        assert_eq!(JobStatus::from("IN_PROGRESS".to_string()), JobStatus::Running);
        assert_eq!(JobStatus::from("queued".to_string()), JobStatus::Pending);
        assert_eq!(JobStatus::from("error".to_string()), JobStatus::Failed);
        assert_eq!(
            JobStatus::from("paused".to_string()),
            JobStatus::Unknown("paused".to_string())
        );
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Unknown("paused".into()).is_terminal());
    }

    #[test]
    fn status_path_includes_kind_and_id() {
        let id = JobId::new("7");
        assert_eq!(JobKind::BiasAudit.status_path(&id), "bias-audits/7/status");
        assert_eq!(
            JobKind::ArenaComparison.status_path(&id),
            "llm-arena/comparisons/7/status"
        );
    }
}
