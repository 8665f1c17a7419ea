//! Typed records for the governance entities exposed by the REST API.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::JobStatus;

/// A REST collection the repository layer can list, fetch, create, update and delete.
pub trait Resource: DeserializeOwned + Serialize + Clone + Send + Sync + 'static {
    /// Collection path relative to the API base url.
    const PATH: &'static str;
    /// Feature name used for storage keys and export file names.
    const FEATURE: &'static str;

    type Draft: Serialize + Validate + Clone + Send + Sync;

    fn id(&self) -> String;
}

pub trait Validate {
    /// Returns every failing field; empty means the draft may be submitted.
    fn validate(&self) -> Vec<ValidationError>;
}

fn require(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(ValidationError::required(field));
    }
}

/// Ids come over the wire as numbers or strings; both end up as strings.
mod flexible_id {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
        Ok(match Raw::deserialize(de)? {
            Raw::Text(s) => s,
            Raw::Number(n) => n.to_string(),
        })
    }

    pub fn serialize<S: Serializer>(id: &str, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Draft,
    UnderReview,
    Approved,
    Published,
    Archived,
    Deprecated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    #[serde(with = "flexible_id")]
    pub id: String,
    pub title: String,
    pub status: PolicyStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub next_review_date: Option<NaiveDate>,
    #[serde(default)]
    pub last_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDraft {
    pub title: String,
    pub status: PolicyStatus,
    pub content_html: String,
    pub tags: Vec<String>,
    pub next_review_date: Option<NaiveDate>,
}

impl Validate for PolicyDraft {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        require(&mut errors, "title", &self.title);
        if self.title.chars().count() > 64 {
            errors.push(ValidationError::new("title", "must be at most 64 characters"));
        }
        errors
    }
}

impl Resource for Policy {
    const PATH: &'static str = "policies";
    const FEATURE: &'static str = "policy";
    type Draft = PolicyDraft;

    fn id(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Negligible,
    Minor,
    Moderate,
    Major,
    Catastrophic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Risk {
    #[serde(with = "flexible_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub mitigation_status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDraft {
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub owner: Option<String>,
}

impl Validate for RiskDraft {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        require(&mut errors, "name", &self.name);
        require(&mut errors, "description", &self.description);
        errors
    }
}

impl Resource for Risk {
    const PATH: &'static str = "risks";
    const FEATURE: &'static str = "risk";
    type Draft = RiskDraft;

    fn id(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Completed,
    Overdue,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(with = "flexible_id")]
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub priority: Priority,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub assignees: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub assignees: Vec<String>,
}

impl Validate for TaskDraft {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        require(&mut errors, "title", &self.title);
        errors
    }
}

impl Resource for Task {
    const PATH: &'static str = "tasks";
    const FEATURE: &'static str = "task";
    type Draft = TaskDraft;

    fn id(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceTracker {
    #[serde(with = "flexible_id")]
    pub id: String,
    pub framework: String,
    pub project: String,
    #[serde(default)]
    pub completed_controls: u32,
    #[serde(default)]
    pub total_controls: u32,
}

impl ComplianceTracker {
    /// Completion as a whole percentage; an empty tracker counts as 0%.
    pub fn progress_percent(&self) -> u32 {
        if self.total_controls == 0 {
            return 0;
        }
        (self.completed_controls.min(self.total_controls) * 100) / self.total_controls
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceTrackerDraft {
    pub framework: String,
    pub project: String,
}

impl Validate for ComplianceTrackerDraft {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        require(&mut errors, "framework", &self.framework);
        require(&mut errors, "project", &self.project);
        errors
    }
}

impl Resource for ComplianceTracker {
    const PATH: &'static str = "compliance-trackers";
    const FEATURE: &'static str = "compliance";
    type Draft = ComplianceTrackerDraft;

    fn id(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    #[serde(with = "flexible_id")]
    pub id: String,
    pub event_type: String,
    pub description: String,
    #[serde(default)]
    pub user: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogDraft {
    pub event_type: String,
    pub description: String,
}

impl Validate for EventLogDraft {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        require(&mut errors, "event_type", &self.event_type);
        require(&mut errors, "description", &self.description);
        errors
    }
}

impl Resource for EventLog {
    const PATH: &'static str = "logger/events";
    const FEATURE: &'static str = "event_log";
    type Draft = EventLogDraft;

    fn id(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiasAudit {
    #[serde(with = "flexible_id")]
    pub id: String,
    pub dataset_name: String,
    pub status: JobStatus,
    #[serde(default)]
    pub protected_attributes: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiasAuditDraft {
    pub dataset_name: String,
    pub target_column: String,
    pub protected_attributes: Vec<String>,
}

impl Validate for BiasAuditDraft {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        require(&mut errors, "dataset_name", &self.dataset_name);
        require(&mut errors, "target_column", &self.target_column);
        if self.protected_attributes.is_empty() {
            errors.push(ValidationError::new(
                "protected_attributes",
                "select at least one attribute",
            ));
        }
        errors
    }
}

impl Resource for BiasAudit {
    const PATH: &'static str = "bias-audits";
    const FEATURE: &'static str = "bias_audit";
    type Draft = BiasAuditDraft;

    fn id(&self) -> String {
        self.id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_ids_are_read_as_strings() {
        let risk: Risk = serde_json::from_value(json!({
            "id": 12,
            "name": "Model drift",
            "severity": "major"
        }))
        .unwrap();
        assert_eq!(risk.id(), "12");
        assert_eq!(risk.description, "");
    }

    #[test]
    fn bias_audit_draft_reports_every_missing_field() {
        let draft = BiasAuditDraft {
            dataset_name: " ".into(),
            target_column: String::new(),
            protected_attributes: vec![],
        };
        let fields: Vec<_> = draft.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["dataset_name", "target_column", "protected_attributes"]
        );
    }

    #[test]
    fn tracker_progress_is_clamped() {
        let tracker = ComplianceTracker {
            id: "1".into(),
            framework: "ISO 42001".into(),
            project: "Chatbot".into(),
            completed_controls: 12,
            total_controls: 10,
        };
        assert_eq!(tracker.progress_percent(), 100);
        let empty = ComplianceTracker {
            total_controls: 0,
            ..tracker
        };
        assert_eq!(empty.progress_percent(), 0);
    }
}
