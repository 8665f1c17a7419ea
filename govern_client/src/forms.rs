//! Editor state for creating or updating one record.

use std::collections::BTreeMap;

use crate::api::Repository;
use crate::error::{ApiError, ValidationError};
use crate::models::{Resource, Validate};

#[derive(Debug)]
pub enum SubmitOutcome<R> {
    Saved(R),
    /// Validation failed; nothing was sent.
    Invalid,
    /// The server rejected the request; see [`FormState::message`].
    Rejected,
}

pub struct FormState<R: Resource> {
    pub draft: R::Draft,
    editing: Option<String>,
    field_errors: BTreeMap<String, String>,
    message: Option<String>,
}

impl<R: Resource> FormState<R> {
    pub fn create(draft: R::Draft) -> Self {
        Self {
            draft,
            editing: None,
            field_errors: BTreeMap::new(),
            message: None,
        }
    }

    pub fn edit(id: impl Into<String>, draft: R::Draft) -> Self {
        Self {
            editing: Some(id.into()),
            ..Self::create(draft)
        }
    }

    pub fn is_editing(&self) -> bool {
        self.editing.is_some()
    }

    pub fn field_error(&self, field: &str) -> Option<&str> {
        self.field_errors.get(field).map(String::as_str)
    }

    pub fn field_errors(&self) -> impl Iterator<Item = (&str, &str)> {
        self.field_errors.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Runs the draft's checks and records one message per failing field.
    pub fn validate(&mut self) -> bool {
        let errors: Vec<ValidationError> = self.draft.validate();
        self.field_errors.clear();
        for err in errors {
            self.field_errors.entry(err.field).or_insert(err.message);
        }
        self.field_errors.is_empty()
    }

    pub async fn submit(&mut self, repo: &dyn Repository<R>) -> SubmitOutcome<R> {
        self.message = None;
        if !self.validate() {
            return SubmitOutcome::Invalid;
        }

        let result: Result<R, ApiError> = match &self.editing {
            Some(id) => repo.update(id, &self.draft).await,
            None => repo.create(&self.draft).await,
        };

        match result {
            Ok(saved) => {
                self.editing = Some(saved.id());
                SubmitOutcome::Saved(saved)
            }
            Err(err) => {
                tracing::warn!("saving {} failed: {}", R::FEATURE, err);
                self.message = Some(err.user_message());
                SubmitOutcome::Rejected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Risk, RiskDraft, Severity};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeRisks {
        calls: AtomicUsize,
        reject: bool,
    }

    fn saved(id: &str, draft: &RiskDraft) -> Risk {
        Risk {
            id: id.to_string(),
            name: draft.name.clone(),
            description: draft.description.clone(),
            severity: draft.severity,
            owner: draft.owner.clone(),
            mitigation_status: None,
        }
    }

    #[async_trait]
    impl Repository<Risk> for FakeRisks {
        async fn list(&self) -> Result<Vec<Risk>, ApiError> {
            Ok(vec![])
        }

        async fn get(&self, _id: &str) -> Result<Risk, ApiError> {
            Err(ApiError::Http {
                status: 404,
                message: "Risk not found".into(),
            })
        }

        async fn create(&self, draft: &RiskDraft) -> Result<Risk, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                return Err(ApiError::Http {
                    status: 422,
                    message: "Risk name already exists".into(),
                });
            }
            Ok(saved("31", draft))
        }

        async fn update(&self, id: &str, draft: &RiskDraft) -> Result<Risk, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(saved(id, draft))
        }

        async fn delete(&self, _id: &str) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn draft(name: &str) -> RiskDraft {
        RiskDraft {
            name: name.to_string(),
            description: "Outputs differ across groups".to_string(),
            severity: Severity::Major,
            owner: None,
        }
    }

    #[tokio::test]
    async fn invalid_draft_is_not_sent() {
        let repo = FakeRisks::default();
        let mut form = FormState::<Risk>::create(draft(""));
        assert!(matches!(form.submit(&repo).await, SubmitOutcome::Invalid));
        assert_eq!(form.field_error("name"), Some("is required"));
        assert_eq!(repo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn new_record_is_created_then_edited() {
        let repo = FakeRisks::default();
        let mut form = FormState::<Risk>::create(draft("Gender bias"));
        match form.submit(&repo).await {
            SubmitOutcome::Saved(risk) => assert_eq!(risk.id, "31"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(form.is_editing());

        form.draft.name = "Gender bias in screening".into();
        match form.submit(&repo).await {
            SubmitOutcome::Saved(risk) => assert_eq!(risk.name, "Gender bias in screening"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(repo.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn server_rejection_becomes_a_message() {
        let repo = FakeRisks {
            reject: true,
            ..FakeRisks::default()
        };
        let mut form = FormState::<Risk>::create(draft("Gender bias"));
        assert!(matches!(form.submit(&repo).await, SubmitOutcome::Rejected));
        assert_eq!(form.message(), Some("Risk name already exists"));
        assert!(!form.is_editing());
    }
}
