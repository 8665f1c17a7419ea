//! Conditionally branching questionnaires with resumable progress.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::classify::{classify_risk, RiskLevel};
use crate::error::{StorageError, ValidationError};
use crate::storage::{KeyValueStore, StorageKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Single(String),
    Multiple(Vec<String>),
}

impl Answer {
    pub fn single(value: impl Into<String>) -> Self {
        Answer::Single(value.into())
    }

    pub fn multiple<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Answer::Multiple(values.into_iter().map(Into::into).collect())
    }

    /// True if the answer is `value` or a list containing it.
    pub fn includes(&self, value: &str) -> bool {
        match self {
            Answer::Single(v) => v == value,
            Answer::Multiple(vs) => vs.iter().any(|v| v == value),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Answer::Single(v) => v.trim().is_empty(),
            Answer::Multiple(vs) => vs.is_empty(),
        }
    }

    fn values(&self) -> Vec<&str> {
        match self {
            Answer::Single(v) => vec![v.as_str()],
            Answer::Multiple(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Answers(BTreeMap<String, Answer>);

impl Answers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, question: &str) -> Option<&Answer> {
        self.0.get(question)
    }

    /// The single-choice value of `question`, if any.
    pub fn value(&self, question: &str) -> Option<&str> {
        match self.0.get(question) {
            Some(Answer::Single(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn includes(&self, question: &str, value: &str) -> bool {
        self.0.get(question).is_some_and(|a| a.includes(value))
    }

    pub fn set(&mut self, question: impl Into<String>, answer: Answer) {
        self.0.insert(question.into(), answer);
    }

    pub fn with(mut self, question: &str, answer: Answer) -> Self {
        self.set(question, answer);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.0.retain(|k, _| keep(k.as_str()));
    }
}

/// Visibility predicate over earlier answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Equals { question: &'static str, value: &'static str },
    Includes { question: &'static str, value: &'static str },
    AnyOf { question: &'static str, values: &'static [&'static str] },
    Not(Box<Condition>),
    All(Vec<Condition>),
}

impl Condition {
    pub fn holds(&self, answers: &Answers) -> bool {
        match self {
            Condition::Equals { question, value } => answers.value(question) == Some(*value),
            Condition::Includes { question, value } => answers.includes(question, value),
            Condition::AnyOf { question, values } => values.iter().any(|v| answers.includes(question, v)),
            Condition::Not(inner) => !inner.holds(answers),
            Condition::All(all) => all.iter().all(|c| c.holds(answers)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    SingleChoice,
    MultiChoice,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub value: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone)]
pub struct Question {
    pub id: &'static str,
    pub prompt: &'static str,
    pub kind: QuestionKind,
    pub options: Vec<Choice>,
    pub show_if: Option<Condition>,
    pub required: bool,
}

impl Question {
    pub fn is_visible(&self, answers: &Answers) -> bool {
        self.show_if.as_ref().map_or(true, |c| c.holds(answers))
    }

    pub fn validate(&self, answer: Option<&Answer>) -> Result<(), ValidationError> {
        let answer = match answer {
            Some(a) if !a.is_empty() => a,
            _ if self.required => return Err(ValidationError::required(self.id)),
            _ => return Ok(()),
        };

        match (self.kind, answer) {
            (QuestionKind::MultiChoice, Answer::Single(_)) => {
                return Err(ValidationError::new(self.id, "expects a list of choices"))
            }
            (QuestionKind::SingleChoice | QuestionKind::Text, Answer::Multiple(_)) => {
                return Err(ValidationError::new(self.id, "expects a single answer"))
            }
            _ => {}
        }

        if self.kind != QuestionKind::Text {
            if let Some(bad) = answer
                .values()
                .into_iter()
                .find(|v| !self.options.iter().any(|o| o.value == *v))
            {
                return Err(ValidationError::new(self.id, format!("unknown choice {:?}", bad)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Questionnaire {
    pub id: &'static str,
    pub questions: Vec<Question>,
}

impl Questionnaire {
    pub fn question(&self, id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.questions.iter().position(|q| q.id == id)
    }

    /// Questions shown for `answers`, in questionnaire order.
    pub fn visible<'q>(&'q self, answers: &Answers) -> Vec<&'q Question> {
        self.questions.iter().filter(|q| q.is_visible(answers)).collect()
    }

    pub fn first(&self, answers: &Answers) -> Option<&'static str> {
        self.visible(answers).first().map(|q| q.id)
    }

    pub fn last(&self, answers: &Answers) -> Option<&'static str> {
        self.visible(answers).last().map(|q| q.id)
    }

    /// Next visible question after `current`. Visibility is recomputed on every call.
    pub fn next(&self, current: &str, answers: &Answers) -> Option<&'static str> {
        let pos = self.position(current)?;
        self.questions[pos + 1..]
            .iter()
            .find(|q| q.is_visible(answers))
            .map(|q| q.id)
    }

    pub fn previous(&self, current: &str, answers: &Answers) -> Option<&'static str> {
        let pos = self.position(current)?;
        self.questions[..pos]
            .iter()
            .rev()
            .find(|q| q.is_visible(answers))
            .map(|q| q.id)
    }

    pub fn is_last(&self, current: &str, answers: &Answers) -> bool {
        self.position(current).is_some() && self.next(current, answers).is_none()
    }

    /// Drops answers to questions that are hidden under the current answers.
    pub fn prune_hidden(&self, answers: &Answers) -> Answers {
        let visible: Vec<&str> = self.visible(answers).iter().map(|q| q.id).collect();
        let mut pruned = answers.clone();
        pruned.retain(|id| visible.contains(&id));
        pruned
    }
}

/// What is written to the store between sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub answers: Answers,
    pub current_question_id: String,
}

#[derive(Debug, Error)]
pub enum WizardError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("question {0:?} is not part of this questionnaire")]
    UnknownQuestion(String),

    #[error("already at the first question")]
    AtStart,

    #[error("this is the last question, submit instead")]
    AtEnd,

    #[error("answer every question before submitting")]
    NotFinished,
}

/// Walks one project through a questionnaire, mirroring progress into the store.
pub struct Wizard {
    questionnaire: Questionnaire,
    store: Arc<dyn KeyValueStore>,
    key: StorageKey,
    progress: Progress,
    resumed: bool,
}

impl Wizard {
    /// Loads saved progress for `project_id`, or starts at the first question.
    pub fn resume(
        questionnaire: Questionnaire,
        store: Arc<dyn KeyValueStore>,
        project_id: &str,
    ) -> Result<Self, WizardError> {
        let key = StorageKey::questionnaire(questionnaire.id, project_id);
        let saved: Option<Progress> = match store.get_json(&key) {
            Ok(saved) => saved,
            Err(StorageError::Json(err)) => {
                tracing::warn!("discarding unreadable saved progress for {}: {}", key, err);
                store.remove(&key)?;
                None
            }
            Err(err) => return Err(err.into()),
        };

        let (progress, resumed) = match saved {
            Some(p) if questionnaire.question(&p.current_question_id).is_some() => (p, true),
            Some(p) => {
                tracing::warn!(
                    "discarding saved progress for {}: unknown question {:?}",
                    key,
                    p.current_question_id
                );
                (Self::fresh(&questionnaire)?, false)
            }
            None => (Self::fresh(&questionnaire)?, false),
        };

        Ok(Self {
            questionnaire,
            store,
            key,
            progress,
            resumed,
        })
    }

    fn fresh(questionnaire: &Questionnaire) -> Result<Progress, WizardError> {
        let answers = Answers::new();
        let first = questionnaire
            .first(&answers)
            .ok_or_else(|| WizardError::UnknownQuestion(String::new()))?;
        Ok(Progress {
            answers,
            current_question_id: first.to_string(),
        })
    }

    pub fn key(&self) -> &StorageKey {
        &self.key
    }

    pub fn was_resumed(&self) -> bool {
        self.resumed
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn answers(&self) -> &Answers {
        &self.progress.answers
    }

    pub fn questionnaire(&self) -> &Questionnaire {
        &self.questionnaire
    }

    pub fn current(&self) -> Option<&Question> {
        self.questionnaire.question(&self.progress.current_question_id)
    }

    pub fn is_last(&self) -> bool {
        self.questionnaire
            .is_last(&self.progress.current_question_id, &self.progress.answers)
    }

    fn save(&self) -> Result<(), StorageError> {
        self.store.set_json(&self.key, &self.progress)
    }

    fn current_question(&self) -> Result<&Question, WizardError> {
        self.current()
            .ok_or_else(|| WizardError::UnknownQuestion(self.progress.current_question_id.clone()))
    }

    /// Records an answer for the current question.
    pub fn answer(&mut self, answer: Answer) -> Result<(), WizardError> {
        let question = self.current_question()?;
        question.validate(Some(&answer))?;
        let id = question.id;
        self.progress.answers.set(id, answer);
        self.save()?;
        Ok(())
    }

    pub fn next(&mut self) -> Result<&Question, WizardError> {
        let question = self.current_question()?;
        question.validate(self.progress.answers.get(question.id))?;
        let next = self
            .questionnaire
            .next(question.id, &self.progress.answers)
            .ok_or(WizardError::AtEnd)?;
        self.progress.current_question_id = next.to_string();
        self.save()?;
        self.current_question()
    }

    pub fn previous(&mut self) -> Result<&Question, WizardError> {
        let previous = self
            .questionnaire
            .previous(&self.progress.current_question_id, &self.progress.answers)
            .ok_or(WizardError::AtStart)?;
        self.progress.current_question_id = previous.to_string();
        self.save()?;
        self.current_question()
    }

    /// Clears answers in memory and in the store.
    pub fn restart(&mut self) -> Result<(), WizardError> {
        self.store.remove(&self.key)?;
        self.progress = Self::fresh(&self.questionnaire)?;
        self.resumed = false;
        Ok(())
    }

    /// Classifies the visible answers and clears saved progress.
    pub fn submit(&mut self) -> Result<Classification, WizardError> {
        if !self.is_last() {
            return Err(WizardError::NotFinished);
        }
        let answers = self.questionnaire.prune_hidden(&self.progress.answers);
        for question in self.questionnaire.visible(&answers) {
            question.validate(answers.get(question.id))?;
        }

        let level = classify_risk(&answers);
        self.store.remove(&self.key)?;
        tracing::info!("{} classified as {}", self.key, level);
        self.progress = Self::fresh(&self.questionnaire)?;
        Ok(Classification { level, answers })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub level: RiskLevel,
    pub answers: Answers,
}
