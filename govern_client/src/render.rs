//! Maps observed job state onto exactly one view, and renders views as text.

use serde_json::Value;

use crate::models::{PolicyStatus, Severity, TaskStatus};
use crate::poll::{Phase, PollState, Terminal};
use crate::JobStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum View<'a> {
    /// Nothing observed yet.
    Loading,
    Waiting { status: &'a JobStatus },
    Success { result: Option<&'a Value> },
    Failure { message: &'a str },
    Unknown { raw: &'a str },
}

/// Total over every `(status, result, error)` combination.
pub fn dispatch<'a>(
    status: Option<&'a JobStatus>,
    result: Option<&'a Value>,
    error: Option<&'a str>,
) -> View<'a> {
    let Some(status) = status else {
        return View::Loading;
    };
    match status {
        JobStatus::Pending | JobStatus::Running => View::Waiting { status },
        JobStatus::Completed => View::Success { result },
        JobStatus::Failed => View::Failure {
            message: error.unwrap_or("Job failed"),
        },
        JobStatus::Unknown(raw) => View::Unknown { raw },
    }
}

pub fn view_for(state: &PollState) -> View<'_> {
    match &state.phase {
        Phase::Idle | Phase::Loading => View::Loading,
        Phase::Polling { status } => dispatch(Some(status), None, None),
        Phase::Terminal(Terminal::Completed { result }) => View::Success {
            result: result.as_ref(),
        },
        Phase::Terminal(Terminal::Failed { error }) | Phase::Terminal(Terminal::GaveUp { error }) => {
            View::Failure { message: error }
        }
        Phase::Terminal(Terminal::NotFound) => View::Failure {
            message: "Job not found. It may have been deleted.",
        },
        Phase::Cancelled => View::Unknown { raw: "cancelled" },
    }
}

pub fn render_text(view: &View<'_>) -> String {
    match view {
        View::Loading => "Loading...".to_string(),
        View::Waiting { status } => format!("Job is {}, waiting for results...", status),
        View::Success { result: None } => "Completed.".to_string(),
        View::Success { result: Some(result) } => format!("Completed.\n{}", summarize(result)),
        View::Failure { message } => format!("Failed: {}", message),
        View::Unknown { raw } => format!("Unknown state: {}", raw),
    }
}

/// Key/value lines for objects, a table for arrays of objects, JSON otherwise.
pub fn summarize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let width = map.keys().map(|k| k.len()).max().unwrap_or(0);
            map.iter()
                .map(|(k, v)| format!("{:width$}  {}", k, scalar(v), width = width))
                .collect::<Vec<_>>()
                .join("\n")
        }
        Value::Array(rows) if !rows.is_empty() && rows.iter().all(Value::is_object) => table(rows),
        other => scalar(other),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

fn table(rows: &[Value]) -> String {
    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        if let Value::Object(map) = row {
            for key in map.keys() {
                if !columns.contains(&key.as_str()) {
                    columns.push(key);
                }
            }
        }
    }

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(*c).map(scalar).unwrap_or_else(|| "-".to_string()))
                .collect()
        })
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| cells.iter().map(|r| r[i].len()).chain([c.len()]).max().unwrap_or(0))
        .collect();

    let line = |values: Vec<&str>| {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:w$}", v, w = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![line(columns.clone())];
    out.extend(cells.iter().map(|r| line(r.iter().map(String::as_str).collect())));
    out.join("\n")
}

/// Status chip palette shared by every feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Neutral,
    Info,
    Success,
    Warning,
    Danger,
}

impl Tone {
    pub fn ansi(&self) -> &'static str {
        match self {
            Tone::Neutral => "\x1b[37m",
            Tone::Info => "\x1b[34m",
            Tone::Success => "\x1b[32m",
            Tone::Warning => "\x1b[33m",
            Tone::Danger => "\x1b[31m",
        }
    }
}

pub fn chip(label: &str, tone: Tone) -> String {
    format!("{}{}\x1b[0m", tone.ansi(), label)
}

pub fn job_tone(status: &JobStatus) -> Tone {
    match status {
        JobStatus::Pending => Tone::Neutral,
        JobStatus::Running => Tone::Info,
        JobStatus::Completed => Tone::Success,
        JobStatus::Failed => Tone::Danger,
        JobStatus::Unknown(_) => Tone::Warning,
    }
}

pub fn task_tone(status: TaskStatus) -> Tone {
    match status {
        TaskStatus::Open => Tone::Neutral,
        TaskStatus::InProgress => Tone::Info,
        TaskStatus::Completed => Tone::Success,
        TaskStatus::Overdue => Tone::Danger,
        TaskStatus::Deleted => Tone::Neutral,
    }
}

pub fn policy_tone(status: PolicyStatus) -> Tone {
    match status {
        PolicyStatus::Draft => Tone::Neutral,
        PolicyStatus::UnderReview => Tone::Warning,
        PolicyStatus::Approved | PolicyStatus::Published => Tone::Success,
        PolicyStatus::Archived | PolicyStatus::Deprecated => Tone::Neutral,
    }
}

pub fn severity_tone(severity: Severity) -> Tone {
    match severity {
        Severity::Negligible | Severity::Minor => Tone::Success,
        Severity::Moderate => Tone::Warning,
        Severity::Major | Severity::Catastrophic => Tone::Danger,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dispatch_covers_every_status() {
        let result = json!({"score": 1});
        assert_eq!(dispatch(None, None, None), View::Loading);
        assert!(matches!(
            dispatch(Some(&JobStatus::Pending), None, None),
            View::Waiting { .. }
        ));
        assert_eq!(
            dispatch(Some(&JobStatus::Completed), Some(&result), None),
            View::Success {
                result: Some(&result)
            }
        );
        assert_eq!(
            dispatch(Some(&JobStatus::Failed), None, Some("boom")),
            View::Failure { message: "boom" }
        );
        assert_eq!(
            dispatch(Some(&JobStatus::Failed), None, None),
            View::Failure {
                message: "Job failed"
            }
        );
        let odd = JobStatus::Unknown("paused".into());
        assert_eq!(
            dispatch(Some(&odd), None, None),
            View::Unknown { raw: "paused" }
        );
    }

    #[test]
    fn poll_state_views() {
        let loading = PollState {
            phase: Phase::Loading,
            ..PollState::default()
        };
        assert_eq!(view_for(&loading), View::Loading);

        let gave_up = PollState {
            phase: Phase::Terminal(Terminal::GaveUp {
                error: "Unable to reach the server".into(),
            }),
            ..PollState::default()
        };
        assert_eq!(
            render_text(&view_for(&gave_up)),
            "Failed: Unable to reach the server"
        );
    }

    #[test]
    fn array_results_render_as_table() {
        let rows = json!([
            {"group": "female", "selection_rate": 0.42},
            {"group": "male", "selection_rate": 0.5, "flagged": true}
        ]);
        let text = summarize(&rows);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "group   selection_rate  flagged");
        assert_eq!(lines[1], "female  0.42            -");
        assert_eq!(lines[2], "male    0.5             true");
    }

    #[test]
    fn object_results_render_as_pairs() {
        let text = summarize(&json!({"a": "x", "long_key": null}));
        assert_eq!(text, "a         x\nlong_key  -");
    }
}
