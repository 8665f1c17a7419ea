//! AI-system risk classification and keyword-based risk categorisation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::questionnaire::{Answers, Choice, Condition, Question, QuestionKind, Questionnaire};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    /// Not enough answers to decide.
    Pending,
    Minimal,
    Limited,
    High,
    Prohibited,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Pending => "PENDING",
            RiskLevel::Minimal => "MINIMAL",
            RiskLevel::Limited => "LIMITED",
            RiskLevel::High => "HIGH",
            RiskLevel::Prohibited => "PROHIBITED",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RiskLevel::Pending => "More information is needed to classify this system.",
            RiskLevel::Minimal => "Minimal risk: no specific obligations beyond voluntary codes of conduct.",
            RiskLevel::Limited => "Limited risk: transparency obligations apply.",
            RiskLevel::High => "High risk: conformity assessment, risk management and human oversight required.",
            RiskLevel::Prohibited => "Unacceptable risk: this use is prohibited.",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision areas where automated decisions about people are high risk.
const HIGH_RISK_AREAS: &[&str] = &[
    "employment",
    "education",
    "essential_services",
    "law_enforcement",
    "migration",
    "justice",
];

const VULNERABLE_GROUPS: &[&str] = &["children", "vulnerable_groups"];

const fn choice(value: &'static str, label: &'static str) -> Choice {
    Choice { value, label }
}

/// The built-in AI system risk questionnaire.
pub fn ai_act_risk() -> Questionnaire {
    Questionnaire {
        id: "riskClassification",
        questions: vec![
            Question {
                id: "q1",
                prompt: "What is the primary purpose of the AI system?",
                kind: QuestionKind::SingleChoice,
                options: vec![
                    choice("decisions_about_people", "Making or supporting decisions about people"),
                    choice("biometrics", "Biometric identification or categorisation"),
                    choice("safety_component", "Safety component of a product or critical infrastructure"),
                    choice("content_generation", "Generating text, images, audio or video"),
                    choice("social_scoring", "Scoring people's social behaviour"),
                    choice("manipulation", "Influencing behaviour through subliminal techniques"),
                    choice("other", "Something else"),
                ],
                show_if: None,
                required: true,
            },
            Question {
                id: "q1a",
                prompt: "In which area are these decisions made?",
                kind: QuestionKind::SingleChoice,
                options: vec![
                    choice("employment", "Recruitment, promotion or termination"),
                    choice("education", "Admission or assessment in education"),
                    choice("essential_services", "Credit, insurance or public benefits"),
                    choice("law_enforcement", "Law enforcement"),
                    choice("migration", "Migration, asylum or border control"),
                    choice("justice", "Administration of justice"),
                    choice("other_area", "Another area"),
                ],
                show_if: Some(Condition::Equals {
                    question: "q1",
                    value: "decisions_about_people",
                }),
                required: true,
            },
            Question {
                id: "q1b",
                prompt: "Which kind of biometric processing does the system perform?",
                kind: QuestionKind::SingleChoice,
                options: vec![
                    choice("realtime_remote_identification", "Real-time remote identification in public spaces"),
                    choice("categorisation", "Categorisation by sensitive attributes"),
                    choice("emotion_recognition", "Emotion recognition"),
                    choice("verification", "One-to-one identity verification"),
                ],
                show_if: Some(Condition::Equals {
                    question: "q1",
                    value: "biometrics",
                }),
                required: true,
            },
            Question {
                id: "q2",
                prompt: "Who is affected by the system's outputs?",
                kind: QuestionKind::MultiChoice,
                options: vec![
                    choice("employees", "Employees"),
                    choice("customers", "Customers"),
                    choice("general_public", "The general public"),
                    choice("children", "Children"),
                    choice("vulnerable_groups", "Other vulnerable groups"),
                ],
                show_if: None,
                required: true,
            },
            Question {
                id: "q3",
                prompt: "Who deploys the system?",
                kind: QuestionKind::SingleChoice,
                options: vec![
                    choice("public_sector", "A public authority"),
                    choice("private_sector", "A private organisation"),
                ],
                show_if: None,
                required: true,
            },
            Question {
                id: "q4",
                prompt: "How much human involvement is there in the final outcome?",
                kind: QuestionKind::SingleChoice,
                options: vec![
                    choice("fully_automated", "Outcomes are applied without human review"),
                    choice("decision_support", "A human decides, assisted by the system"),
                ],
                show_if: None,
                required: true,
            },
            Question {
                id: "q5",
                prompt: "Does the system interact directly with people or show them generated content?",
                kind: QuestionKind::SingleChoice,
                options: vec![choice("yes", "Yes"), choice("no", "No")],
                show_if: None,
                required: true,
            },
        ],
    }
}

/// Maps answers of [`ai_act_risk`] to a risk level.
pub fn classify_risk(answers: &Answers) -> RiskLevel {
    let Some(purpose) = answers.value("q1") else {
        return RiskLevel::Pending;
    };

    match purpose {
        "social_scoring" | "manipulation" => return RiskLevel::Prohibited,
        "biometrics" => {
            return match answers.value("q1b") {
                Some("realtime_remote_identification") => RiskLevel::Prohibited,
                Some("emotion_recognition") if answers.includes("q2", "employees") => RiskLevel::Prohibited,
                Some("categorisation" | "emotion_recognition") => RiskLevel::High,
                Some("verification") => RiskLevel::Limited,
                _ => RiskLevel::Pending,
            }
        }
        "safety_component" => return RiskLevel::High,
        "decisions_about_people" => match answers.value("q1a") {
            None => return RiskLevel::Pending,
            Some(area) if HIGH_RISK_AREAS.contains(&area) => return RiskLevel::High,
            Some(_) => {
                if answers.value("q4") == Some("fully_automated") && answers.value("q3") == Some("public_sector") {
                    return RiskLevel::High;
                }
            }
        },
        _ => {}
    }

    let affects_vulnerable = VULNERABLE_GROUPS.iter().any(|g| answers.includes("q2", g));
    match (purpose, answers.value("q5")) {
        ("content_generation", _) => RiskLevel::Limited,
        (_, Some("yes")) => RiskLevel::Limited,
        (_, Some("no")) if affects_vulnerable => RiskLevel::Limited,
        (_, Some("no")) => RiskLevel::Minimal,
        _ => RiskLevel::Pending,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Cybersecurity,
    Privacy,
    Bias,
    Legal,
    Financial,
    Reputational,
    Operational,
    Technical,
    Other,
}

/// Checked in order; the first category with a matching keyword wins.
/// Keywords match at word starts, so "discriminat" covers "discrimination".
const CATEGORY_KEYWORDS: &[(RiskCategory, &[&str])] = &[
    (
        RiskCategory::Cybersecurity,
        &["security", "breach", "attack", "vulnerab", "malware", "phishing", "injection"],
    ),
    (
        RiskCategory::Privacy,
        &["privacy", "personal data", "pii", "gdpr", "consent", "data protection", "data leak"],
    ),
    (
        RiskCategory::Bias,
        &["bias", "fairness", "discriminat", "disparate", "demographic"],
    ),
    (
        RiskCategory::Legal,
        &["legal", "regulat", "compliance", "lawsuit", "liability", "contract"],
    ),
    (
        RiskCategory::Financial,
        &["financial", "cost", "budget", "revenue", "fines", "penalt", "financial loss"],
    ),
    (
        RiskCategory::Reputational,
        &["reputation", "brand", "public trust", "media", "press"],
    ),
    (
        RiskCategory::Operational,
        &["operational", "process", "outage", "downtime", "staff", "vendor", "supply"],
    ),
    (
        RiskCategory::Technical,
        &["model", "accuracy", "drift", "performance", "hallucinat", "robust", "technical"],
    ),
];

/// Assigns a category to a risk from its free-text name and description.
pub fn categorize_risk(text: &str) -> RiskCategory {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| mentions(&words, k)))
        .map(|(category, _)| *category)
        .unwrap_or(RiskCategory::Other)
}

/// True if consecutive words start with each part of `keyword`.
fn mentions(words: &[&str], keyword: &str) -> bool {
    let parts: Vec<&str> = keyword.split(' ').collect();
    words
        .windows(parts.len())
        .any(|window| window.iter().zip(&parts).all(|(word, part)| word.starts_with(*part)))
}
