//! Error types shared by the HTTP repository layer and the client-side views.

use serde::Deserialize;
use thiserror::Error;

/// Error body shapes the API answers with. Handlers use either key.
#[derive(Deserialize)]
struct RawError {
    message: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// No HTTP response at all: connection refused, timeout, reset.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with an error status.
    #[error("HTTP error with status {status}: {message}")]
    Http { status: u16, message: String },

    /// The body did not match the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

impl ApiError {
    pub async fn from_response(response: reqwest::Response) -> ApiError {
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read response text".to_string());

        ApiError::Http {
            status,
            message: Self::extract_message(&text),
        }
    }

    /// Pulls `message`/`error` out of a JSON error body, falling back to the raw text.
    fn extract_message(body: &str) -> String {
        if let Ok(raw) = serde_json::from_str::<RawError>(body) {
            if let Some(msg) = raw.message.or(raw.error) {
                return msg;
            }
        }
        if body.trim().is_empty() {
            "no message".to_string()
        } else {
            body.trim().to_string()
        }
    }

    /// Transient failures are retried by pollers; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Http { status: 404, .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The text a front end should show for this error.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Http { message, .. } => message.clone(),
            ApiError::Network(_) => "Unable to reach the server".to_string(),
            other => other.to_string(),
        }
    }
}

/// A local, pre-submission check failure tied to a form field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn required(field: impl Into<String>) -> Self {
        Self::new(field, "is required")
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
