use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecApiError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status} {message}")]
    Status { status: StatusCode, message: String },

    #[error(
        "execution service unavailable after {attempts} attempts; make sure it is running at {endpoint}"
    )]
    ServiceUnavailable { attempts: u32, endpoint: String },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("live channel error: {0}")]
    Live(String),
}

impl ExecApiError {
    /// True for the exhausted-retry condition, which callers surface
    /// differently from remote program failures.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable { .. })
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request(error) => error.status(),
            _ => None,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExecApiError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Live(error.to_string())
    }
}

/// FastAPI-style error body: `{"detail": "..."}`, or a list of validation
/// entries each carrying `msg`.
#[derive(Debug, Deserialize)]
struct ErrorPayload {
    detail: Option<serde_json::Value>,
}

pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let fallback = || {
        if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            body.to_string()
        }
    };

    let Ok(payload) = serde_json::from_str::<ErrorPayload>(body) else {
        return fallback();
    };

    match payload.detail {
        Some(serde_json::Value::String(detail)) if !detail.is_empty() => detail,
        Some(serde_json::Value::Array(entries)) => {
            let messages: Vec<&str> = entries
                .iter()
                .filter_map(|entry| entry.get("msg").and_then(serde_json::Value::as_str))
                .collect();
            if messages.is_empty() {
                fallback()
            } else {
                messages.join("; ")
            }
        }
        _ => fallback(),
    }
}
