use serde_json::{Map, Value};

use crate::error::ExecApiError;

/// Service-originated event for one run.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Output {
        content: String,
    },
    Error {
        content: String,
    },
    InputRequired {
        prompt: String,
    },
    /// `exit_info` keeps every field of the frame except `type` and `success`.
    Complete {
        success: bool,
        exit_info: Map<String, Value>,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Output { .. } => "output",
            Self::Error { .. } => "error",
            Self::InputRequired { .. } => "input_required",
            Self::Complete { .. } => "complete",
        }
    }

    pub fn complete(success: bool) -> Self {
        Self::Complete {
            success,
            exit_info: Map::new(),
        }
    }

    /// Execution time reported alongside a completion, in seconds.
    pub fn execution_time_seconds(&self) -> Option<f64> {
        match self {
            Self::Complete { exit_info, .. } => {
                exit_info.get("execution_time").and_then(Value::as_f64)
            }
            _ => None,
        }
    }
}

/// Result of classifying one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Event(SessionEvent),
    /// Well-formed JSON object with a `type` tag this client does not know.
    Unrecognized { event_type: String, payload: Value },
}

/// What a live channel reports to its single subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Session(SessionEvent),
    /// A frame could not be sent; the channel was not connected.
    SendFailed { message: String },
    Closed { reason: Option<String> },
}

/// Classify one text frame by its `type` tag.
pub fn parse_inbound(text: &str) -> Result<InboundMessage, ExecApiError> {
    let payload: Value = serde_json::from_str(text)?;
    let Some(object) = payload.as_object() else {
        return Err(ExecApiError::MalformedMessage(
            "expected a JSON object".to_string(),
        ));
    };

    let event_type = object
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let event = match event_type {
        "output" => SessionEvent::Output {
            content: required_string(object, event_type, "content")?,
        },
        "error" => SessionEvent::Error {
            content: required_string(object, event_type, "content")?,
        },
        "input_required" => SessionEvent::InputRequired {
            prompt: object
                .get("prompt")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        "complete" => {
            let success = object.get("success").and_then(Value::as_bool).ok_or_else(|| {
                ExecApiError::MalformedMessage("complete without boolean 'success'".to_string())
            })?;
            let exit_info = object
                .iter()
                .filter(|(key, _)| !matches!(key.as_str(), "type" | "success"))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            SessionEvent::Complete { success, exit_info }
        }
        _ => {
            return Ok(InboundMessage::Unrecognized {
                event_type: event_type.to_string(),
                payload,
            })
        }
    };

    Ok(InboundMessage::Event(event))
}

fn required_string(
    object: &Map<String, Value>,
    event_type: &str,
    field: &str,
) -> Result<String, ExecApiError> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ExecApiError::MalformedMessage(format!("'{event_type}' without string '{field}'"))
        })
}
