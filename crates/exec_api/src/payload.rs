use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Languages accepted by the execution service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
    Python,
    Java,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Python => "python",
            Self::Java => "java",
        }
    }

    /// Interpreted languages have no separate compile step.
    pub fn is_compiled(&self) -> bool {
        !matches!(self, Self::Python)
    }

    /// Maps a source file extension (with or without the leading dot).
    pub fn from_extension(extension: &str) -> Option<Self> {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        Some(match extension.as_str() {
            "c" | "h" => Self::C,
            "cpp" | "cc" | "cxx" | "hpp" => Self::Cpp,
            "py" => Self::Python,
            "java" => Self::Java,
            _ => return None,
        })
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value.trim().to_ascii_lowercase().as_str() {
            "c" => Self::C,
            "cpp" | "c++" => Self::Cpp,
            "python" | "py" => Self::Python,
            "java" => Self::Java,
            other => return Err(format!("unsupported language '{other}'")),
        })
    }
}

/// One code submission. Never mutated after it is handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub code: String,
    pub language: Language,
    pub input_data: Option<String>,
    pub compile_only: bool,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, language: Language) -> Self {
        Self {
            code: code.into(),
            language,
            input_data: None,
            compile_only: false,
        }
    }

    pub fn with_input(mut self, input_data: impl Into<String>) -> Self {
        self.input_data = Some(input_data.into());
        self
    }

    pub fn with_compile_only(mut self, compile_only: bool) -> Self {
        self.compile_only = compile_only;
        self
    }

    /// Pre-supplied input as the remote reader should see it.
    pub fn normalized_input(&self) -> Option<String> {
        normalize_input_data(self.input_data.as_deref())
    }
}

/// Appends a single trailing newline to non-empty input that lacks one so
/// the remote program reads a complete final line.
pub fn normalize_input_data(input: Option<&str>) -> Option<String> {
    let input = input?;
    if input.is_empty() || input.ends_with('\n') {
        return Some(input.to_string());
    }
    Some(format!("{input}\n"))
}

/// Client to service frames on the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Execute {
        code: String,
        language: Language,
        input_data: Option<String>,
        compile_only: bool,
    },
    Input {
        content: String,
    },
}

impl ClientMessage {
    pub fn execute(request: &ExecutionRequest) -> Self {
        Self::Execute {
            code: request.code.clone(),
            language: request.language,
            input_data: request.normalized_input(),
            compile_only: request.compile_only,
        }
    }

    pub fn input(content: impl Into<String>) -> Self {
        Self::Input {
            content: content.into(),
        }
    }
}

/// Request/response run body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCodePayload {
    pub code: String,
    pub language: Language,
    pub input_data: Option<String>,
}

impl From<&ExecutionRequest> for RunCodePayload {
    fn from(request: &ExecutionRequest) -> Self {
        Self {
            code: request.code.clone(),
            language: request.language,
            input_data: request.normalized_input(),
        }
    }
}

/// Request/response run reply as sent by the service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunCodeResponse {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub execution_time: Option<f64>,
    /// Set by services that detect a program blocked on exhausted stdin.
    #[serde(default)]
    pub input_required: Option<bool>,
}

/// Complete result of one request/response run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub output: String,
    pub error: String,
    pub success: bool,
    pub execution_time_seconds: f64,
    /// The program asked for more input than was supplied up front.
    pub input_exhausted: bool,
}

impl From<RunCodeResponse> for RunOutcome {
    fn from(response: RunCodeResponse) -> Self {
        Self {
            output: response.output.unwrap_or_default(),
            error: response.error.unwrap_or_default(),
            success: response.success,
            execution_time_seconds: response.execution_time.unwrap_or_default(),
            input_exhausted: response.input_required.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HintRequest {
    pub language: Language,
    pub exercise_id: String,
    pub error_message: String,
    pub failed_tests: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HintReply {
    pub hint: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub rag_used: bool,
}
