use std::time::Duration;

use crate::retry::BackoffPolicy;
use crate::url::{self, DEFAULT_BASE_URL};

/// Transport configuration for execution service requests.
#[derive(Debug, Clone)]
pub struct ExecApiConfig {
    /// Base URL of the execution service (HTTP endpoints).
    pub base_url: String,
    /// Explicit live channel URL. Derived from `base_url` when unset.
    pub live_url: Option<String>,
    /// Optional per-request timeout for request/response calls.
    pub timeout: Option<Duration>,
    /// Retry policy used by the health gate and transient-failure retries.
    pub backoff: BackoffPolicy,
}

impl Default for ExecApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            live_url: None,
            timeout: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl ExecApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_live_url(mut self, live_url: impl Into<String>) -> Self {
        self.live_url = Some(live_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn health_endpoint(&self) -> String {
        url::health_url(&self.base_url)
    }

    pub fn run_endpoint(&self) -> String {
        url::run_url(&self.base_url)
    }

    pub fn hint_endpoint(&self) -> String {
        url::hint_url(&self.base_url)
    }

    pub fn live_endpoint(&self) -> String {
        match self.live_url.as_deref().map(str::trim) {
            Some(explicit) if !explicit.is_empty() => explicit.to_string(),
            _ => url::live_url(&self.base_url),
        }
    }
}
