use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::{Client, RequestBuilder, Response, StatusCode};

use crate::config::ExecApiConfig;
use crate::error::{parse_error_message, ExecApiError};
use crate::payload::{
    ExecutionRequest, HintReply, HintRequest, RunCodePayload, RunCodeResponse, RunOutcome,
};
use crate::retry::{
    ensure_reachable, is_retryable_status, is_transient_error_text, probe_with_backoff, Backoff,
    Reachability,
};

/// Request/response client for the execution service.
///
/// The first call in a cold client waits for the health endpoint through the
/// backoff gate; transient failures of the call itself are retried from the
/// same attempt budget, so one call never exceeds `max_attempts` failed
/// attempts in total. Client errors (4xx) are returned after a single attempt.
#[derive(Debug)]
pub struct ExecApiClient {
    http: Client,
    config: ExecApiConfig,
    warm: AtomicBool,
}

impl ExecApiClient {
    pub fn new(config: ExecApiConfig) -> Result<Self, ExecApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self {
            http,
            config,
            warm: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ExecApiConfig {
        &self.config
    }

    /// `200` from the health endpoint means reachable; anything else,
    /// including a network failure, does not.
    pub async fn probe_health(&self) -> bool {
        match self.http.get(self.config.health_endpoint()).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(error) => {
                tracing::debug!(error = %error, "health probe failed");
                false
            }
        }
    }

    pub async fn ensure_reachable(&self) -> Reachability {
        ensure_reachable(|| self.probe_health(), &self.config.backoff).await
    }

    pub fn build_run_request(&self, request: &ExecutionRequest) -> RequestBuilder {
        self.http
            .post(self.config.run_endpoint())
            .json(&RunCodePayload::from(request))
    }

    pub fn build_hint_request(&self, request: &HintRequest) -> RequestBuilder {
        self.http.post(self.config.hint_endpoint()).json(request)
    }

    /// Executes one submission and returns its complete result.
    pub async fn run(&self, request: &ExecutionRequest) -> Result<RunOutcome, ExecApiError> {
        let endpoint = self.config.run_endpoint();
        let response = self
            .send_with_retry(|| self.build_run_request(request), &endpoint)
            .await?;
        let body: RunCodeResponse = response.json().await?;
        tracing::debug!(
            success = body.success,
            execution_time = body.execution_time.unwrap_or_default(),
            "run completed"
        );
        Ok(body.into())
    }

    pub async fn request_hint(&self, request: &HintRequest) -> Result<HintReply, ExecApiError> {
        let endpoint = self.config.hint_endpoint();
        let response = self
            .send_with_retry(|| self.build_hint_request(request), &endpoint)
            .await?;
        Ok(response.json().await?)
    }

    async fn send_with_retry<B>(&self, build: B, endpoint: &str) -> Result<Response, ExecApiError>
    where
        B: Fn() -> RequestBuilder,
    {
        let mut backoff = self.config.backoff.schedule();
        if !self.warm.load(Ordering::Acquire) {
            let reachability =
                probe_with_backoff(|| self.probe_health(), &mut backoff, tokio::time::sleep).await;
            if let Reachability::Unreachable { attempts } = reachability {
                return Err(ExecApiError::ServiceUnavailable {
                    attempts,
                    endpoint: self.config.health_endpoint(),
                });
            }
            self.warm.store(true, Ordering::Release);
        }

        loop {
            match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    let message = parse_error_message(status, &body);
                    if !is_retryable_status(status.as_u16()) {
                        return Err(ExecApiError::Status { status, message });
                    }
                    tracing::warn!(status = status.as_u16(), message = %message, "transient service failure");
                    self.wait_or_give_up(&mut backoff, endpoint).await?;
                }
                Err(error) => {
                    if !is_transient_request_error(&error) {
                        return Err(error.into());
                    }
                    tracing::warn!(error = %error, "transient connection failure");
                    self.wait_or_give_up(&mut backoff, endpoint).await?;
                }
            }
        }
    }

    async fn wait_or_give_up(&self, backoff: &mut Backoff, endpoint: &str) -> Result<(), ExecApiError> {
        match backoff.next_delay() {
            Some(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None => {
                self.warm.store(false, Ordering::Release);
                Err(ExecApiError::ServiceUnavailable {
                    attempts: backoff.attempts(),
                    endpoint: endpoint.to_string(),
                })
            }
        }
    }
}

fn is_transient_request_error(error: &reqwest::Error) -> bool {
    if error.is_builder() || error.is_decode() {
        return false;
    }
    error.is_connect()
        || error.is_timeout()
        || error.is_request()
        || is_transient_error_text(&error.to_string())
}
