//! Terminal client for a remote code execution service.
//!
//! The work is split across the workspace:
//!
//! - `exec_api`: wire payloads, the health-probe backoff gate, the
//!   request/response executor and the live WebSocket channel.
//! - `exec_session`: the session state machine and the controller that picks
//!   a transport per run and applies events in arrival order.
//! - this crate: environment configuration, logging setup, and the
//!   plain-text transcript presentation used by the `code_runner` binary.
//!
//! ## Environment
//!
//! - `CODE_RUNNER_BASE_URL`: service root, default `http://localhost:8000`.
//!   A trailing `/api` is accepted.
//! - `CODE_RUNNER_LIVE_URL`: explicit WebSocket URL. Derived from the base URL
//!   (`/ws/execute`, `http` to `ws`, `https` to `wss`) when unset.
//! - `CODE_RUNNER_PREFER_LIVE=0`: skip the live channel and always use
//!   request/response.
//! - `CODE_RUNNER_RUN_TIMEOUT_SEC`: idle watchdog for a run, default 60; `0`
//!   disables it.
//! - `CODE_RUNNER_REQUEST_TIMEOUT_SEC`: per-request HTTP timeout.
//!
//! Command line flags override the environment.

pub mod config;
pub mod logging;
pub mod presentation;
pub mod submission;

pub use config::EnvConfig;
pub use presentation::{render_transcript, TranscriptPrinter};
pub use submission::{request_from_file, SubmissionError};
