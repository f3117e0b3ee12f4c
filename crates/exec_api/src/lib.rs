//! Transport-only client primitives for the remote code execution service.
//!
//! This crate owns request/response building, wire payloads and inbound event
//! classification for the execution service endpoints. It contains no session
//! state: which transport a run uses, and what the resulting events mean for
//! the user-visible transcript, is decided by `exec_session`.
//!
//! Two transports are provided:
//!
//! - [`ExecApiClient`]: single-call request/response execution, guarded by the
//!   health-probe backoff gate in [`retry`].
//! - [`LiveChannel`]: a persistent WebSocket that streams [`SessionEvent`]s and
//!   accepts program input mid-run. It never reconnects on its own.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod live;
pub mod payload;
pub mod retry;
pub mod url;

pub use client::ExecApiClient;
pub use config::ExecApiConfig;
pub use error::ExecApiError;
pub use events::{ChannelEvent, InboundMessage, SessionEvent};
pub use live::{ChannelEventSink, LiveChannel};
pub use payload::{
    ClientMessage, ExecutionRequest, HintReply, HintRequest, Language, RunOutcome,
};
pub use retry::{BackoffPolicy, Reachability};
pub use url::normalize_base_url;
