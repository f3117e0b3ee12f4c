//! Session orchestration for remote code runs.
//!
//! [`Session`] is the pure state machine: run state, transcript and run
//! statistics, mutated only through run-id stamped calls. [`SessionController`]
//! owns one `Session` together with the single live connection, chooses the
//! transport per run, and applies every asynchronous completion in arrival
//! order.

pub mod controller;
pub mod session;
pub mod transport;

pub use controller::{SessionConfig, SessionController};
pub use session::{
    FailureKind, HintStatus, RunFailure, RunId, RunRoute, RunStats, Session, SessionError,
    SessionState, TranscriptEntry,
};
pub use transport::{BatchExecutor, LiveConnector, LiveHandle, WebSocketConnector};
