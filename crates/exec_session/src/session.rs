use exec_api::{HintReply, SessionEvent};
use serde_json::Value;

pub type RunId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting { run_id: RunId },
    Running { run_id: RunId },
    AwaitingInput { run_id: RunId, prompt: String },
    Completed { run_id: RunId },
    Failed { run_id: RunId },
}

impl SessionState {
    pub fn run_id(&self) -> Option<RunId> {
        match self {
            Self::Idle => None,
            Self::Connecting { run_id }
            | Self::Running { run_id }
            | Self::AwaitingInput { run_id, .. }
            | Self::Completed { run_id }
            | Self::Failed { run_id } => Some(*run_id),
        }
    }

    /// Connecting, running or waiting for input.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::Connecting { .. } | Self::Running { .. } | Self::AwaitingInput { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting { .. } => "connecting",
            Self::Running { .. } => "running",
            Self::AwaitingInput { .. } => "awaiting input",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEntry {
    Output(String),
    Error(String),
    /// Echo of a line the user typed, without its newline.
    Input(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub total_runs: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub hints_requested: u64,
}

/// Which transport carries the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunRoute {
    Live,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Compile or runtime failure reported by the service.
    Remote,
    /// Backoff exhausted before the service answered.
    Unavailable,
    /// The service refused the request (4xx).
    Rejected,
    Transport,
    TimedOut,
    /// The program asked for input after the input source reached its end.
    InputClosed,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl RunFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum HintStatus {
    #[default]
    None,
    Pending,
    Ready(HintReply),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no code to run")]
    EmptyCode,
    #[error("run already in progress")]
    RunInProgress,
    #[error("{language} is an interpreted language, there is no compilation step")]
    CompileOnlyUnsupported { language: String },
    #[error("no exercise selected")]
    NoExerciseSelected,
    #[error("a hint request is already pending")]
    HintPending,
    #[error("no program is waiting for input")]
    NotAcceptingInput,
    #[error("input must be supplied before a request/response run starts")]
    BatchInput,
    #[error("live channel is not configured")]
    LiveUnavailable,
}

const INSUFFICIENT_INPUT_MESSAGE: &str =
    "program requested more input than was supplied before the run";

/// Run state, transcript and statistics of one orchestrator.
///
/// Every run-scoped mutation takes the run id it belongs to; calls for any
/// other run are ignored so late events of an abandoned run cannot leak into
/// the current one.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    state: SessionState,
    route: Option<RunRoute>,
    transcript: Vec<TranscriptEntry>,
    stats: RunStats,
    last_failure: Option<RunFailure>,
    execution_time_seconds: Option<f64>,
    hint: HintStatus,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            route: None,
            transcript: Vec::new(),
            stats: RunStats::default(),
            last_failure: None,
            execution_time_seconds: None,
            hint: HintStatus::None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn route(&self) -> Option<RunRoute> {
        self.route
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    pub fn last_failure(&self) -> Option<&RunFailure> {
        self.last_failure.as_ref()
    }

    pub fn execution_time_seconds(&self) -> Option<f64> {
        self.execution_time_seconds
    }

    pub fn hint(&self) -> &HintStatus {
        &self.hint
    }

    pub fn prompt(&self) -> Option<&str> {
        match &self.state {
            SessionState::AwaitingInput { prompt, .. } => Some(prompt),
            _ => None,
        }
    }

    /// Id of the run that is still in flight, if any.
    pub fn active_run(&self) -> Option<RunId> {
        if self.state.is_in_flight() {
            self.state.run_id()
        } else {
            None
        }
    }

    pub fn ensure_can_start(&self) -> Result<(), SessionError> {
        if self.state.is_in_flight() {
            return Err(SessionError::RunInProgress);
        }
        Ok(())
    }

    pub fn begin_connecting(&mut self, run_id: RunId) -> Result<(), SessionError> {
        self.ensure_can_start()?;
        self.clear_run_scope();
        self.route = Some(RunRoute::Live);
        self.state = SessionState::Connecting { run_id };
        Ok(())
    }

    /// Enters `Running`. A run that was connecting keeps its (empty)
    /// transcript; any other start clears the previous run's output.
    pub fn begin_run(&mut self, run_id: RunId, route: RunRoute) -> Result<(), SessionError> {
        let resuming = self.state == SessionState::Connecting { run_id };
        if !resuming {
            self.ensure_can_start()?;
            self.clear_run_scope();
        }
        self.route = Some(route);
        self.state = SessionState::Running { run_id };
        Ok(())
    }

    /// Applies one event. Returns whether the session changed.
    pub fn on_event(&mut self, run_id: RunId, event: SessionEvent) -> bool {
        if !self.accepts_events(run_id) {
            tracing::debug!(run_id, kind = event.kind(), "ignoring event outside the active run");
            return false;
        }

        match event {
            SessionEvent::Output { content } => {
                self.push_output(&content);
            }
            SessionEvent::Error { content } => {
                self.transcript.push(TranscriptEntry::Error(content.clone()));
                self.finish_failed(run_id, RunFailure::new(FailureKind::Remote, content));
            }
            SessionEvent::InputRequired { prompt } => {
                if self.route == Some(RunRoute::Batch) {
                    self.transcript
                        .push(TranscriptEntry::Error(INSUFFICIENT_INPUT_MESSAGE.to_string()));
                    self.finish_failed(
                        run_id,
                        RunFailure::new(FailureKind::Remote, INSUFFICIENT_INPUT_MESSAGE),
                    );
                } else {
                    self.state = SessionState::AwaitingInput { run_id, prompt };
                }
            }
            SessionEvent::Complete { success, exit_info } => {
                if let Some(seconds) = exit_info.get("execution_time").and_then(Value::as_f64) {
                    self.execution_time_seconds = Some(seconds);
                }
                if success {
                    self.state = SessionState::Completed { run_id };
                    self.stats.total_runs += 1;
                    self.stats.success_count += 1;
                } else {
                    self.finish_failed(
                        run_id,
                        RunFailure::new(FailureKind::Remote, "program exited unsuccessfully"),
                    );
                }
            }
        }

        true
    }

    /// Appends diagnostics of a run without failing it. Request/response
    /// results carry stderr separately from their `success` flag.
    pub fn append_stderr(&mut self, run_id: RunId, content: &str) -> bool {
        if content.is_empty() || !self.accepts_events(run_id) {
            return false;
        }
        self.transcript
            .push(TranscriptEntry::Error(content.to_string()));
        true
    }

    /// Validates and echoes one line of program input. Returns the run the
    /// line belongs to.
    ///
    /// Live runs also accept lines while `Running` so input typed ahead of
    /// the next prompt is forwarded in order.
    pub fn submit_input(&mut self, line: &str) -> Result<RunId, SessionError> {
        let run_id = match &self.state {
            SessionState::AwaitingInput { run_id, .. } => *run_id,
            SessionState::Running { run_id } => match self.route {
                Some(RunRoute::Live) => *run_id,
                _ => return Err(SessionError::BatchInput),
            },
            _ => return Err(SessionError::NotAcceptingInput),
        };

        self.transcript.push(TranscriptEntry::Input(line.to_string()));
        self.state = SessionState::Running { run_id };
        Ok(run_id)
    }

    /// Forces the in-flight run into `Failed`. Returns whether it applied.
    pub fn fail(&mut self, run_id: RunId, failure: RunFailure) -> bool {
        if self.active_run() != Some(run_id) {
            return false;
        }
        self.transcript
            .push(TranscriptEntry::Error(failure.message.clone()));
        self.finish_failed(run_id, failure);
        true
    }

    /// Back to `Idle` with an empty transcript. Statistics are kept.
    pub fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.clear_run_scope();
    }

    pub fn set_execution_time(&mut self, run_id: RunId, seconds: f64) {
        if self.active_run() == Some(run_id) {
            self.execution_time_seconds = Some(seconds);
        }
    }

    pub fn begin_hint(&mut self) -> Result<(), SessionError> {
        if self.hint == HintStatus::Pending {
            return Err(SessionError::HintPending);
        }
        self.hint = HintStatus::Pending;
        Ok(())
    }

    pub fn record_hint(&mut self, reply: HintReply) {
        self.stats.hints_requested += 1;
        self.hint = HintStatus::Ready(reply);
    }

    pub fn record_hint_failure(&mut self, message: impl Into<String>) {
        self.hint = HintStatus::Failed(message.into());
    }

    /// Error text of the most recent failed run, empty when there is none.
    pub fn last_error_text(&self) -> &str {
        self.last_failure
            .as_ref()
            .map(|failure| failure.message.as_str())
            .unwrap_or_default()
    }

    fn accepts_events(&self, run_id: RunId) -> bool {
        matches!(
            &self.state,
            SessionState::Running { run_id: current }
                | SessionState::AwaitingInput { run_id: current, .. } if *current == run_id
        )
    }

    fn push_output(&mut self, content: &str) {
        if content.is_empty() {
            return;
        }
        if let Some(TranscriptEntry::Output(previous)) = self.transcript.last_mut() {
            previous.push_str(content);
        } else {
            self.transcript
                .push(TranscriptEntry::Output(content.to_string()));
        }
    }

    fn finish_failed(&mut self, run_id: RunId, failure: RunFailure) {
        tracing::debug!(run_id, kind = ?failure.kind, "run failed");
        self.state = SessionState::Failed { run_id };
        self.last_failure = Some(failure);
        self.stats.total_runs += 1;
        self.stats.error_count += 1;
    }

    fn clear_run_scope(&mut self) {
        self.route = None;
        self.transcript.clear();
        self.execution_time_seconds = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(run_id: RunId, route: RunRoute) -> Session {
        let mut session = Session::new();
        session.begin_run(run_id, route).expect("idle session starts");
        session
    }

    fn output(content: &str) -> SessionEvent {
        SessionEvent::Output {
            content: content.to_string(),
        }
    }

    #[test]
    fn consecutive_output_is_merged_in_arrival_order() {
        let mut session = running(1, RunRoute::Live);
        for chunk in ["Hel", "lo", ", ", "world\n"] {
            assert!(session.on_event(1, output(chunk)));
        }
        assert_eq!(
            session.transcript(),
            &[TranscriptEntry::Output("Hello, world\n".to_string())]
        );
    }

    #[test]
    fn input_echo_splits_output_fragments() {
        let mut session = running(1, RunRoute::Live);
        session.on_event(1, output("Enter: "));
        session.on_event(
            1,
            SessionEvent::InputRequired {
                prompt: "> ".to_string(),
            },
        );
        assert_eq!(session.prompt(), Some("> "));

        assert_eq!(session.submit_input("5"), Ok(1));
        session.on_event(1, output("25\n"));

        assert_eq!(
            session.transcript(),
            &[
                TranscriptEntry::Output("Enter: ".to_string()),
                TranscriptEntry::Input("5".to_string()),
                TranscriptEntry::Output("25\n".to_string()),
            ]
        );
        assert_eq!(session.state(), &SessionState::Running { run_id: 1 });
    }

    #[test]
    fn error_event_fails_once_and_absorbs_trailing_complete() {
        let mut session = running(3, RunRoute::Live);
        session.on_event(
            3,
            SessionEvent::Error {
                content: "NameError".to_string(),
            },
        );
        assert!(!session.on_event(3, SessionEvent::complete(false)));

        assert_eq!(session.state(), &SessionState::Failed { run_id: 3 });
        assert_eq!(session.stats().total_runs, 1);
        assert_eq!(session.stats().error_count, 1);
        assert_eq!(session.last_error_text(), "NameError");
    }

    #[test]
    fn batch_input_request_is_a_failure() {
        let mut session = running(1, RunRoute::Batch);
        session.on_event(
            1,
            SessionEvent::InputRequired {
                prompt: String::new(),
            },
        );
        assert_eq!(session.state(), &SessionState::Failed { run_id: 1 });
        assert_eq!(session.submit_input("x"), Err(SessionError::NotAcceptingInput));
    }

    #[test]
    fn batch_runs_reject_type_ahead() {
        let mut session = running(1, RunRoute::Batch);
        assert_eq!(session.submit_input("x"), Err(SessionError::BatchInput));
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn connecting_run_resumes_with_same_id_only() {
        let mut session = Session::new();
        session.begin_connecting(4).expect("connecting");
        assert_eq!(
            session.begin_run(5, RunRoute::Live),
            Err(SessionError::RunInProgress)
        );
        session.begin_run(4, RunRoute::Live).expect("resume");
        assert_eq!(session.state(), &SessionState::Running { run_id: 4 });
    }

    #[test]
    fn reset_keeps_stats() {
        let mut session = running(1, RunRoute::Batch);
        session.on_event(1, SessionEvent::complete(true));
        session.record_hint(HintReply {
            hint: "h".to_string(),
            source: None,
            rag_used: false,
        });
        session.reset();

        assert_eq!(session.state(), &SessionState::Idle);
        assert!(session.transcript().is_empty());
        assert_eq!(session.stats().success_count, 1);
        assert_eq!(session.stats().hints_requested, 1);
    }
}
