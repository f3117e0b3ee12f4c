use std::sync::Arc;
use std::time::Duration;

use exec_api::{
    ChannelEvent, ChannelEventSink, ExecApiError, ExecutionRequest, HintReply, HintRequest,
    Language, RunOutcome, SessionEvent,
};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::session::{
    FailureKind, RunFailure, RunId, RunRoute, Session, SessionError, SessionState,
};
use crate::transport::{BatchExecutor, LiveConnector, LiveHandle};

pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_LIVE_CONNECT_ATTEMPTS: u32 = 3;

const COMPILE_ONLY_NEEDS_LIVE: &str =
    "compile-only runs need the live channel; the request/response path always executes";
const LIVE_NOT_CONNECTED: &str = "Not connected to execution server";
const INPUT_CLOSED: &str = "input closed while the program was waiting for more";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Try the live channel before falling back to request/response.
    pub prefer_live: bool,
    /// Idle watchdog for a running run; `None` disables it.
    pub run_timeout: Option<Duration>,
    /// Consecutive failed connects before runs stop trying the live channel.
    pub max_live_connect_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prefer_live: true,
            run_timeout: Some(DEFAULT_RUN_TIMEOUT),
            max_live_connect_attempts: DEFAULT_MAX_LIVE_CONNECT_ATTEMPTS,
        }
    }
}

impl SessionConfig {
    pub fn with_prefer_live(mut self, prefer_live: bool) -> Self {
        self.prefer_live = prefer_live;
        self
    }

    pub fn with_run_timeout(mut self, run_timeout: Option<Duration>) -> Self {
        self.run_timeout = run_timeout.filter(|timeout| !timeout.is_zero());
        self
    }

    pub fn with_max_live_connect_attempts(mut self, attempts: u32) -> Self {
        self.max_live_connect_attempts = attempts.max(1);
        self
    }
}

enum Envelope {
    Live {
        handle_id: u64,
        event: ChannelEvent,
    },
    Connected {
        handle_id: u64,
        result: Result<Box<dyn LiveHandle>, ExecApiError>,
    },
    Batch {
        run_id: RunId,
        result: Result<RunOutcome, ExecApiError>,
    },
    Watchdog {
        run_id: RunId,
        epoch: u64,
    },
    Hint {
        result: Result<HintReply, ExecApiError>,
    },
}

struct LiveSlot {
    handle_id: u64,
    handle: Box<dyn LiveHandle>,
    /// Run the handle's events belong to.
    run_id: Option<RunId>,
    /// The service has not yet sent `complete` for `run_id`.
    awaiting_complete: bool,
}

struct PendingConnect {
    handle_id: u64,
    dispatch: Option<(RunId, ExecutionRequest)>,
    task: JoinHandle<()>,
}

/// Owns the session, the single live connection and every in-flight task.
///
/// All completions (live events, request/response results, watchdog expiry,
/// hint replies) are queued and applied one at a time by
/// [`SessionController::process_next`], so session mutations never interleave.
/// Every applied change is published to [`SessionController::subscribe`] receivers.
pub struct SessionController {
    session: Session,
    config: SessionConfig,
    executor: Arc<dyn BatchExecutor>,
    connector: Option<Arc<dyn LiveConnector>>,
    live: Option<LiveSlot>,
    connecting: Option<PendingConnect>,
    batch_task: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
    watchdog_epoch: u64,
    next_run_id: RunId,
    next_handle_id: u64,
    live_failures: u32,
    live_suspended: bool,
    input_closed: bool,
    envelopes_tx: mpsc::UnboundedSender<Envelope>,
    envelopes_rx: mpsc::UnboundedReceiver<Envelope>,
    snapshots: watch::Sender<Session>,
}

impl SessionController {
    pub fn new(
        executor: Arc<dyn BatchExecutor>,
        connector: Option<Arc<dyn LiveConnector>>,
        config: SessionConfig,
    ) -> Self {
        let (envelopes_tx, envelopes_rx) = mpsc::unbounded_channel();
        let session = Session::new();
        let (snapshots, _) = watch::channel(session.clone());
        Self {
            session,
            config,
            executor,
            connector,
            live: None,
            connecting: None,
            batch_task: None,
            watchdog: None,
            watchdog_epoch: 0,
            next_run_id: 1,
            next_handle_id: 1,
            live_failures: 0,
            live_suspended: false,
            input_closed: false,
            envelopes_tx,
            envelopes_rx,
            snapshots,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.snapshots.subscribe()
    }

    pub fn is_live_connected(&self) -> bool {
        self.live
            .as_ref()
            .is_some_and(|slot| slot.handle.is_connected())
    }

    /// Runs skip the live channel after repeated connect failures until an
    /// explicit [`SessionController::connect_live`] succeeds.
    pub fn is_live_suspended(&self) -> bool {
        self.live_suspended
    }

    /// Submits a run. Preconditions are checked before anything touches the
    /// network; the result arrives later through [`Self::process_next`].
    pub fn start_run(&mut self, request: ExecutionRequest) -> Result<RunId, SessionError> {
        if request.code.trim().is_empty() {
            return Err(SessionError::EmptyCode);
        }
        if request.compile_only && !request.language.is_compiled() {
            return Err(SessionError::CompileOnlyUnsupported {
                language: request.language.to_string(),
            });
        }
        self.session.ensure_can_start()?;

        let run_id = self.next_run_id;
        self.next_run_id += 1;

        let live_ready = self
            .live
            .as_ref()
            .is_some_and(|slot| slot.handle.is_connected() && !slot.awaiting_complete);

        if live_ready {
            self.dispatch_live(run_id, request)?;
        } else {
            if self.live.is_some() {
                tracing::debug!("replacing live channel that cannot take a new run");
                self.drop_live();
            }
            if self.should_connect_live() {
                self.session.begin_connecting(run_id)?;
                match self.connecting.as_mut() {
                    Some(pending) => pending.dispatch = Some((run_id, request)),
                    None => self.open_live(Some((run_id, request))),
                }
            } else {
                self.dispatch_batch(run_id, request)?;
            }
        }

        self.sync_watchdog();
        self.publish();
        Ok(run_id)
    }

    /// Forwards one line typed by the user to the running program.
    pub fn submit_input(&mut self, line: &str) -> Result<(), SessionError> {
        let run_id = self.session.submit_input(line)?;

        match self.live.as_ref() {
            Some(slot) if slot.run_id == Some(run_id) && slot.handle.is_connected() => {
                slot.handle.send_input(line);
            }
            _ => {
                self.drop_live();
                self.session
                    .fail(run_id, RunFailure::new(FailureKind::Transport, LIVE_NOT_CONNECTED));
            }
        }

        self.sync_watchdog();
        self.publish();
        Ok(())
    }

    /// Marks the input source as exhausted. A run waiting for a line now, or
    /// asking for one later, fails instead of waiting forever.
    pub fn close_input(&mut self) {
        if self.input_closed {
            return;
        }
        tracing::debug!("input source closed");
        self.input_closed = true;
        if self.fail_starved_run() {
            self.sync_watchdog();
            self.publish();
        }
    }

    /// Returns to `Idle` with an empty transcript. Anything still running for
    /// the abandoned run is cancelled, and a live channel with a run in
    /// flight is dropped so none of its events can arrive later.
    pub fn reset(&mut self) {
        self.cancel_watchdog();
        if let Some(task) = self.batch_task.take() {
            task.abort();
        }
        if let Some(pending) = self.connecting.take() {
            pending.task.abort();
        }
        if self.live.as_ref().is_some_and(|slot| slot.awaiting_complete) {
            self.drop_live();
        }
        self.session.reset();
        self.publish();
    }

    /// Opens the live channel ahead of the next run. Also lifts the
    /// suspension after repeated failures once the connect succeeds.
    pub fn connect_live(&mut self) -> Result<(), SessionError> {
        if self.connector.is_none() {
            return Err(SessionError::LiveUnavailable);
        }
        if self.is_live_connected() || self.connecting.is_some() {
            return Ok(());
        }
        self.open_live(None);
        Ok(())
    }

    /// Closes the live channel. A live run in flight fails as a transport
    /// failure.
    pub fn disconnect(&mut self) {
        if let Some(pending) = self.connecting.take() {
            pending.task.abort();
            if let Some((run_id, _)) = pending.dispatch {
                self.session.fail(
                    run_id,
                    RunFailure::new(FailureKind::Transport, "disconnected from execution service"),
                );
            }
        }
        if let Some(run_id) = self.drop_live() {
            self.session.fail(
                run_id,
                RunFailure::new(FailureKind::Transport, "disconnected from execution service"),
            );
        }
        self.sync_watchdog();
        self.publish();
    }

    pub fn request_hint(
        &mut self,
        exercise_id: Option<&str>,
        language: Language,
    ) -> Result<(), SessionError> {
        let exercise_id = exercise_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(SessionError::NoExerciseSelected)?;
        self.session.begin_hint()?;

        let request = HintRequest {
            language,
            exercise_id: exercise_id.to_string(),
            error_message: self.session.last_error_text().to_string(),
            failed_tests: String::new(),
        };
        let executor = Arc::clone(&self.executor);
        let tx = self.envelopes_tx.clone();
        tokio::spawn(async move {
            let result = executor.request_hint(&request).await;
            let _ = tx.send(Envelope::Hint { result });
        });

        self.publish();
        Ok(())
    }

    /// Waits for the next completion and applies it.
    pub async fn process_next(&mut self) {
        if let Some(envelope) = self.envelopes_rx.recv().await {
            self.apply(envelope);
            self.publish();
        }
    }

    /// Applies every completion that is already queued.
    ///
    /// Live channel events are queued synchronously by the channel's reader,
    /// so callers that do not poll [`Self::process_next`] can use this to
    /// observe them.
    pub fn flush_pending_events(&mut self) -> usize {
        let mut drained = 0usize;
        while let Ok(envelope) = self.envelopes_rx.try_recv() {
            self.apply(envelope);
            drained += 1;
        }
        if drained > 0 {
            self.publish();
        }
        drained
    }

    fn apply(&mut self, envelope: Envelope) {
        let changed = match envelope {
            Envelope::Live { handle_id, event } => self.on_live_event(handle_id, event),
            Envelope::Connected { handle_id, result } => self.on_connected(handle_id, result),
            Envelope::Batch { run_id, result } => self.on_batch_result(run_id, result),
            Envelope::Watchdog { run_id, epoch } => self.on_watchdog(run_id, epoch),
            Envelope::Hint { result } => {
                match result {
                    Ok(reply) => self.session.record_hint(reply),
                    Err(error) => {
                        tracing::warn!(error = %error, "hint request failed");
                        self.session.record_hint_failure(error.to_string());
                    }
                }
                false
            }
        };

        let starved = self.fail_starved_run();
        if changed || starved {
            self.sync_watchdog();
        }
    }

    fn fail_starved_run(&mut self) -> bool {
        if !self.input_closed {
            return false;
        }
        let SessionState::AwaitingInput { run_id, .. } = self.session.state() else {
            return false;
        };
        let run_id = *run_id;
        if self.live.as_ref().is_some_and(|slot| slot.run_id == Some(run_id)) {
            self.drop_live();
        }
        self.session
            .fail(run_id, RunFailure::new(FailureKind::InputClosed, INPUT_CLOSED))
    }

    fn on_live_event(&mut self, handle_id: u64, event: ChannelEvent) -> bool {
        let Some(slot) = self
            .live
            .as_mut()
            .filter(|slot| slot.handle_id == handle_id)
        else {
            tracing::debug!(handle_id, "dropping event from a replaced live channel");
            return false;
        };

        match event {
            ChannelEvent::Session(event) => {
                let Some(run_id) = slot.run_id else {
                    tracing::warn!(kind = event.kind(), "live event without a dispatched run");
                    return false;
                };
                if matches!(event, SessionEvent::Complete { .. }) {
                    slot.awaiting_complete = false;
                }
                self.session.on_event(run_id, event)
            }
            ChannelEvent::SendFailed { message } => {
                tracing::warn!(message = %message, "live channel send failed");
                match self.drop_live() {
                    Some(run_id) => self
                        .session
                        .fail(run_id, RunFailure::new(FailureKind::Transport, message)),
                    None => false,
                }
            }
            ChannelEvent::Closed { reason } => {
                tracing::info!(reason = reason.as_deref().unwrap_or(""), "live channel closed");
                let message = match reason {
                    Some(reason) => format!("connection to execution service closed: {reason}"),
                    None => "connection to execution service closed".to_string(),
                };
                match self.drop_live() {
                    Some(run_id) => self
                        .session
                        .fail(run_id, RunFailure::new(FailureKind::Transport, message)),
                    None => false,
                }
            }
        }
    }

    fn on_connected(
        &mut self,
        handle_id: u64,
        result: Result<Box<dyn LiveHandle>, ExecApiError>,
    ) -> bool {
        if self.connecting.as_ref().map(|pending| pending.handle_id) != Some(handle_id) {
            if let Ok(mut handle) = result {
                handle.disconnect();
            }
            return false;
        }
        let Some(pending) = self.connecting.take() else {
            return false;
        };
        let dispatch = pending.dispatch.filter(|(run_id, _)| {
            self.session.state() == &SessionState::Connecting { run_id: *run_id }
        });

        match result {
            Ok(handle) => {
                tracing::info!(handle_id, "live channel ready");
                self.live_failures = 0;
                self.live_suspended = false;
                self.live = Some(LiveSlot {
                    handle_id,
                    handle,
                    run_id: None,
                    awaiting_complete: false,
                });
                match dispatch {
                    Some((run_id, request)) => self.dispatch_live(run_id, request).is_ok(),
                    None => false,
                }
            }
            Err(error) => {
                self.live_failures += 1;
                tracing::warn!(
                    error = %error,
                    failures = self.live_failures,
                    "live channel connect failed"
                );
                if self.live_failures >= self.config.max_live_connect_attempts {
                    self.live_suspended = true;
                    tracing::warn!("live channel suspended, runs use request/response");
                }
                match dispatch {
                    Some((run_id, request)) => self.dispatch_batch(run_id, request).is_ok(),
                    None => false,
                }
            }
        }
    }

    fn on_batch_result(
        &mut self,
        run_id: RunId,
        result: Result<RunOutcome, ExecApiError>,
    ) -> bool {
        if self.session.active_run() != Some(run_id) {
            tracing::debug!(run_id, "dropping result of an abandoned run");
            return false;
        }
        self.batch_task = None;

        match result {
            Ok(outcome) => {
                self.session
                    .set_execution_time(run_id, outcome.execution_time_seconds);
                for step in outcome_replay(outcome) {
                    match step {
                        Replay::Event(event) => self.session.on_event(run_id, event),
                        Replay::Stderr(content) => self.session.append_stderr(run_id, &content),
                    };
                }
            }
            Err(error) => {
                tracing::warn!(run_id, error = %error, "request/response run failed");
                self.session
                    .fail(run_id, RunFailure::new(failure_kind(&error), error.to_string()));
            }
        }
        true
    }

    fn on_watchdog(&mut self, run_id: RunId, epoch: u64) -> bool {
        if epoch != self.watchdog_epoch || self.session.active_run() != Some(run_id) {
            return false;
        }
        self.watchdog = None;

        let seconds = self
            .config
            .run_timeout
            .map(|timeout| timeout.as_secs())
            .unwrap_or_default();
        tracing::warn!(run_id, seconds, "run timed out");

        if let Some(task) = self.batch_task.take() {
            task.abort();
        }
        if let Some(pending) = self.connecting.take() {
            pending.task.abort();
        }
        if self.live.as_ref().is_some_and(|slot| slot.run_id == Some(run_id)) {
            self.drop_live();
        }
        self.session.fail(
            run_id,
            RunFailure::new(
                FailureKind::TimedOut,
                format!("run timed out after {seconds}s without a response"),
            ),
        )
    }

    fn dispatch_live(
        &mut self,
        run_id: RunId,
        request: ExecutionRequest,
    ) -> Result<(), SessionError> {
        self.session.begin_run(run_id, RunRoute::Live)?;
        if let Some(slot) = self.live.as_mut() {
            slot.run_id = Some(run_id);
            slot.awaiting_complete = true;
            slot.handle.send(&request);
        }
        tracing::info!(run_id, language = %request.language, "run sent over live channel");
        Ok(())
    }

    fn dispatch_batch(
        &mut self,
        run_id: RunId,
        request: ExecutionRequest,
    ) -> Result<(), SessionError> {
        self.session.begin_run(run_id, RunRoute::Batch)?;
        if request.compile_only {
            self.session
                .fail(run_id, RunFailure::new(FailureKind::Local, COMPILE_ONLY_NEEDS_LIVE));
            return Ok(());
        }

        tracing::info!(run_id, language = %request.language, "run sent over request/response");
        let executor = Arc::clone(&self.executor);
        let tx = self.envelopes_tx.clone();
        self.batch_task = Some(tokio::spawn(async move {
            let result = executor.run(&request).await;
            let _ = tx.send(Envelope::Batch { run_id, result });
        }));
        Ok(())
    }

    fn should_connect_live(&self) -> bool {
        self.config.prefer_live && self.connector.is_some() && !self.live_suspended
    }

    fn open_live(&mut self, dispatch: Option<(RunId, ExecutionRequest)>) {
        let Some(connector) = self.connector.clone() else {
            return;
        };
        let handle_id = self.next_handle_id;
        self.next_handle_id += 1;

        let events_tx = self.envelopes_tx.clone();
        let on_event: ChannelEventSink = Box::new(move |event| {
            let _ = events_tx.send(Envelope::Live { handle_id, event });
        });
        let tx = self.envelopes_tx.clone();
        let task = tokio::spawn(async move {
            let result = connector.connect(on_event).await;
            let _ = tx.send(Envelope::Connected { handle_id, result });
        });

        self.connecting = Some(PendingConnect {
            handle_id,
            dispatch,
            task,
        });
    }

    /// Disconnects and forgets the live handle. Returns the run that was
    /// still waiting on it.
    fn drop_live(&mut self) -> Option<RunId> {
        let mut slot = self.live.take()?;
        slot.handle.disconnect();
        slot.run_id.filter(|_| slot.awaiting_complete)
    }

    fn sync_watchdog(&mut self) {
        match self.session.state() {
            SessionState::Connecting { run_id } | SessionState::Running { run_id } => {
                let run_id = *run_id;
                self.arm_watchdog(run_id);
            }
            _ => self.cancel_watchdog(),
        }
    }

    fn arm_watchdog(&mut self, run_id: RunId) {
        self.cancel_watchdog();
        let Some(timeout) = self.config.run_timeout else {
            return;
        };
        let epoch = self.watchdog_epoch;
        let tx = self.envelopes_tx.clone();
        self.watchdog = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Envelope::Watchdog { run_id, epoch });
        }));
    }

    fn cancel_watchdog(&mut self) {
        self.watchdog_epoch += 1;
        if let Some(task) = self.watchdog.take() {
            task.abort();
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.session.clone());
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(task) = self.watchdog.take() {
            task.abort();
        }
        if let Some(task) = self.batch_task.take() {
            task.abort();
        }
        if let Some(pending) = self.connecting.take() {
            pending.task.abort();
        }
        self.drop_live();
    }
}

enum Replay {
    Event(SessionEvent),
    /// Stderr of a run that still succeeded.
    Stderr(String),
}

/// Replays a request/response result as the events a live run would have
/// produced. The result's `success` flag alone decides how the run ends.
fn outcome_replay(outcome: RunOutcome) -> Vec<Replay> {
    let mut steps = Vec::new();
    if !outcome.output.is_empty() {
        steps.push(Replay::Event(SessionEvent::Output {
            content: outcome.output,
        }));
    }
    if !outcome.error.is_empty() {
        steps.push(if outcome.success {
            Replay::Stderr(outcome.error)
        } else {
            Replay::Event(SessionEvent::Error {
                content: outcome.error,
            })
        });
    }
    if outcome.input_exhausted {
        steps.push(Replay::Event(SessionEvent::InputRequired {
            prompt: String::new(),
        }));
    }
    let mut exit_info = Map::new();
    exit_info.insert(
        "execution_time".to_string(),
        Value::from(outcome.execution_time_seconds),
    );
    steps.push(Replay::Event(SessionEvent::Complete {
        success: outcome.success,
        exit_info,
    }));
    steps
}

fn failure_kind(error: &ExecApiError) -> FailureKind {
    if error.is_unavailable() {
        FailureKind::Unavailable
    } else if error.status().is_some_and(|status| status.is_client_error()) {
        FailureKind::Rejected
    } else {
        FailureKind::Transport
    }
}
