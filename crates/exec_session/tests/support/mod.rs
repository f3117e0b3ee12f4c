#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use exec_api::{
    ChannelEvent, ChannelEventSink, ExecApiError, ExecutionRequest, HintReply, HintRequest,
    RunOutcome, SessionEvent,
};
use exec_session::{BatchExecutor, LiveConnector, LiveHandle, SessionConfig, SessionController};

#[derive(Default)]
pub struct LiveTrace {
    /// Scripted connect answers; `true` once exhausted.
    pub connect_script: VecDeque<bool>,
    pub connect_calls: usize,
    pub sinks: Vec<ChannelEventSink>,
    pub sent: Vec<(usize, ExecutionRequest)>,
    pub inputs: Vec<(usize, String)>,
    pub disconnected: Vec<usize>,
    pub closed: Vec<usize>,
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<LiveTrace>>,
}

impl FakeConnector {
    pub fn with_script(script: &[bool]) -> Self {
        let connector = Self::default();
        lock_unpoisoned(&connector.state).connect_script = script.iter().copied().collect();
        connector
    }

    pub fn trace(&self) -> MutexGuard<'_, LiveTrace> {
        lock_unpoisoned(&self.state)
    }

    /// Delivers an event as if handle `index` had received it.
    pub fn emit(&self, index: usize, event: ChannelEvent) {
        let mut state = lock_unpoisoned(&self.state);
        let Some(sink) = state.sinks.get_mut(index) else {
            panic!("no live handle {index}");
        };
        sink(event);
    }

    pub fn emit_session(&self, index: usize, event: SessionEvent) {
        self.emit(index, ChannelEvent::Session(event));
    }

    /// Remote close of handle `index`.
    pub fn close(&self, index: usize) {
        lock_unpoisoned(&self.state).closed.push(index);
        self.emit(index, ChannelEvent::Closed { reason: None });
    }
}

#[async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(
        &self,
        on_event: ChannelEventSink,
    ) -> Result<Box<dyn LiveHandle>, ExecApiError> {
        let mut state = lock_unpoisoned(&self.state);
        state.connect_calls += 1;
        if !state.connect_script.pop_front().unwrap_or(true) {
            return Err(ExecApiError::Live("connection refused".to_string()));
        }
        let id = state.sinks.len();
        state.sinks.push(on_event);
        Ok(Box::new(FakeHandle {
            id,
            state: Arc::clone(&self.state),
            open: true,
        }))
    }
}

struct FakeHandle {
    id: usize,
    state: Arc<Mutex<LiveTrace>>,
    open: bool,
}

impl LiveHandle for FakeHandle {
    fn send(&self, request: &ExecutionRequest) {
        lock_unpoisoned(&self.state)
            .sent
            .push((self.id, request.clone()));
    }

    fn send_input(&self, text: &str) {
        lock_unpoisoned(&self.state)
            .inputs
            .push((self.id, text.to_string()));
    }

    fn is_connected(&self) -> bool {
        self.open && !lock_unpoisoned(&self.state).closed.contains(&self.id)
    }

    fn disconnect(&mut self) {
        if self.open {
            self.open = false;
            lock_unpoisoned(&self.state).disconnected.push(self.id);
        }
    }
}

#[derive(Default)]
pub struct BatchTrace {
    /// Scripted results; runs past the script never finish.
    pub runs: VecDeque<Result<RunOutcome, ExecApiError>>,
    pub hints: VecDeque<Result<HintReply, ExecApiError>>,
    pub run_requests: Vec<ExecutionRequest>,
    pub hint_requests: Vec<HintRequest>,
}

#[derive(Clone, Default)]
pub struct FakeExecutor {
    state: Arc<Mutex<BatchTrace>>,
}

impl FakeExecutor {
    pub fn with_runs(runs: Vec<Result<RunOutcome, ExecApiError>>) -> Self {
        let executor = Self::default();
        lock_unpoisoned(&executor.state).runs = runs.into();
        executor
    }

    pub fn push_hint(&self, reply: Result<HintReply, ExecApiError>) {
        lock_unpoisoned(&self.state).hints.push_back(reply);
    }

    pub fn trace(&self) -> MutexGuard<'_, BatchTrace> {
        lock_unpoisoned(&self.state)
    }
}

#[async_trait]
impl BatchExecutor for FakeExecutor {
    async fn run(&self, request: &ExecutionRequest) -> Result<RunOutcome, ExecApiError> {
        let next = {
            let mut state = lock_unpoisoned(&self.state);
            state.run_requests.push(request.clone());
            state.runs.pop_front()
        };
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn request_hint(&self, request: &HintRequest) -> Result<HintReply, ExecApiError> {
        let next = {
            let mut state = lock_unpoisoned(&self.state);
            state.hint_requests.push(request.clone());
            state.hints.pop_front()
        };
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }
}

pub fn outcome(output: &str, error: &str, success: bool) -> RunOutcome {
    RunOutcome {
        output: output.to_string(),
        error: error.to_string(),
        success,
        execution_time_seconds: 0.25,
        input_exhausted: false,
    }
}

pub fn live_controller(
    executor: &FakeExecutor,
    connector: &FakeConnector,
    config: SessionConfig,
) -> SessionController {
    SessionController::new(
        Arc::new(executor.clone()),
        Some(Arc::new(connector.clone())),
        config,
    )
}

pub fn batch_controller(executor: &FakeExecutor, config: SessionConfig) -> SessionController {
    SessionController::new(
        Arc::new(executor.clone()),
        None,
        config.with_prefer_live(false),
    )
}

/// No watchdog, so tests do not depend on wall-clock time.
pub fn untimed() -> SessionConfig {
    SessionConfig::default().with_run_timeout(None)
}

pub fn output(content: &str) -> SessionEvent {
    SessionEvent::Output {
        content: content.to_string(),
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
