//! Plain-text projection of a [`Session`] for a line-oriented terminal.
//!
//! The printer never holds execution state: every call receives the latest
//! session snapshot and returns only the text that has not been written yet.

use exec_session::{
    FailureKind, HintStatus, RunId, RunStats, Session, SessionState, TranscriptEntry,
};

pub const ERROR_PREFIX: &str = "[ERROR] ";

#[derive(Debug, Clone)]
pub struct TranscriptPrinter {
    echo_input: bool,
    run_id: Option<RunId>,
    /// Entries written in full.
    complete: usize,
    /// Bytes written of the trailing output entry, which may still grow.
    partial: usize,
    at_line_start: bool,
    prompted_at: Option<usize>,
}

impl TranscriptPrinter {
    /// `echo_input` repeats submitted lines; a terminal that already shows
    /// what the user typed should pass `false`.
    pub fn new(echo_input: bool) -> Self {
        Self {
            echo_input,
            run_id: None,
            complete: 0,
            partial: 0,
            at_line_start: true,
            prompted_at: None,
        }
    }

    pub fn at_line_start(&self) -> bool {
        self.at_line_start
    }

    /// Text added since the previous call, followed by the input prompt when
    /// the program is waiting for a line.
    pub fn render_update(&mut self, session: &Session) -> String {
        let run_id = session.state().run_id();
        let entries = session.transcript();
        if run_id != self.run_id || entries.len() < self.complete {
            self.restart();
            self.run_id = run_id;
        }

        let mut out = self.render_entries(entries);
        if let Some(prompt) = session.prompt() {
            if self.prompted_at != Some(entries.len()) {
                self.prompted_at = Some(entries.len());
                self.push(&mut out, prompt);
            }
        }
        out
    }

    fn render_entries(&mut self, entries: &[TranscriptEntry]) -> String {
        let mut out = String::new();
        while let Some(entry) = entries.get(self.complete) {
            let is_last = self.complete + 1 == entries.len();
            match entry {
                TranscriptEntry::Output(text) => {
                    self.push(&mut out, text.get(self.partial..).unwrap_or_default());
                    if is_last {
                        self.partial = text.len();
                        break;
                    }
                }
                TranscriptEntry::Error(text) => {
                    if !self.at_line_start {
                        self.push(&mut out, "\n");
                    }
                    self.push(&mut out, ERROR_PREFIX);
                    self.push(&mut out, text);
                    if !text.ends_with('\n') {
                        self.push(&mut out, "\n");
                    }
                }
                TranscriptEntry::Input(text) => {
                    if self.echo_input {
                        self.push(&mut out, text);
                        self.push(&mut out, "\n");
                    } else {
                        // The terminal echoed the line and its newline.
                        self.at_line_start = true;
                    }
                }
            }
            self.complete += 1;
            self.partial = 0;
        }
        out
    }

    fn push(&mut self, out: &mut String, text: &str) {
        if let Some(last) = text.chars().last() {
            self.at_line_start = last == '\n';
        }
        out.push_str(text);
    }

    fn restart(&mut self) {
        self.complete = 0;
        self.partial = 0;
        self.prompted_at = None;
    }
}

/// Renders a whole transcript: output verbatim, errors on their own
/// `[ERROR]` line, input lines echoed with their newline.
pub fn render_transcript(entries: &[TranscriptEntry]) -> String {
    let mut printer = TranscriptPrinter::new(true);
    printer.render_entries(entries)
}

/// One-line summary of a finished run.
pub fn status_line(session: &Session) -> Option<String> {
    let timing = session
        .execution_time_seconds()
        .map(|seconds| format!(" in {seconds:.2}s"))
        .unwrap_or_default();
    match session.state() {
        SessionState::Completed { .. } => Some(format!("[completed{timing}]")),
        SessionState::Failed { .. } => {
            let reason = session
                .last_failure()
                .map(|failure| failure_label(failure.kind))
                .unwrap_or("failed");
            Some(format!("[{reason}{timing}]"))
        }
        _ => None,
    }
}

pub fn failure_label(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Remote => "program failed",
        FailureKind::Unavailable => "service unavailable",
        FailureKind::Rejected => "request rejected",
        FailureKind::Transport => "connection lost",
        FailureKind::TimedOut => "timed out",
        FailureKind::InputClosed => "input closed",
        FailureKind::Local => "not run",
    }
}

pub fn stats_line(stats: RunStats) -> String {
    format!(
        "runs: {}  succeeded: {}  failed: {}  hints: {}",
        stats.total_runs, stats.success_count, stats.error_count, stats.hints_requested
    )
}

pub fn hint_text(hint: &HintStatus) -> Option<String> {
    match hint {
        HintStatus::Ready(reply) => Some(match reply.source.as_deref() {
            Some(source) if !source.is_empty() => format!("Hint ({source}): {}", reply.hint),
            _ => format!("Hint: {}", reply.hint),
        }),
        HintStatus::Failed(message) => {
            Some(format!("{ERROR_PREFIX}hint request failed: {message}"))
        }
        HintStatus::None | HintStatus::Pending => None,
    }
}
