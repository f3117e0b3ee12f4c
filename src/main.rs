use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use code_runner::presentation::{hint_text, stats_line, status_line};
use code_runner::{logging, request_from_file, EnvConfig, TranscriptPrinter};
use exec_api::{ExecApiClient, Language};
use exec_session::{
    HintStatus, LiveConnector, SessionController, SessionState, WebSocketConnector,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Parser)]
#[command(
    name = "code_runner",
    version,
    about = "Run a source file on a remote execution service"
)]
struct Cli {
    /// Source file to submit.
    file: PathBuf,
    /// c, cpp, python or java; inferred from the file extension when omitted.
    #[arg(short, long)]
    language: Option<Language>,
    /// Program input sent with the run; a trailing newline is added.
    #[arg(short, long)]
    input: Option<String>,
    /// Compile without running (compiled languages, live channel only).
    #[arg(long)]
    compile_only: bool,
    /// Ask for a hint on this exercise when the run fails.
    #[arg(long, value_name = "EXERCISE_ID")]
    hint: Option<String>,
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,
    #[arg(long, value_name = "URL")]
    live_url: Option<String>,
    /// Always use request/response.
    #[arg(long)]
    no_live: bool,
    /// Idle watchdog in seconds; 0 disables it.
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, mut config: EnvConfig) -> EnvConfig {
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(live_url) = &self.live_url {
            config.live_url = Some(live_url.clone());
        }
        if self.no_live {
            config.prefer_live = false;
        }
        if let Some(seconds) = self.timeout {
            config.run_timeout = (seconds > 0).then(|| Duration::from_secs(seconds));
        }
        config
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    let result = runtime.block_on(run(cli));
    // Stdin reads cannot be cancelled; do not wait for them.
    runtime.shutdown_background();
    result
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = cli.apply_overrides(EnvConfig::from_env());

    let mut request =
        request_from_file(&cli.file, cli.language)?.with_compile_only(cli.compile_only);
    if let Some(input) = &cli.input {
        request = request.with_input(input.clone());
    }
    let language = request.language;

    let api_config = config.exec_api_config();
    let client = ExecApiClient::new(api_config.clone()).context("failed to build HTTP client")?;
    let connector: Option<Arc<dyn LiveConnector>> = if config.prefer_live {
        Some(Arc::new(WebSocketConnector::new(api_config)))
    } else {
        None
    };
    let mut controller =
        SessionController::new(Arc::new(client), connector, config.session_config());

    controller.start_run(request)?;

    let stdin = std::io::stdin();
    let mut printer = TranscriptPrinter::new(!stdin.is_terminal());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        write_stdout(&printer.render_update(controller.session()))?;
        if !controller.session().state().is_in_flight() {
            break;
        }

        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if let Err(error) = controller.submit_input(&line) {
                        tracing::warn!(error = %error, "input not forwarded");
                    }
                }
                Ok(None) => {
                    stdin_open = false;
                    controller.close_input();
                }
                Err(error) => {
                    tracing::warn!(error = %error, "stdin closed");
                    stdin_open = false;
                    controller.close_input();
                }
            },
            () = controller.process_next() => {}
        }
    }

    let mut summary = String::new();
    if !printer.at_line_start() {
        summary.push('\n');
    }
    if let Some(status) = status_line(controller.session()) {
        summary.push_str(&status);
        summary.push('\n');
    }
    write_stdout(&summary)?;

    let failed = matches!(controller.session().state(), SessionState::Failed { .. });
    if failed && cli.hint.is_some() {
        controller.request_hint(cli.hint.as_deref(), language)?;
        while matches!(controller.session().hint(), HintStatus::Pending) {
            controller.process_next().await;
        }
        if let Some(hint) = hint_text(controller.session().hint()) {
            write_stdout(&format!("{hint}\n"))?;
        }
    }

    tracing::debug!(stats = %stats_line(controller.session().stats()), "session finished");
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn write_stdout(text: &str) -> anyhow::Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
