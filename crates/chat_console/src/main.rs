use std::io::{self, Write};
use std::process::ExitCode;

use chat_console::backends;
use chat_console::cli::{Cli, Command};
use chat_console::render::TranscriptPrinter;
use chat_stream::{
    AttachOutcome, CancellationToken, HistoryState, RunAdapter, RunInput, RunStream,
    RuntimeConfig, SessionResumeDetector, ThreadMessage, TurnInput,
};
use clap::Parser;
use futures_util::StreamExt;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let command = Cli::parse().into_command();

    let backend = match backends::backend_from_env() {
        Ok(backend) => backend,
        Err(error) => {
            eprintln!("{error}");
            return ExitCode::FAILURE;
        }
    };
    let profile = backend.profile();
    tracing::info!(
        backend = %profile.backend_id,
        endpoint = profile.endpoint.as_deref().unwrap_or("-"),
        "backend selected"
    );

    let adapter = RunAdapter::with_config(backend, RuntimeConfig::from_env());
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received; cancelling run");
                cancel.cancel();
            }
        }
    });

    match command {
        Command::Send {
            conversation_id,
            text,
        } => {
            let input = RunInput::Turn(TurnInput::new(vec![ThreadMessage::user(text)]));
            match adapter.run(&conversation_id, input, cancel.clone()) {
                Ok(stream) => print_stream(stream).await,
                Err(error) => {
                    eprintln!("error: {error}");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Attach {
            conversation_id,
            anchor,
        } => {
            let (_history_tx, history) =
                watch::channel(HistoryState::Loaded(vec![ThreadMessage::user(anchor)]));
            let detector = SessionResumeDetector::new(adapter);
            match detector.attach(&conversation_id, history, cancel.clone()).await {
                Ok(AttachOutcome::Resumed(stream)) => print_stream(stream).await,
                Ok(outcome) => {
                    println!("nothing to resume: {}", describe(&outcome));
                    ExitCode::SUCCESS
                }
                Err(error) => {
                    eprintln!("error: {error}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

async fn print_stream(mut stream: RunStream) -> ExitCode {
    let mut printer = TranscriptPrinter::new();
    let mut stdout = io::stdout();

    while let Some(item) = stream.next().await {
        match item {
            Ok(update) => {
                let chunk = printer.next_chunk(&update);
                if !chunk.is_empty() {
                    let _ = stdout.write_all(chunk.as_bytes());
                    let _ = stdout.flush();
                }
            }
            Err(error) => {
                let _ = writeln!(stdout);
                eprintln!("error: {error}");
                return ExitCode::FAILURE;
            }
        }
    }

    let _ = writeln!(stdout);
    tracing::info!(phase = ?stream.phase(), "run finished");
    ExitCode::SUCCESS
}

fn describe(outcome: &AttachOutcome) -> String {
    match outcome {
        AttachOutcome::Resumed(_) => "resumed".to_string(),
        AttachOutcome::NoActiveSession => "no active session".to_string(),
        AttachOutcome::Inactive(status) => format!("session is {}", status.as_str()),
        AttachOutcome::HistoryTimeout => "history did not load in time".to_string(),
        AttachOutcome::NoUserMessage => "history has no user message".to_string(),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}
