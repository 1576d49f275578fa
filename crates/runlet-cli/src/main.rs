//! # runlet
//!
//! Terminal client for a runlet server: submits a source file and streams
//! the run's output live, mirroring what the browser client renders.

#![deny(unsafe_code)]

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use runlet_client::driver::{Driver, ScreenEvent};
use runlet_core::protocol::RunStatus;

/// Run a source file on a runlet server.
#[derive(Parser, Debug)]
#[command(name = "runlet", about = "Run a source file on a runlet server")]
struct Cli {
    /// Source file to submit.
    file: PathBuf,

    /// WebSocket endpoint of the server.
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    runlet_core::logging::init_subscriber("warn");
    let cli = Cli::parse();

    let source = std::fs::read_to_string(&cli.file)
        .with_context(|| format!("failed to read {}", cli.file.display()))?;

    let (driver, mut events) = Driver::connect(&cli.url)
        .await
        .with_context(|| format!("failed to connect to {}", cli.url))?;

    driver.submit(source).await.context("submission rejected")?;

    let mut stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        match event {
            ScreenEvent::Append(text) => {
                print!("{text}");
                let _ = stdout.flush();
            }
            ScreenEvent::Cleared => {
                // The terminal equivalent of the form-feed reset.
                print!("\x1b[2J\x1b[H");
                let _ = stdout.flush();
            }
            ScreenEvent::Finished(status) => {
                driver.close().await;
                if !status.success() {
                    eprintln!("run finished: {status}");
                }
                return Ok(ExitCode::from(exit_code(&status)));
            }
            ScreenEvent::ConnectionLost(reason) => {
                anyhow::bail!("connection lost: {reason}");
            }
        }
    }

    anyhow::bail!("event stream ended before the run finished")
}

/// Map a run status onto a process exit code.
fn exit_code(status: &RunStatus) -> u8 {
    match status {
        RunStatus::Exited(code) => u8::try_from(*code).unwrap_or(1),
        RunStatus::TimedOut => 124,
        RunStatus::Other(_) => 1,
    }
}
