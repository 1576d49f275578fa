//! # runlet-server
//!
//! Execution backend binary: accepts WebSocket submissions and streams run
//! output back.

#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use runlet_server::config::ServerConfig;
use runlet_server::runner::CommandRunner;
use runlet_server::server::RunletServer;

/// Runlet execution backend.
#[derive(Parser, Debug)]
#[command(name = "runlet-server", about = "Runlet execution backend")]
struct Cli {
    /// Host to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Runner command; `{file}` is replaced with the staged source path.
    /// Split on whitespace.
    #[arg(long, default_value = "go run {file}")]
    runner: String,

    /// File name the submitted source is staged under.
    #[arg(long, default_value = "main.go")]
    source_file: String,

    /// Kill runs that exceed this many seconds.
    #[arg(long, default_value = "120")]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    runlet_core::logging::init_subscriber("info");

    let cli = Cli::parse();
    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        runner: cli.runner.split_whitespace().map(str::to_owned).collect(),
        source_file: cli.source_file,
        timeout_secs: cli.timeout_secs,
        ..ServerConfig::default()
    };

    let metrics = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|err| {
            tracing::warn!(error = %err, "metrics recorder unavailable");
            err
        })
        .ok();

    let runner = Arc::new(CommandRunner::new(
        config.runner.clone(),
        config.source_file.clone(),
    ));
    tracing::info!(runner = %config.runner.join(" "), "runner configured");

    let server = RunletServer::new(config, runner, metrics);
    let (addr, handle) = server.listen().await?;
    tracing::info!("ready at ws://{addr}/ws");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    handle.abort();
    Ok(())
}
