//! # roomcast-gateway
//!
//! Gateway binary: loads settings, starts logging and metrics, wires the
//! public room service onto an AMQP consumer and serves WebSocket clients
//! until Ctrl-C or a component failure.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use roomcast_broker::{JsonDecoder, LapinConnector};
use roomcast_core::logging::{LogFormat, init_subscriber};
use roomcast_server::metrics::install_recorder;
use roomcast_server::{Gateway, ShutdownTrigger};
use roomcast_settings::{GatewaySettings, load_settings_from_path, settings_path};
use tracing::{error, info, warn};

/// AMQP to WebSocket room fanout gateway.
#[derive(Parser, Debug)]
#[command(name = "roomcast-gateway", about = "AMQP to WebSocket room fanout gateway")]
struct Cli {
    /// Settings file (defaults to `~/.roomcast/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings, 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Log filter, e.g. `debug` or `roomcast_server=trace` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    /// Also append logs to this file (overrides settings).
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Settings file, then env, then command-line flags.
fn resolve_settings(cli: &Cli) -> Result<GatewaySettings> {
    let path = cli.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    if let Some(host) = &cli.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level.clone_from(level);
    }
    if cli.json_logs {
        settings.logging.format = LogFormat::Json;
    }
    if let Some(file) = &cli.log_file {
        settings.logging.file = Some(file.clone());
    }
    Ok(settings)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        // Without a handler the gateway only stops on component failure
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;

    init_subscriber(
        &settings.logging.level,
        settings.logging.format,
        settings.logging.file.as_deref(),
    )
    .context("Failed to open log file")?;
    let metrics = install_recorder().context("Failed to install metrics recorder")?;

    let connector = LapinConnector::new(&settings.broker);
    let running = Gateway::new(settings, connector, JsonDecoder)
        .with_metrics(metrics)
        .start()
        .await
        .context("Failed to bind listener")?;

    info!("roomcast gateway listening on ws://{}/ws", running.local_addr());

    let summary = running.run(shutdown_signal()).await;
    if summary.timed_out {
        warn!("some tasks were aborted after the shutdown timeout");
    }
    match summary.trigger {
        ShutdownTrigger::ComponentFailure => {
            for report in &summary.reports {
                error!(%report, "shutdown cause");
            }
            bail!("gateway stopped after {} component failure(s)", summary.reports.len());
        }
        trigger => {
            info!(%trigger, "shutdown complete");
            Ok(())
        }
    }
}
