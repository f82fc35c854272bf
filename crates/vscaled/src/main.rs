//! vscaled: the vertical autoscaling daemon.
//!
//! Single binary that assembles every vscale subsystem:
//! - Configuration loading and validation
//! - Provider gateway (contract, discovery, resize)
//! - Prometheus usage source and BigBlueButton activity probe
//! - Autoscaler control loop
//! - `/metrics` endpoint
//!
//! # Usage
//!
//! ```text
//! vscaled run --config /etc/vscale/vscale.toml
//! vscaled check --config /etc/vscale/vscale.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vscale_metrics::ScalerMetrics;

#[derive(Parser)]
#[command(name = "vscaled", about = "Vertical autoscaler daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop and serve /metrics until Ctrl-C.
    Run {
        /// Path to the configuration file.
        #[arg(long, default_value = "vscale.toml")]
        config: PathBuf,

        /// Log output format.
        #[arg(long, value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,
    },
    /// Validate the configuration file and exit.
    Check {
        /// Path to the configuration file.
        #[arg(long, default_value = "vscale.toml")]
        config: PathBuf,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, log_format } => {
            init_tracing(log_format);
            run(&config).await
        }
        Command::Check { config } => {
            init_tracing(LogFormat::Text);
            vscaled::load_config(&config)
                .with_context(|| format!("invalid configuration {}", config.display()))?;
            info!("configuration is valid");
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vscaled=debug,vscale=debug"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

async fn run(config_path: &Path) -> anyhow::Result<()> {
    info!("vscale daemon starting");

    let config = vscaled::load_config(config_path)
        .with_context(|| format!("invalid configuration {}", config_path.display()))?;

    // ── Initialize subsystems ──────────────────────────────────

    let telemetry = Arc::new(ScalerMetrics::new());
    let scaler = vscaled::build_autoscaler(&config, telemetry.clone())
        .await
        .context("provider initialization failed")?;
    info!(
        interval_secs = config.app.cycle_time_seconds,
        "autoscaler initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start control loop ─────────────────────────────────────

    let interval = config.cycle_interval();
    let scaler_handle = tokio::spawn(async move {
        scaler.run(interval, shutdown_rx).await;
    });

    // ── Start metrics server ───────────────────────────────────

    let router = vscaled::build_router(telemetry);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.app.metrics_exporter_port));

    info!(%addr, "metrics server starting");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "cannot install Ctrl-C handler");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // The loop finishes its in-flight object before exiting.
    let _ = scaler_handle.await;

    info!("vscale daemon stopped");
    Ok(())
}
