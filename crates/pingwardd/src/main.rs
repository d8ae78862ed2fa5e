//! pingwardd — the pingward daemon.
//!
//! Single binary that assembles the watchdog:
//! - Client registry + upstream refresher
//! - Liveness sweeps and the connection sequencer (tick loop)
//! - Resilient outbound fetch + notification sink
//! - Inbound REST API
//!
//! # Usage
//!
//! ```text
//! pingwardd run --config /etc/pingward/pingward.toml --port 9000
//! pingwardd config --config /etc/pingward/pingward.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use pingward_core::PingwardConfig;
use pingward_health::Watchdog;

#[derive(Parser)]
#[command(name = "pingwardd", about = "pingward fleet liveness watchdog")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the watchdog and its API server.
    Run {
        /// Configuration file (TOML). Defaults apply when omitted.
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Port to listen on, overriding the configuration.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the effective configuration after environment overrides.
    Config {
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,pingward=debug,pingwardd=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, port } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            run(config).await
        }
        Command::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PingwardConfig> {
    let mut config = match path {
        Some(path) => PingwardConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PingwardConfig::default(),
    };
    config.apply_env().context("applying environment overrides")?;
    config.validate()?;
    Ok(config)
}

async fn run(config: PingwardConfig) -> anyhow::Result<()> {
    info!(service = %config.notify.service_name, "pingward daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let sink = pingward_notify::sink_from_config(&config.notify);
    let watchdog = Watchdog::from_config(&config, sink);
    info!(
        registry_url = ?config.upstream.registry_url,
        services = config.services.len(),
        "watchdog initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    // Registry refresh loop (refreshes immediately, then periodically).
    let refresher = watchdog.refresher().clone();
    let refresh_interval = config.upstream.refresh_interval();
    let refresh_shutdown = shutdown_rx.clone();
    let refresh_handle = tokio::spawn(async move {
        refresher.run(refresh_interval, refresh_shutdown).await;
    });

    // Tick loop: drains and sweeps.
    let ticker = watchdog.clone();
    let tick_interval = config.monitor.tick_interval();
    let tick_shutdown = shutdown_rx.clone();
    let tick_handle = tokio::spawn(async move {
        ticker.run(tick_interval, tick_shutdown).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = pingward_api::build_router(watchdog, &config.notify.service_name);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    for (task, handle) in [("registry refresh", refresh_handle), ("tick loop", tick_handle)] {
        if let Err(e) = handle.await {
            error!(task, error = %e, "background task failed");
        }
    }

    info!("pingward daemon stopped");
    Ok(())
}
