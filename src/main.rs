//! App Poller — keeps an executor's app code in sync with its source.
//!
//! Reads the YAML config, waits for the executor to come up, then polls
//! the configured app location (local directory, S3 or GCS) on a fixed
//! interval, mirroring changes into the download directory and telling
//! the executor to reload.
//!
//! Exit codes:
//! - 0: stopped cleanly (Ctrl-C)
//! - 1: executor never became healthy
//! - 2: invalid configuration
//! - 3: resource handler fault

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod config;
mod error;
mod handler;
mod location;
mod logging;
mod poller;

#[cfg(test)]
mod test_support;

use config::{PollerConfig, PollerSettings};
use error::PollerError;
use handler::ResourceHandler;
use location::AppLocation;
use poller::Poller;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the poller YAML config.
    #[arg(short, long, env = "POLLER_CONFIG", default_value = "config/poller.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let stop = CancellationToken::new();
    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("🛑 Shutdown requested, stopping after the current iteration");
                ctrl_c_stop.cancel();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    let outcome = start(
        || PollerConfig::load(&args.config),
        install_logging,
        handler::for_location,
        stop,
    )
    .await;

    match outcome {
        Ok(()) => {
            info!("👋 App Poller stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            // Logging may not be up yet for setup failures.
            if e.is_config_error() {
                eprintln!("app-poller: {}", e);
            }
            error!("❌ {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn install_logging(config: &PollerConfig) -> error::Result<Option<WorkerGuard>> {
    let (subscriber, guard) =
        logging::build_subscriber(&config.logging).map_err(PollerError::Logging)?;
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| PollerError::Logging(e.into()))?;
    Ok(guard)
}

/// Startup sequence: config, logging, handler, then the poller. The
/// executor is not contacted until the handler has been built, and a
/// config failure stops everything before that.
async fn start<G>(
    load_config: impl FnOnce() -> error::Result<PollerConfig>,
    init_logging: impl FnOnce(&PollerConfig) -> error::Result<G>,
    build_handler: impl FnOnce(&AppLocation, &PollerSettings) -> anyhow::Result<Box<dyn ResourceHandler>>,
    stop: CancellationToken,
) -> error::Result<()> {
    // ── Config ──────────────────────────────────────────────────────
    let config = load_config()?;

    // ── Logging ─────────────────────────────────────────────────────
    let _log_guard = init_logging(&config)?;

    info!("📦 App Poller v{}", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        location = %config.app_location,
        executor = %config.settings.executor_url_redacted(),
        interval_secs = config.settings.poll_interval.as_secs_f64(),
        download_dir = %config.settings.download_location.display(),
        "Configuration loaded"
    );

    // ── Resource Handler ────────────────────────────────────────────
    let handler = build_handler(&config.app_location, &config.settings).map_err(|source| {
        PollerError::HandlerSetup { backend: config.app_location.backend(), source }
    })?;

    // ── Poller ──────────────────────────────────────────────────────
    let poller = Poller::new(config.app_location, handler, config.settings.poll_interval);
    let status = poller.status();

    let outcome = match tokio::spawn(poller.run(stop)).await {
        Ok(result) => result,
        Err(e) => Err(PollerError::Handler(anyhow::anyhow!("poller task panicked: {}", e))),
    };

    let s = status.borrow().clone();
    info!(
        phase = ?s.phase,
        startup_attempts = s.startup_attempts,
        iterations = s.iterations,
        polls = s.polls,
        "Poller summary"
    );
    outcome
}
