//! rota-fetch - Entry Point
//!
//! Scans the links directory, then fetches captions and metadata for every
//! target through the configured proxies. Exits 1 when every proxy is
//! exhausted, 130 on Ctrl+C/SIGTERM and 2 on configuration errors.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rota_fetch::config::LogConfig;
use rota_fetch::services::{scan_links_dir, BatchOperations, BatchRunner, ResultStore};
use rota_fetch::upstream::{ProbeOperation, YoutubeApi};
use rota_fetch::{Config, FetchClient, RotaError};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();
    let log = config
        .as_ref()
        .map(|c| c.log.clone())
        .unwrap_or_default();
    init_tracing(&log);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e
                .downcast_ref::<RotaError>()
                .map(RotaError::exit_code)
                .unwrap_or(1);
            if code == 130 {
                warn!("Run interrupted");
            } else {
                error!("{:#}", e);
            }
            ExitCode::from(code)
        }
    }
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rota_fetch={}", log.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!("Starting rota-fetch");

    let links_dir = &config.batch.links_dir;
    let targets = scan_links_dir(links_dir)
        .with_context(|| format!("failed to scan links in {}", links_dir.display()))?;
    if targets.is_empty() {
        warn!("No YouTube links found in {}", links_dir.display());
        return Ok(());
    }

    let client = Arc::new(
        FetchClient::new(
            config.fetch.proxies.clone(),
            config.fetch.retry_settings(),
            config.fetch.cooldown(),
        )?
        .with_strategy(config.fetch.strategy),
    );
    info!("Using retry strategy: {}", config.fetch.strategy.as_str());

    let api = Arc::new(YoutubeApi::new(
        &config.youtube.base_url,
        config.youtube.lang.clone(),
        config.fetch.attempt_timeout(),
    )?);

    // Flip the client's shutdown flag on Ctrl+C / SIGTERM
    let shutdown = client.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        shutdown.shutdown();
    });

    if config.fetch.probe_on_start {
        let probe = ProbeOperation::new(api.clone());
        let shutdown = client.shutdown_handle();
        let summary = tokio::select! {
            summary = client.probe(&probe, config.fetch.probe_config()) => summary,
            _ = shutdown.cancelled() => return Err(RotaError::Cancelled.into()),
        };
        if summary.working + summary.limited == 0 {
            warn!("No proxy passed the probe, continuing anyway");
        }
    }

    let output_dir = &config.batch.output_dir;
    let store = ResultStore::open(output_dir)
        .with_context(|| format!("failed to open result store in {}", output_dir.display()))?;

    let mut runner = BatchRunner::new(
        client,
        BatchOperations::youtube(api),
        store,
        Duration::from_secs(config.batch.item_delay),
    );
    let summary = runner.run(&targets).await?;

    info!(
        "rota-fetch finished: {} stored, {} skipped, {} playlists",
        summary.processed, summary.skipped, summary.playlists
    );
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
