#![allow(clippy::print_stdout)]

use anyhow::{Context, Result};
use clap::Parser;
use courier_events::CancellationToken;
use courier_logger::Logger;
use courier_relay::{Cli, Relay, RelayConfig};
use tokio::fs::File;
use tokio::io::BufReader;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = RelayConfig::load(cli.config.as_deref())
        .context("Critical: Configuration is malformed")?;
    if let Some(level) = cli.log_level {
        cfg.log.level = level;
    }
    let _log = Logger::from_config(env!("CARGO_PKG_NAME"), &cfg.log)?;

    let ctx = CancellationToken::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error while waiting for shutdown signal: {e}");
            return;
        }
        info!("Shutdown signal received, stopping input");
        interrupt.cancel();
    });

    let relay = Relay::start(cfg.hub)?;
    let stats = match &cli.input {
        Some(path) => {
            let file = File::open(path)
                .await
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            relay.pump(BufReader::new(file), &ctx).await?
        },
        None => relay.pump(BufReader::new(tokio::io::stdin()), &ctx).await?,
    };

    // The input context may already be cancelled; drain on a fresh one.
    let snapshot = relay.finish(&CancellationToken::new()).await?;

    if !cli.no_metrics {
        let report = serde_json::json!({ "relay": stats, "hub": snapshot });
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<_, anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        res = ctrl_c => res?,
        res = terminate => res?,
    }
    Ok(())
}
