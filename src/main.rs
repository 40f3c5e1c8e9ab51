//! # sf-profiler - demo host process
//!
//! Runs a synthetic allocation and CPU workload and, with `--profile`,
//! attaches the in-process profiling agent to it.
//!
//! ## Shutdown
//!
//! Ctrl+C stops the workload, then the agent is cancelled and given a few
//! seconds to let its tasks exit.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;
mod workload;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sf_profiler_agent::Profiler;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;

/// Time the agent gets to wind down after Ctrl+C.
const AGENT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut profiler = if cli.profile {
        let config = cli
            .profiler_config()
            .context("invalid profiler configuration")?;
        let mut profiler = Profiler::new(config);
        profiler.start();
        Some(profiler)
    } else {
        None
    };

    warn!("do not run this for a long time, it keeps allocating");

    let cancel = CancellationToken::new();
    let workload = workload::spawn(&cancel);

    wait_for_shutdown().await;
    cancel.cancel();
    for handle in workload {
        handle.await.context("workload task failed")?;
    }

    if let Some(profiler) = profiler.as_mut() {
        if !profiler.shutdown(AGENT_SHUTDOWN_TIMEOUT).await {
            warn!("profiler did not stop in time");
        }
    }

    info!("shutdown complete");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
