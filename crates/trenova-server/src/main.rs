// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trenova Server - TMS backend process
//!
//! Runs the CDC consumer, live stream fan-out, background jobs and the HTTP
//! API in one process until Ctrl-C.

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use trenova_server::{Config, LogFormat, ServerRuntime};

const DEFAULT_FILTER: &str =
    "trenova_server=info,trenova_cdc=info,trenova_streaming=info,trenova_jobs=info,trenova_lanes=info";

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    let config = Config::from_env();
    init_tracing(config.as_ref().map(|c| c.log_format).unwrap_or_default());

    let config = config.map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        http_addr = %config.http_addr,
        database = config.database_url.is_some(),
        cdc_enabled = config.cdc.enabled,
        jobs_concurrency = config.jobs.concurrency,
        "Configuration loaded"
    );

    let runtime = ServerRuntime::builder()
        .config(config)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.local_addr(), "Trenova server listening");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    runtime.shutdown().await?;
    info!("Shutdown complete");
    Ok(())
}
