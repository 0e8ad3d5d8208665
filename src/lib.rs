//! PacketWarden -- lightweight network intrusion detection pipeline.
//!
//! This crate provides the core library: a bounded ingestion queue, a
//! hot-reloadable rule engine, a per-source statistical anomaly scorer,
//! deduplicating alert management, and the dashboard API.

pub mod alert;
pub mod api;
pub mod config;
pub mod ingest;
pub mod metrics;
pub mod packet;
pub mod pipeline;
pub mod rules;
pub mod score;

use crate::alert::sink::JsonLinesSink;
use crate::api::state::AppState;
use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::rules::RuleSet;

use anyhow::{Context, Result};
use std::sync::Arc;

/// Start the PacketWarden daemon: detection pipeline plus API server.
///
/// Runs until the process receives ctrl-c, then drains the queue and shuts
/// the pipeline down cleanly.
pub async fn serve(config: Config) -> Result<()> {
    let rules_path = config.rules.path.clone();
    let ruleset = if rules_path.exists() {
        // Strict at startup: a malformed rule file is a deployment error and
        // must halt the daemon. Skip-and-warn is reserved for hot reload.
        let set = RuleSet::load(&rules_path)
            .with_context(|| format!("loading rules from {}", rules_path.display()))?;
        tracing::info!(rules = set.len(), path = %rules_path.display(), "loaded rule set");
        set
    } else {
        tracing::info!(path = %rules_path.display(), "rule file not found, using built-in rules");
        RuleSet::builtin()
    };

    let sink = JsonLinesSink::open(&config.alerts.log_path)
        .with_context(|| format!("opening alert log {}", config.alerts.log_path.display()))?;

    let pipeline = Pipeline::new(&config, ruleset, Box::new(sink));
    pipeline.start();

    let state = AppState {
        pipeline: pipeline.clone(),
        rules_path: Arc::new(rules_path),
    };
    let app = api::router(state);

    let addr: std::net::SocketAddr = config
        .api
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.api.bind))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "PacketWarden listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pipeline.capture_terminated();
    pipeline.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to install ctrl-c handler");
        // Without a signal handler the server would be unstoppable; park
        // forever and rely on the process being killed instead.
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
