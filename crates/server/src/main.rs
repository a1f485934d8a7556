mod api;
mod bootstrap;
mod health;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rankguard_core::config::{AppConfig, LoadOptions};
use rankguard_core::WorkflowEngine;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// How often undelivered outbox rows are handed to the dispatcher again.
const OUTBOX_REDELIVERY_INTERVAL: Duration = Duration::from_secs(30);
const OUTBOX_REDELIVERY_BATCH: usize = 100;

fn init_logging(config: &AppConfig) {
    use rankguard_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging comes up before bootstrap so its events are captured.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let routes = api::router(api::ApiState::new(
        Arc::clone(&app.engine),
        app.config.server.gateway_token.clone(),
    ))
    .merge(health::router(app.db_pool.clone()));

    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "rankguard-server listening"
    );

    let redelivery = tokio::spawn(redeliver_outbox(Arc::clone(&app.engine)));

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, routes)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    wait_for_shutdown().await?;
    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = app.config.server.graceful_shutdown_secs,
        "rankguard-server draining in-flight requests"
    );
    redelivery.abort();
    let _ = stop_tx.send(());

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, server).await {
        Ok(joined) => joined??,
        Err(_) => warn!(
            event_name = "system.server.drain_timeout",
            correlation_id = "shutdown",
            "in-flight requests did not finish within the grace period"
        ),
    }

    app.db_pool.close().await;
    info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        "rankguard-server stopped"
    );
    Ok(())
}

/// Notifications committed while the dispatcher was unavailable stay in the
/// outbox until this loop picks them up.
async fn redeliver_outbox(engine: Arc<WorkflowEngine>) {
    let mut ticker = tokio::time::interval(OUTBOX_REDELIVERY_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(error) = engine.coordinator().redeliver(OUTBOX_REDELIVERY_BATCH).await {
            warn!(
                event_name = "notification.redelivery_failed",
                correlation_id = "outbox",
                error = %error,
                "outbox redelivery pass failed"
            );
        }
    }
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
