use std::sync::Arc;

use rankguard_core::config::AppConfig;
use rankguard_core::{ProrationCalculator, WorkflowEngine};
use rankguard_db::{connect_with_settings, migrations, DbPool};
use rankguard_db::{SqlCampaignDirectory, SqlWorkflowStore};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<WorkflowEngine>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let engine = build_engine(&config, db_pool.clone());
    Ok(Application { config, db_pool, engine: Arc::new(engine) })
}

/// Engine over the SQL store with the configured proration settings.
pub fn build_engine(config: &AppConfig, db_pool: DbPool) -> WorkflowEngine {
    let calculator =
        ProrationCalculator::new(config.engine.surcharge_rate, config.engine.currency_scale);
    WorkflowEngine::new(
        Arc::new(SqlWorkflowStore::new(db_pool.clone())),
        Arc::new(SqlCampaignDirectory::new(db_pool)),
    )
    .with_calculator(calculator)
}
