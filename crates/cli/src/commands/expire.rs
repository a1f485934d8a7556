use std::sync::Arc;

use chrono::Duration;
use rankguard_core::config::LoadOptions;
use rankguard_core::engine::ExpirySweepReport;
use rankguard_core::{
    Actor, ProrationCalculator, RequestContext, Role, WorkflowEngine, WorkflowError,
};
use rankguard_db::{SqlCampaignDirectory, SqlWorkflowStore};
use serde_json::json;

use crate::commands::{load_config, open_pool, runtime, CommandResult, EXIT_WORKFLOW};

/// Expiry runs with admin authority under a fixed, recognizable actor id.
pub const SWEEP_ACTOR_ID: &str = "system:expiry-sweep";

pub fn run(mut options: LoadOptions, stale_days: Option<u32>) -> CommandResult {
    if stale_days.is_some() {
        options.overrides.expiry_stale_days = stale_days;
    }
    let config = match load_config("expire", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("expire") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let stale_days = config.engine.expiry_stale_days;
    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let engine = WorkflowEngine::new(
            Arc::new(SqlWorkflowStore::new(pool.clone())),
            Arc::new(SqlCampaignDirectory::new(pool.clone())),
        )
        .with_calculator(ProrationCalculator::new(
            config.engine.surcharge_rate,
            config.engine.currency_scale,
        ));
        let report = sweep(&engine, stale_days).await;
        pool.close().await;
        report.map_err(|error| ("workflow", error.to_string(), EXIT_WORKFLOW))
    });

    match result {
        Ok(report) => {
            let details = json!({
                "stale_days": stale_days,
                "expired": report.expired,
                "failed": report.failed,
            });
            let message = format!(
                "expired {} stale request(s), {} failed",
                report.expired.len(),
                report.failed.len()
            );
            if report.failed.is_empty() {
                CommandResult::success_with("expire", message, details)
            } else {
                CommandResult::failure_with(
                    "expire",
                    "partial_failure",
                    message,
                    EXIT_WORKFLOW,
                    Some(details),
                )
            }
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("expire", error_class, message, exit_code)
        }
    }
}

/// Expires every open request untouched for `stale_days` days.
pub async fn sweep(
    engine: &WorkflowEngine,
    stale_days: u32,
) -> Result<ExpirySweepReport, WorkflowError> {
    let context = RequestContext::new(Actor::new(SWEEP_ACTOR_ID, Role::Developer));
    let cutoff = engine.now() - Duration::days(i64::from(stale_days));
    engine.expire_stale_requests(&context, cutoff).await
}
