use rankguard_core::config::LoadOptions;
use rankguard_core::{InvariantChecker, ProrationCalculator};
use rankguard_db::SqlWorkflowStore;
use serde_json::Value;

use crate::commands::{
    load_config, open_pool, runtime, CommandResult, EXIT_DATABASE, EXIT_WORKFLOW,
};

/// Recomputes the workflow invariants over everything in the store.
pub fn run(options: LoadOptions) -> CommandResult {
    let config = match load_config("verify", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("verify") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let checker = InvariantChecker::new(ProrationCalculator::new(
        config.engine.surcharge_rate,
        config.engine.currency_scale,
    ));
    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let report = checker.verify_store(&SqlWorkflowStore::new(pool.clone())).await;
        pool.close().await;
        report.map_err(|error| ("store", error.to_string(), EXIT_DATABASE))
    });

    match result {
        Ok(report) => {
            let summary = format!(
                "checked {} request(s), {} slot(s), {} refund(s)",
                report.requests_checked, report.slots_checked, report.refunds_checked
            );
            let details = serde_json::to_value(&report).unwrap_or(Value::Null);
            if report.is_clean() {
                let message = format!("{summary}; all invariants hold");
                CommandResult::success_with("verify", message, details)
            } else {
                CommandResult::failure_with(
                    "verify",
                    "invariant_violation",
                    format!("{summary}; {} violation(s)", report.violations.len()),
                    EXIT_WORKFLOW,
                    Some(details),
                )
            }
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("verify", error_class, message, exit_code)
        }
    }
}
