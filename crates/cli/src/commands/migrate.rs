use rankguard_core::config::LoadOptions;
use rankguard_db::migrations;

use crate::commands::{load_config, open_pool, runtime, CommandResult, EXIT_MIGRATION};

/// Applies pending migrations, or with `undo_to` reverts every applied
/// migration newer than that version.
pub fn run(options: LoadOptions, undo_to: Option<i64>) -> CommandResult {
    let config = match load_config("migrate", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("migrate") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let outcome = match undo_to {
            Some(target) => migrations::undo_to(&pool, target).await,
            None => migrations::run_pending(&pool).await,
        };
        pool.close().await;
        outcome.map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))
    });

    match (result, undo_to) {
        (Ok(()), None) => CommandResult::success("migrate", "applied pending migrations"),
        (Ok(()), Some(target)) => {
            CommandResult::success("migrate", format!("reverted migrations newer than {target}"))
        }
        (Err((error_class, message, exit_code)), _) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
