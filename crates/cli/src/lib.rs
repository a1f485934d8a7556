pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rankguard_core::config::LoadOptions;

#[derive(Debug, Parser)]
#[command(
    name = "rankguard",
    about = "Rankguard operator CLI",
    long_about = "Operate the rank-guarantee workflow store: migrations, config inspection, \
                  readiness checks, expiry sweeps, and invariant verification.",
    after_help = "Examples:\n  rankguard doctor --json\n  rankguard expire --stale-days 7\n  \
                  rankguard verify"
)]
pub struct Cli {
    /// Config file to read instead of `rankguard.toml` / `config/rankguard.toml`.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate {
        #[arg(long, value_name = "VERSION", help = "Revert migrations newer than VERSION")]
        undo_to: Option<i64>,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, DB connectivity, schema state, and outbox backlog")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Expire open quote requests that have not changed for a while")]
    Expire {
        #[arg(long, value_name = "DAYS", help = "Override engine.expiry_stale_days")]
        stale_days: Option<u32>,
    },
    #[command(about = "Recompute workflow invariants over the whole store")]
    Verify,
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            require_file: self.config.is_some(),
            config_path: self.config.clone(),
            ..LoadOptions::default()
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.load_options();

    let result = match cli.command {
        Command::Migrate { undo_to } => commands::migrate::run(options, undo_to),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(options) }
        }
        Command::Doctor { json } => commands::doctor::run(options, json),
        Command::Expire { stale_days } => commands::expire::run(options, stale_days),
        Command::Verify => commands::verify::run(options),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
