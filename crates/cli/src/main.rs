use std::process::ExitCode;

fn main() -> ExitCode {
    rankguard_cli::run()
}
