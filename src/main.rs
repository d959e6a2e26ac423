mod cli;
mod config;
mod job_manager;
mod scheduler;
mod script;
mod sentinel;
mod status;
mod timestamp;
mod utils;

use clap::Parser;
use cli::Cli;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Diagnostics go to stderr; stdout belongs to the orchestrator.
fn init_logging() {
    let filter = EnvFilter::try_from_env("GRUNTER_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(cli::parse_error_code(&e));
        }
    };

    match cli::run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            println!("grunter: error: {:#}", e);
            ExitCode::from(cli::EXIT_USAGE)
        }
    }
}
