//! CLI entry point and command definitions.

use crate::config::{JobConfig, JobIdentity, Mode};
use crate::job_manager::JobManager;
use crate::utils::SystemRunner;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

/// grunter - job-directory script for submitting and tracking SLURM jobs.
#[derive(Parser, Debug)]
#[command(name = "grunter")]
#[command(version = "0.1.0")]
#[command(about = "Submit, track and cancel the SLURM job for the current job directory")]
pub struct Cli {
    /// Command: submit, results, status, cancel, queue, etcat or help
    pub command: Option<String>,

    /// Command arguments (etcat takes the gresults subdirectory)
    pub args: Vec<String>,

    /// Config file overriding the built-in job settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Deployment mode, overriding the config file
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Job directory (defaults to the current directory)
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

/// Commands understood by the job script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Submit,
    Results,
    Status,
    Cancel,
    Queue,
    Etcat,
    Help,
}

impl Command {
    /// Map a command token; `etcat` exists only in array mode.
    pub fn parse(token: &str, mode: Mode) -> Option<Self> {
        match token {
            "submit" => Some(Command::Submit),
            "results" => Some(Command::Results),
            "status" => Some(Command::Status),
            "cancel" => Some(Command::Cancel),
            "queue" => Some(Command::Queue),
            "etcat" if mode == Mode::Array => Some(Command::Etcat),
            "help" => Some(Command::Help),
            _ => None,
        }
    }
}

/// Process exit code for a handled command, including soft failures.
pub const EXIT_OK: u8 = 0;
/// Process exit code for an unrecognized command.
pub const EXIT_USAGE: u8 = 1;

/// Exit code for a command line clap rejected; `--help` and `--version`
/// are not failures.
pub fn parse_error_code(err: &clap::Error) -> u8 {
    if err.use_stderr() {
        EXIT_USAGE
    } else {
        EXIT_OK
    }
}

/// Resolve configuration, then dispatch the command.
///
/// Only an unrecognized command (or unusable configuration) fails the
/// process; everything else reports on stdout and exits 0. Help is always
/// printed, even when the config file is broken.
pub fn run(cli: Cli) -> Result<u8> {
    let dir = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to determine job directory")?,
    };
    let token = cli.command.as_deref().unwrap_or("help");
    let config = match JobConfig::load(&dir, cli.config.as_deref(), cli.mode) {
        Ok(config) => config,
        Err(e) if token == "help" => {
            tracing::warn!(error = %format!("{:#}", e), "ignoring unusable config for help");
            JobConfig::for_mode(cli.mode.unwrap_or_default())
        }
        Err(e) => return Err(e),
    };

    let command = match Command::parse(token, config.mode) {
        Some(command) => command,
        None => {
            println!("grunter: error: cmd not recognized: {}", token);
            return Ok(EXIT_USAGE);
        }
    };

    let identity = JobIdentity::from_dir(&dir);
    tracing::debug!(?command, dir = %dir.display(), project = %identity.project, mode = ?config.mode, "dispatching");
    let runner = SystemRunner;
    let manager = JobManager::new(&dir, &config, &identity, &runner);

    let outcome = match command {
        Command::Submit => handle_submit(&manager),
        Command::Results => handle_results(&manager),
        Command::Status => handle_status(&manager),
        Command::Cancel => handle_cancel(&manager),
        Command::Queue => handle_queue(&manager),
        Command::Etcat => match cli.args.first() {
            Some(subdir) => handle_etcat(&manager, subdir),
            None => {
                println!("grunter: error: etcat requires a gresults subdirectory");
                return Ok(EXIT_USAGE);
            }
        },
        Command::Help => {
            print_usage(config.mode);
            return Ok(EXIT_OK);
        }
    };

    if let Err(e) = outcome {
        tracing::error!(error = %format!("{:#}", e), "command failed");
        println!("grunter: {:#}", e);
    }
    Ok(EXIT_OK)
}

/// Handle the submit command.
pub fn handle_submit(manager: &JobManager) -> Result<()> {
    manager.submit()?;
    Ok(())
}

/// Handle the results command.
pub fn handle_results(manager: &JobManager) -> Result<()> {
    manager.results()?;
    Ok(())
}

/// Handle the status command.
pub fn handle_status(manager: &JobManager) -> Result<()> {
    manager.status()?;
    Ok(())
}

/// Handle the cancel command.
pub fn handle_cancel(manager: &JobManager) -> Result<()> {
    manager.cancel()?;
    Ok(())
}

/// Handle the queue command.
pub fn handle_queue(manager: &JobManager) -> Result<()> {
    manager.queue()
}

/// Handle the etcat command.
pub fn handle_etcat(manager: &JobManager, subdir: &str) -> Result<()> {
    manager.etcat(subdir)
}

fn print_usage(mode: Mode) {
    println!("\ngrunter is the git-based run tool job script\n");
    println!("supports the following commands:\n");
    println!("submit\t submit job to slurm");
    println!("results\t list job results");
    println!("status\t get current slurm status");
    println!("cancel\t tell slurm to cancel job");
    println!("queue\t record cluster and user queue in job.queue");
    if mode == Mode::Array {
        println!("etcat\t collate run results in gresults/<dir> and push them");
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_tokens() {
        assert_eq!(Command::parse("submit", Mode::Simple), Some(Command::Submit));
        assert_eq!(Command::parse("queue", Mode::Simple), Some(Command::Queue));
        assert_eq!(Command::parse("help", Mode::Array), Some(Command::Help));
        assert_eq!(Command::parse("etcat", Mode::Array), Some(Command::Etcat));
        assert_eq!(Command::parse("etcat", Mode::Simple), None);
        assert_eq!(Command::parse("launch", Mode::Simple), None);
    }

    #[test]
    fn test_cli_parses_flags_and_args() {
        let cli = Cli::parse_from(["grunter", "--mode", "array", "etcat", "v1"]);
        assert_eq!(cli.command.as_deref(), Some("etcat"));
        assert_eq!(cli.args, vec!["v1"]);
        assert_eq!(cli.mode, Some(Mode::Array));
    }

    #[test]
    fn test_run_exit_codes() {
        let dir = tempfile::TempDir::new().unwrap();
        let base = |cmd: Option<&str>| Cli {
            command: cmd.map(str::to_string),
            args: Vec::new(),
            config: None,
            mode: None,
            dir: Some(dir.path().to_path_buf()),
        };

        assert_eq!(run(base(Some("bogus"))).unwrap(), EXIT_USAGE);
        assert_eq!(run(base(None)).unwrap(), EXIT_OK);
        assert_eq!(run(base(Some("help"))).unwrap(), EXIT_OK);
        assert_eq!(run(base(Some("results"))).unwrap(), EXIT_OK);
    }

    #[test]
    fn test_run_rejects_bad_config() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(crate::config::CONFIG_FILE), "mode = \"cluster\"\n").unwrap();
        let cli = Cli {
            command: Some("status".to_string()),
            args: Vec::new(),
            config: None,
            mode: None,
            dir: Some(dir.path().to_path_buf()),
        };
        assert!(run(cli).is_err());
    }

    #[test]
    fn test_help_survives_bad_config() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(crate::config::CONFIG_FILE), "hours = \"many\"\n").unwrap();
        let cli = |cmd: Option<&str>| Cli {
            command: cmd.map(str::to_string),
            args: Vec::new(),
            config: None,
            mode: None,
            dir: Some(dir.path().to_path_buf()),
        };
        assert_eq!(run(cli(Some("help"))).unwrap(), EXIT_OK);
        assert_eq!(run(cli(None)).unwrap(), EXIT_OK);
        assert!(run(cli(Some("results"))).is_err());
    }

    #[test]
    fn test_flag_errors_exit_with_usage_code() {
        let err = Cli::try_parse_from(["grunter", "--bogus"]).unwrap_err();
        assert_eq!(parse_error_code(&err), EXIT_USAGE);
        let err = Cli::try_parse_from(["grunter", "--mode", "cluster", "status"]).unwrap_err();
        assert_eq!(parse_error_code(&err), EXIT_USAGE);
        let err = Cli::try_parse_from(["grunter", "--help"]).unwrap_err();
        assert_eq!(parse_error_code(&err), EXIT_OK);
    }
}
