//! Utility functions for external command execution and SLURM output parsing.

use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;
use std::process::Command;

/// Result of running an external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub return_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.return_code == 0
    }
}

/// Runs external programs to completion and captures their output.
///
/// Every scheduler, `etcat` and `git` call goes through this, so tests can
/// swap in a scripted runner.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[String], cwd: Option<&Path>) -> Result<CommandResult>;
}

/// Runner backed by `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String], cwd: Option<&Path>) -> Result<CommandResult> {
        tracing::debug!(program, ?args, ?cwd, "running command");

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .with_context(|| format!("Failed to execute command: {}", program))?;

        let result = CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            return_code: output.status.code().unwrap_or(-1),
        };

        tracing::debug!(program, return_code = result.return_code, "command finished");
        Ok(result)
    }
}

/// Parse job ID from sbatch output.
///
/// Typical sbatch output: "Submitted batch job 12345"
pub fn parse_job_id(sbatch_output: &str) -> Option<u64> {
    let re = Regex::new(r"Submitted batch job (\d+)").ok()?;
    re.captures(sbatch_output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Split command output into lines, dropping a trailing newline.
pub fn output_lines(output: &str) -> Vec<String> {
    output.lines().map(|l| l.trim_end().to_string()).collect()
}
