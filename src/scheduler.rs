//! Thin client over the SLURM command-line tools.
//!
//! Every call is blocking and single-shot. Failures come back as
//! [`SchedulerError`] so each workflow decides whether to abort or carry on.

use std::path::Path;
use thiserror::Error;

use crate::utils::{output_lines, parse_job_id, CommandResult, CommandRunner};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to run {program}: {message}")]
    Spawn { program: String, message: String },
    #[error("{program} exited with code {code}: {stderr}")]
    Exit {
        program: String,
        code: i32,
        stderr: String,
    },
    #[error("could not find a job id in sbatch output: {0:?}")]
    NoJobId(String),
}

impl SchedulerError {
    /// `squeue` rejects IDs that SLURM has already purged from its queue.
    pub fn is_unknown_job(&self) -> bool {
        matches!(self, SchedulerError::Exit { stderr, .. } if stderr.contains("Invalid job id"))
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// SLURM client driving `sbatch`, `squeue`, `scancel` and `sinfo`.
pub struct SlurmClient<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
    cwd: Option<&'a Path>,
}

impl<'a, R: CommandRunner + ?Sized> SlurmClient<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        Self { runner, cwd: None }
    }

    /// Run every command from `dir`, so batch jobs start in the job directory.
    pub fn in_dir(mut self, dir: &'a Path) -> Self {
        self.cwd = Some(dir);
        self
    }

    /// Submit a batch script and return the new job ID.
    pub fn submit(&self, script: &Path) -> SchedulerResult<u64> {
        let result = self.call("sbatch", &[script.to_string_lossy().to_string()])?;
        let job_id = parse_job_id(&result.stdout)
            .ok_or_else(|| SchedulerError::NoJobId(result.stdout.trim().to_string()))?;
        tracing::info!(job_id, script = %script.display(), "submitted");
        Ok(job_id)
    }

    /// Raw `squeue -j <id> -o %T` lines: a `STATE` header then one line per task.
    pub fn query(&self, job_id: &str) -> SchedulerResult<Vec<String>> {
        let result = self.call("squeue", &args(&["-j", job_id, "-o", "%T"]))?;
        Ok(output_lines(&result.stdout))
    }

    pub fn cancel(&self, job_id: &str) -> SchedulerResult<()> {
        self.call("scancel", &args(&[job_id]))?;
        Ok(())
    }

    /// Cluster-wide `sinfo` listing.
    pub fn cluster_info(&self) -> SchedulerResult<Vec<String>> {
        let result = self.call("sinfo", &[])?;
        Ok(output_lines(&result.stdout))
    }

    /// `squeue -u <user>` listing.
    pub fn queue_info(&self, user: &str) -> SchedulerResult<Vec<String>> {
        let result = self.call("squeue", &args(&["-u", user]))?;
        Ok(output_lines(&result.stdout))
    }

    fn call(&self, program: &str, args: &[String]) -> SchedulerResult<CommandResult> {
        let result = self
            .runner
            .run(program, args, self.cwd)
            .map_err(|e| SchedulerError::Spawn {
                program: program.to_string(),
                message: format!("{:#}", e),
            })?;
        if !result.success() {
            tracing::warn!(program, code = result.return_code, stderr = %result.stderr.trim(), "command failed");
            return Err(SchedulerError::Exit {
                program: program.to_string(),
                code: result.return_code,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(result)
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
