//! sbatch script generation.
//!
//! Pure string formatting from [`JobConfig`], [`JobIdentity`] and the
//! contents of `job.args`. Whether a script may be (re)written is decided
//! by the submit workflow, not here.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::config::{JobConfig, JobIdentity};
use crate::sentinel::{self, SentinelStore};
use crate::timestamp::SHELL_DATE_COMMAND;

/// Which script to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// Simple mode: build, run once, stamp start/end.
    Single,
    /// Array mode: one-off build job that stamps the start.
    Setup,
    /// Array mode: the array job itself, after setup.
    Array,
    /// Array mode: runs once the array has drained; stamps the end.
    Cleanup,
}

impl ScriptKind {
    pub fn file_name(self) -> &'static str {
        match self {
            ScriptKind::Single | ScriptKind::Array => sentinel::SBATCH,
            ScriptKind::Setup => sentinel::SETUP_SBATCH,
            ScriptKind::Cleanup => sentinel::CLEANUP_SBATCH,
        }
    }
}

/// Render the script text for `kind`.
///
/// `depends_on` adds an `afterany` dependency; it is ignored for
/// [`ScriptKind::Single`] and [`ScriptKind::Setup`].
pub fn render(
    kind: ScriptKind,
    cfg: &JobConfig,
    identity: &JobIdentity,
    args: &str,
    depends_on: Option<u64>,
) -> String {
    let mut s = String::from("#!/bin/bash -l\n");

    match kind {
        ScriptKind::Single => {
            write_resources(&mut s, cfg);
            s.push_str("#SBATCH --output=job.out\n");
            write_mail(&mut s, cfg, identity);
            s.push_str("\n\n");
            let _ = writeln!(s, "{}", cfg.build);
            let _ = writeln!(s, "{} > {}", SHELL_DATE_COMMAND, sentinel::START);
            let _ = writeln!(s, "{}", run_line("./", cfg, identity, "", args));
            let _ = writeln!(s, "{} > {}", SHELL_DATE_COMMAND, sentinel::END);
        }
        ScriptKind::Setup => {
            s.push_str("#SBATCH --output=job.%A.setup.out\n");
            write_array_header(&mut s, cfg, identity);
            let _ = writeln!(s, "{} > {}", SHELL_DATE_COMMAND, sentinel::START);
            let _ = writeln!(s, "{}", cfg.build);
        }
        ScriptKind::Array => {
            let _ = writeln!(s, "#SBATCH --array={}", cfg.array);
            s.push_str("#SBATCH --output=job.%A_%a.out\n");
            write_dependency(&mut s, depends_on);
            write_array_header(&mut s, cfg, identity);
            s.push_str("echo $SLURM_ARRAY_JOB_ID\n");
            s.push_str("\n\n");
            let runs = cfg.runs.max(1);
            let range = format!(
                "--run $((SLURM_ARRAY_TASK_ID * {runs})) --runs $((SLURM_ARRAY_TASK_ID * {runs} + {runs}))"
            );
            let _ = writeln!(s, "{}", run_line("srun ./", cfg, identity, &range, args));
        }
        ScriptKind::Cleanup => {
            s.push_str("#SBATCH --output=job.%A.cleanup.out\n");
            write_dependency(&mut s, depends_on);
            write_array_header(&mut s, cfg, identity);
            let _ = writeln!(s, "{} > {}", SHELL_DATE_COMMAND, sentinel::END);
        }
    }

    s
}

/// Render `kind` with the current `job.args` and write it into the job directory.
pub fn generate(
    store: &SentinelStore,
    kind: ScriptKind,
    cfg: &JobConfig,
    identity: &JobIdentity,
    depends_on: Option<u64>,
) -> Result<PathBuf> {
    let text = render(kind, cfg, identity, &store.job_args(), depends_on);
    let path = store.path(kind.file_name());
    std::fs::write(&path, text)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::debug!(script = %path.display(), ?kind, "wrote sbatch script");
    Ok(path)
}

fn write_resources(s: &mut String, cfg: &JobConfig) {
    let _ = writeln!(s, "#SBATCH --mem-per-cpu={}", cfg.mem_per_cpu);
    let _ = writeln!(s, "#SBATCH --time={}:00:00", cfg.hours);
    let _ = writeln!(s, "#SBATCH --ntasks={}", cfg.tasks);
    let _ = writeln!(s, "#SBATCH --cpus-per-task={}", cfg.cpus_per_task);
    let _ = writeln!(s, "#SBATCH --ntasks-per-node={}", cfg.tasks_per_node);
    if let Some(qos) = &cfg.queue {
        let _ = writeln!(s, "#SBATCH --qos={}", qos);
    }
    if let Some(partition) = &cfg.partition {
        let _ = writeln!(s, "#SBATCH --partition={}", partition);
    }
}

fn write_mail(s: &mut String, cfg: &JobConfig, identity: &JobIdentity) {
    let user = cfg.mail_user.as_deref().unwrap_or(&identity.user);
    s.push_str("#SBATCH --mail-type=FAIL\n");
    let _ = writeln!(s, "#SBATCH --mail-user={}", user);
}

// Shared by setup, array and cleanup.
fn write_array_header(s: &mut String, cfg: &JobConfig, identity: &JobIdentity) {
    let _ = writeln!(s, "#SBATCH --job-name={}", identity.job_name());
    write_resources(s, cfg);
    write_mail(s, cfg, identity);
}

fn write_dependency(s: &mut String, depends_on: Option<u64>) {
    if let Some(id) = depends_on {
        let _ = writeln!(s, "#SBATCH --dependency=afterany:{}", id);
    }
}

fn run_line(prefix: &str, cfg: &JobConfig, identity: &JobIdentity, range: &str, args: &str) -> String {
    [
        format!("{}{}", prefix, identity.project),
        cfg.exec_flags.clone(),
        range.to_string(),
        args.to_string(),
    ]
    .into_iter()
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join(" ")
}
