//! Job configuration and identity.
//!
//! Resource sizing is fixed per deployment. Built-in defaults can be
//! overridden by a `grunter.toml` in the job directory:
//!
//! ```toml
//! mode = "array"          # simple | array
//! hours = 72              # wall-clock limit; slurm kills the job past this
//! mem_per_cpu = "3G"
//! tasks = 1
//! cpus_per_task = 2
//! tasks_per_node = 1
//! queue = "oreillylab"    # emitted as --qos
//! partition = "low"
//! array = "0-9"
//! runs = 1                # runs per array slot
//! build = "go build -mod=mod"
//! exec_flags = "--nogui"
//! result_suffixes = [".tsv", ".csv"]
//! results_dir = "results"
//! ```

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_FILE: &str = "grunter.toml";

/// Deployment mode: one job, or a setup → array → cleanup chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Simple,
    Array,
}

/// Resource sizing and script settings used to write the sbatch files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    pub mode: Mode,
    pub hours: u32,
    pub mem_per_cpu: String,
    pub tasks: u32,
    pub cpus_per_task: u32,
    pub tasks_per_node: u32,
    pub queue: Option<String>,
    pub partition: Option<String>,
    pub array: String,
    pub runs: u32,
    pub mail_user: Option<String>,
    pub build: String,
    pub exec_flags: String,
    pub result_suffixes: Vec<String>,
    pub results_dir: String,
}

impl JobConfig {
    pub fn for_mode(mode: Mode) -> Self {
        Self {
            mode,
            hours: match mode {
                Mode::Simple => 1,
                Mode::Array => 2,
            },
            mem_per_cpu: "1G".to_string(),
            tasks: 1,
            cpus_per_task: 1,
            tasks_per_node: 1,
            queue: None,
            partition: None,
            array: "0-9".to_string(),
            runs: 1,
            mail_user: None,
            build: "go build -mod=mod".to_string(),
            exec_flags: "--nogui".to_string(),
            result_suffixes: vec![".tsv".to_string(), ".csv".to_string()],
            results_dir: "results".to_string(),
        }
    }

    /// Load defaults, layer the config file on top, then apply the mode override.
    ///
    /// `explicit` must exist; otherwise `grunter.toml` in `job_dir` is used
    /// when present.
    pub fn load(job_dir: &Path, explicit: Option<&Path>, mode: Option<Mode>) -> Result<Self> {
        let file = match explicit {
            Some(path) => Some(ConfigFile::read(path)?),
            None => {
                let path = job_dir.join(CONFIG_FILE);
                if path.is_file() {
                    Some(ConfigFile::read(&path)?)
                } else {
                    None
                }
            }
        };
        Ok(Self::resolve(file.unwrap_or_default(), mode))
    }

    fn resolve(file: ConfigFile, mode_override: Option<Mode>) -> Self {
        let mode = mode_override.or(file.mode).unwrap_or_default();
        let d = Self::for_mode(mode);
        Self {
            mode,
            hours: file.hours.unwrap_or(d.hours),
            mem_per_cpu: file.mem_per_cpu.unwrap_or(d.mem_per_cpu),
            tasks: file.tasks.unwrap_or(d.tasks),
            cpus_per_task: file.cpus_per_task.unwrap_or(d.cpus_per_task),
            tasks_per_node: file.tasks_per_node.unwrap_or(d.tasks_per_node),
            queue: file.queue.or(d.queue),
            partition: file.partition.or(d.partition),
            array: file.array.unwrap_or(d.array),
            runs: file.runs.unwrap_or(d.runs),
            mail_user: file.mail_user.or(d.mail_user),
            build: file.build.unwrap_or(d.build),
            exec_flags: file.exec_flags.unwrap_or(d.exec_flags),
            result_suffixes: file.result_suffixes.unwrap_or(d.result_suffixes),
            results_dir: file.results_dir.unwrap_or(d.results_dir),
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self::for_mode(Mode::default())
    }
}

/// On-disk form; every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    mode: Option<Mode>,
    hours: Option<u32>,
    mem_per_cpu: Option<String>,
    tasks: Option<u32>,
    cpus_per_task: Option<u32>,
    tasks_per_node: Option<u32>,
    queue: Option<String>,
    partition: Option<String>,
    array: Option<String>,
    runs: Option<u32>,
    mail_user: Option<String>,
    build: Option<String>,
    exec_flags: Option<String>,
    result_suffixes: Option<Vec<String>>,
    results_dir: Option<String>,
}

impl ConfigFile {
    fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }
}

/// Who and what this job is, derived from the job directory path.
///
/// Jobs run in `.../jobs/active/<jobid>/<project>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobIdentity {
    pub project: String,
    pub job_id: String,
    pub user: String,
}

impl JobIdentity {
    pub fn from_dir(dir: &Path) -> Self {
        let component = |p: Option<&Path>| {
            p.and_then(Path::file_name)
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default()
        };
        Self {
            project: component(Some(dir)),
            job_id: component(dir.parent()),
            user: current_user(),
        }
    }

    /// `<project>_<jobid>`, used as the SLURM job name.
    pub fn job_name(&self) -> String {
        format!("{}_{}", self.project, self.job_id)
    }
}

fn current_user() -> String {
    ["USER", "LOGNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}
