//! Sentinel files shared with the orchestrator.
//!
//! Small newline-terminated text files in the job directory. There is no
//! locking: one process per job directory, last write wins.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const ARGS: &str = "job.args";
pub const SBATCH: &str = "job.sbatch";
pub const SETUP_SBATCH: &str = "job.setup.sbatch";
pub const CLEANUP_SBATCH: &str = "job.cleanup.sbatch";
pub const SLURM_ID: &str = "job.slurmid";
pub const STATUS: &str = "job.status";
pub const START: &str = "job.start";
pub const END: &str = "job.end";
pub const CANCELED: &str = "job.canceled";
pub const QUEUE: &str = "job.queue";

/// Reads and writes sentinel files relative to one job directory.
#[derive(Debug, Clone)]
pub struct SentinelStore {
    dir: PathBuf,
}

impl SentinelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// Overwrite `name` with `value` plus a newline.
    pub fn write(&self, name: &str, value: &str) -> Result<()> {
        let path = self.path(name);
        fs::write(&path, format!("{}\n", value))
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Append `value` as a new line, creating the file if needed.
    pub fn append(&self, name: &str, value: &str) -> Result<()> {
        let path = self.path(name);
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        writeln!(f, "{}", value).with_context(|| format!("Failed to append to {}", path.display()))
    }

    /// First line with trailing whitespace removed; empty if the file is absent.
    pub fn read_one(&self, name: &str) -> String {
        match fs::read_to_string(self.path(name)) {
            Ok(content) => content.lines().next().unwrap_or("").trim_end().to_string(),
            Err(_) => String::new(),
        }
    }

    /// Every line, each keeping its newline; empty if the file is absent.
    pub fn read_all(&self, name: &str) -> Vec<String> {
        match fs::read_to_string(self.path(name)) {
            Ok(content) => content.split_inclusive('\n').map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Every line with trailing whitespace removed.
    pub fn read_all_stripped(&self, name: &str) -> Vec<String> {
        self.read_all(name)
            .iter()
            .map(|l| l.trim_end().to_string())
            .collect()
    }

    /// Recorded scheduler IDs in submission order, blank lines skipped.
    pub fn slurm_ids(&self) -> Vec<String> {
        self.read_all_stripped(SLURM_ID)
            .into_iter()
            .filter(|id| !id.is_empty())
            .collect()
    }

    /// The args file joined into one space-separated argument string.
    pub fn job_args(&self) -> String {
        self.read_all_stripped(ARGS).join(" ")
    }
}
