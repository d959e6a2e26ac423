//! Job Manager for the submit / status / cancel lifecycle of one job directory.

use anyhow::Result;
use std::path::Path;

use crate::config::{JobConfig, JobIdentity, Mode};
use crate::scheduler::SlurmClient;
use crate::script::{self, ScriptKind};
use crate::sentinel::{self, SentinelStore};
use crate::status::{self, QueryResult, StatusToken};
use crate::timestamp;
use crate::utils::CommandRunner;

/// Directory, relative to the job directory, holding collated results.
pub const GRESULTS_DIR: &str = "gresults";

/// Run-file type collated by `etcat`.
const ETCAT_TYPE: &str = "_run";

/// Drives SLURM for the job living in one directory.
///
/// User-facing messages go to stdout, where the orchestrator reads them;
/// only sentinel write failures are returned as errors.
pub struct JobManager<'a> {
    store: SentinelStore,
    config: &'a JobConfig,
    identity: &'a JobIdentity,
    runner: &'a dyn CommandRunner,
}

impl<'a> JobManager<'a> {
    pub fn new(
        dir: &Path,
        config: &'a JobConfig,
        identity: &'a JobIdentity,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            store: SentinelStore::new(dir),
            config,
            identity,
            runner,
        }
    }

    fn client(&self) -> SlurmClient<'_, dyn CommandRunner + 'a> {
        SlurmClient::new(self.runner).in_dir(self.store.dir())
    }

    /// Write the sbatch script(s) and submit them.
    ///
    /// Refuses to run if `job.sbatch` already exists. In array mode the
    /// setup, array and cleanup jobs are chained with `afterany`
    /// dependencies; the first failed submission stops the chain.
    pub fn submit(&self) -> Result<Option<u64>> {
        if self.store.exists(sentinel::SBATCH) {
            println!("Error: {} exists -- attempt to submit job twice!", sentinel::SBATCH);
            return Ok(None);
        }

        match self.config.mode {
            Mode::Simple => {
                let Some(id) = self.submit_script(ScriptKind::Single, None)? else {
                    return Ok(None);
                };
                self.store.write(sentinel::SLURM_ID, &id.to_string())?;
                println!("submitted successfully -- slurm job id: {}", id);
                Ok(Some(id))
            }
            Mode::Array => {
                let mut previous = None;
                let mut array_id = None;
                for kind in [ScriptKind::Setup, ScriptKind::Array, ScriptKind::Cleanup] {
                    let Some(id) = self.submit_script(kind, previous)? else {
                        return Ok(None);
                    };
                    self.store.append(sentinel::SLURM_ID, &id.to_string())?;
                    if kind == ScriptKind::Array {
                        array_id = Some(id);
                    }
                    previous = Some(id);
                }
                if let Some(id) = array_id {
                    println!("submitted successfully -- slurm job id: {}", id);
                }
                Ok(array_id)
            }
        }
    }

    fn submit_script(&self, kind: ScriptKind, depends_on: Option<u64>) -> Result<Option<u64>> {
        let path = script::generate(&self.store, kind, self.config, self.identity, depends_on)?;
        match self.client().submit(&path) {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                println!("Failed to submit {} script: {}", kind.file_name(), e);
                Ok(None)
            }
        }
    }

    /// Query SLURM for every recorded job ID and record the summary in `job.status`.
    pub fn status(&self) -> Result<StatusToken> {
        let ids = self.store.slurm_ids();
        if ids.is_empty() {
            println!("No slurm id found -- maybe didn't submit properly?");
        } else {
            println!("slurm id to stat: {}", ids.join(" "));
        }

        let client = self.client();
        let token = status::aggregate(&ids, |id| match client.query(id) {
            Ok(lines) => QueryResult::parse(&lines),
            Err(e) if e.is_unknown_job() => {
                tracing::debug!(job_id = id, error = %e, "job purged from the queue");
                QueryResult::Absent
            }
            Err(e) => {
                println!("Failed to stat job {}: {}", id, e);
                QueryResult::Unavailable
            }
        });

        for (label, name) in [("started", sentinel::START), ("ended", sentinel::END)] {
            let when = timestamp::read_local(&self.store, name);
            if !when.is_empty() {
                println!("{}: {}", label, when);
            }
        }

        let token_text = token.to_string();
        println!("status: {}", token_text);
        self.store.write(sentinel::STATUS, &token_text)?;
        Ok(token)
    }

    /// Stamp `job.canceled` and ask SLURM to cancel every recorded job.
    ///
    /// Returns how many cancel requests succeeded.
    pub fn cancel(&self) -> Result<usize> {
        self.store.write(sentinel::CANCELED, &timestamp::now())?;

        let ids = self.store.slurm_ids();
        if ids.is_empty() {
            println!("No slurm id found -- maybe didn't submit properly?");
            return Ok(0);
        }

        let client = self.client();
        let mut canceled = 0;
        for id in &ids {
            println!("canceling slurm id: {}", id);
            match client.cancel(id) {
                Ok(()) => canceled += 1,
                Err(e) => println!("Failed to cancel job {}: {}", id, e),
            }
        }
        Ok(canceled)
    }

    /// Write the cluster and user queue listings to `job.queue`.
    pub fn queue(&self) -> Result<()> {
        let client = self.client();
        let now = timestamp::to_local(&chrono::Utc::now());
        let queue_name = self.config.queue.as_deref().unwrap_or("all");

        let mut out = vec![
            format!("queue at: {}\n", now),
            format!("sinfo on: {}\n", queue_name),
        ];
        match client.cluster_info() {
            Ok(lines) => out.extend(lines),
            Err(e) => println!("Failed to run sinfo: {}", e),
        }

        out.push(format!("\nsqueue -u {}\n", self.identity.user));
        match client.queue_info(&self.identity.user) {
            Ok(lines) => out.extend(lines),
            Err(e) => println!("Failed to run squeue: {}", e),
        }

        self.store.write(sentinel::QUEUE, &out.join("\n"))
    }

    /// Result files in the job directory, plus the results subdirectory in array mode.
    pub fn results(&self) -> Result<Vec<String>> {
        let mut found = matching_files(self.store.dir(), &self.config.result_suffixes)?;

        if self.config.mode == Mode::Array {
            let sub = self.store.dir().join(&self.config.results_dir);
            if sub.is_dir() {
                found.extend(
                    matching_files(&sub, &self.config.result_suffixes)?
                        .into_iter()
                        .map(|name| format!("{}/{}", self.config.results_dir, name)),
                );
            }
        }

        for name in &found {
            println!("{}", name);
        }
        Ok(found)
    }

    /// Collate per-run files under `gresults/<subdir>` with `etcat` and push the outputs.
    pub fn etcat(&self, subdir: &str) -> Result<()> {
        let grpath = self.store.dir().join(GRESULTS_DIR).join(subdir);
        let suffix = format!("{}.tsv", ETCAT_TYPE);

        let mut files = if grpath.is_dir() {
            matching_files(&grpath, std::slice::from_ref(&suffix))?
        } else {
            Vec::new()
        };
        if files.is_empty() {
            println!("no epoch files in path: {}", grpath.display());
            return Ok(());
        }
        files.sort();

        // The base file carries no run number.
        let Some(base) = files.iter().find(|f| !f.contains("_00")) else {
            println!("no base run file in path: {}", grpath.display());
            return Ok(());
        };
        let stem = &base[..base.len() - suffix.len()];
        let kind = &ETCAT_TYPE[1..];
        let avg_out = format!("{}_avg{}.tsv", stem, kind);
        let all_out = format!("{}_all{}.tsv", stem, kind);

        let mut avg_args = vec!["-avg".to_string(), "-o".to_string(), avg_out.clone()];
        avg_args.extend(files.iter().cloned());
        self.run_step("etcat", &avg_args, &grpath);

        let mut all_args = vec!["-d".to_string(), "-o".to_string(), all_out.clone()];
        all_args.extend(files.iter().cloned());
        self.run_step("etcat", &all_args, &grpath);

        self.run_step("git", &["add".to_string(), all_out, avg_out], &grpath);
        self.run_step(
            "git",
            &["commit".to_string(), "-am".to_string(), "etcat data".to_string()],
            &grpath,
        );
        self.run_step("git", &["push".to_string()], &grpath);
        Ok(())
    }

    fn run_step(&self, program: &str, args: &[String], cwd: &Path) {
        let what = match args.first() {
            Some(sub) if program == "git" => format!("{} {}", program, sub),
            _ => program.to_string(),
        };
        match self.runner.run(program, args, Some(cwd)) {
            Ok(result) if result.success() => {}
            Ok(result) => println!("Failed to run {}: exit code {}", what, result.return_code),
            Err(e) => println!("Failed to run {}: {:#}", what, e),
        }
    }
}

/// File names in `dir` ending with any of `suffixes`, in directory order.
fn matching_files(dir: &Path, suffixes: &[String]) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if suffixes.iter().any(|s| name.ends_with(s.as_str())) {
            names.push(name);
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::FakeRunner;
    use tempfile::TempDir;

    fn identity() -> JobIdentity {
        JobIdentity {
            project: "ra25".to_string(),
            job_id: "JOB0001".to_string(),
            user: "alice".to_string(),
        }
    }

    fn read(dir: &TempDir, name: &str) -> String {
        std::fs::read_to_string(dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_simple_submit_records_id() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(sentinel::ARGS), "--epochs 5\n").unwrap();
        let (cfg, id, runner) = (JobConfig::default(), identity(), FakeRunner::new());
        runner.push_ok("Submitted batch job 9001\n");

        let manager = JobManager::new(dir.path(), &cfg, &id, &runner);
        assert_eq!(manager.submit().unwrap(), Some(9001));

        assert_eq!(read(&dir, sentinel::SLURM_ID), "9001\n");
        assert!(read(&dir, sentinel::SBATCH).contains("./ra25 --nogui --epochs 5\n"));
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "sbatch");
        assert_eq!(calls[0].args, vec![dir.path().join("job.sbatch").to_string_lossy().to_string()]);
        assert_eq!(calls[0].cwd.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_submit_twice_is_refused() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(sentinel::SBATCH), "#!/bin/bash -l\n# original\n").unwrap();
        let (cfg, id, runner) = (JobConfig::default(), identity(), FakeRunner::new());

        let manager = JobManager::new(dir.path(), &cfg, &id, &runner);
        assert_eq!(manager.submit().unwrap(), None);

        assert_eq!(read(&dir, sentinel::SBATCH), "#!/bin/bash -l\n# original\n");
        assert!(runner.calls().is_empty());
        assert!(!dir.path().join(sentinel::SLURM_ID).exists());
    }

    #[test]
    fn test_array_submit_chains_dependencies() {
        let dir = TempDir::new().unwrap();
        let (cfg, id, runner) = (JobConfig::for_mode(Mode::Array), identity(), FakeRunner::new());
        runner.push_ok("Submitted batch job 101\n");
        runner.push_ok("Submitted batch job 102\n");
        runner.push_ok("Submitted batch job 103\n");

        let manager = JobManager::new(dir.path(), &cfg, &id, &runner);
        assert_eq!(manager.submit().unwrap(), Some(102));

        assert_eq!(read(&dir, sentinel::SLURM_ID), "101\n102\n103\n");
        assert!(!read(&dir, sentinel::SETUP_SBATCH).contains("--dependency"));
        assert!(read(&dir, sentinel::SBATCH).contains("#SBATCH --dependency=afterany:101\n"));
        assert!(read(&dir, sentinel::CLEANUP_SBATCH).contains("#SBATCH --dependency=afterany:102\n"));

        let submitted: Vec<String> = runner
            .calls()
            .iter()
            .map(|c| c.args[0].rsplit('/').next().unwrap().to_string())
            .collect();
        assert_eq!(submitted, vec!["job.setup.sbatch", "job.sbatch", "job.cleanup.sbatch"]);
        assert!(runner.calls().iter().all(|c| c.cwd.as_deref() == Some(dir.path())));
    }

    #[test]
    fn test_array_submit_stops_on_failure() {
        let dir = TempDir::new().unwrap();
        let (cfg, id, runner) = (JobConfig::for_mode(Mode::Array), identity(), FakeRunner::new());
        runner.push_exit(1, "sbatch: error: Batch job submission failed");

        let manager = JobManager::new(dir.path(), &cfg, &id, &runner);
        assert_eq!(manager.submit().unwrap(), None);

        assert_eq!(runner.calls().len(), 1);
        assert!(!dir.path().join(sentinel::SLURM_ID).exists());
        assert!(!dir.path().join(sentinel::SBATCH).exists());
    }

    #[test]
    fn test_simple_status() {
        let dir = TempDir::new().unwrap();
        let (cfg, id, runner) = (JobConfig::default(), identity(), FakeRunner::new());
        std::fs::write(dir.path().join(sentinel::SLURM_ID), "555\n").unwrap();
        runner.push_ok("STATE\nRUNNING\n");
        runner.push_exit(1, "slurm_load_jobs error: Invalid job id specified");

        let manager = JobManager::new(dir.path(), &cfg, &id, &runner);
        assert_eq!(manager.status().unwrap().to_string(), "RUNNING");
        assert_eq!(read(&dir, sentinel::STATUS), "RUNNING\n");

        assert_eq!(manager.status().unwrap(), StatusToken::NotFound);
        assert_eq!(read(&dir, sentinel::STATUS), "NOTFOUND\n");
        assert_eq!(runner.call_lines(), vec!["squeue -j 555 -o %T", "squeue -j 555 -o %T"]);
    }

    #[test]
    fn test_array_status_walks_chain() {
        let dir = TempDir::new().unwrap();
        let (cfg, id, runner) = (JobConfig::for_mode(Mode::Array), identity(), FakeRunner::new());
        std::fs::write(dir.path().join(sentinel::SLURM_ID), "1\n2\n3\n").unwrap();
        runner.push_exit(1, "slurm_load_jobs error: Invalid job id specified");
        runner.push_ok("STATE\nRUNNING\nRUNNING\nPENDING\n");

        let manager = JobManager::new(dir.path(), &cfg, &id, &runner);
        assert_eq!(manager.status().unwrap().to_string(), "RUNNING2 PENDING1");
        assert_eq!(read(&dir, sentinel::STATUS), "RUNNING2 PENDING1\n");
        assert_eq!(runner.call_lines(), vec!["squeue -j 1 -o %T", "squeue -j 2 -o %T"]);
    }

    #[test]
    fn test_status_when_squeue_times_out() {
        let dir = TempDir::new().unwrap();
        let (cfg, id, runner) = (JobConfig::for_mode(Mode::Array), identity(), FakeRunner::new());
        std::fs::write(dir.path().join(sentinel::SLURM_ID), "1\n2\n3\n").unwrap();
        for _ in 0..3 {
            runner.push_exit(1, "slurm_load_jobs error: Socket timed out on send/recv operation");
        }

        let manager = JobManager::new(dir.path(), &cfg, &id, &runner);
        assert_eq!(manager.status().unwrap(), StatusToken::Unknown);
        assert_eq!(read(&dir, sentinel::STATUS), "UNKNOWN\n");
        assert_eq!(runner.call_lines(), vec!["squeue -j 1 -o %T"]);
    }

    #[test]
    fn test_status_without_squeue() {
        let dir = TempDir::new().unwrap();
        let (cfg, id, runner) = (JobConfig::for_mode(Mode::Array), identity(), FakeRunner::new());
        std::fs::write(dir.path().join(sentinel::SLURM_ID), "1\n2\n3\n").unwrap();
        for _ in 0..3 {
            runner.push_spawn_error("No such file or directory");
        }

        let manager = JobManager::new(dir.path(), &cfg, &id, &runner);
        assert_eq!(manager.status().unwrap().to_string(), "UNKNOWN");
        assert_eq!(read(&dir, sentinel::STATUS), "UNKNOWN\n");

        // A single-ID job is not reported as gone either.
        std::fs::write(dir.path().join(sentinel::SLURM_ID), "4\n").unwrap();
        assert_eq!(manager.status().unwrap(), StatusToken::Unknown);
    }

    #[test]
    fn test_status_without_ids() {
        let dir = TempDir::new().unwrap();
        let (cfg, id, runner) = (JobConfig::default(), identity(), FakeRunner::new());

        let manager = JobManager::new(dir.path(), &cfg, &id, &runner);
        assert_eq!(manager.status().unwrap(), StatusToken::NoSlurmId);
        assert_eq!(read(&dir, sentinel::STATUS), "NOSLURMID\n");
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_cancel_attempts_every_id() {
        let dir = TempDir::new().unwrap();
        let (cfg, id, runner) = (JobConfig::for_mode(Mode::Array), identity(), FakeRunner::new());
        std::fs::write(dir.path().join(sentinel::SLURM_ID), "1\n2\n3\n").unwrap();
        runner.push_exit(1, "scancel: error: Kill job error on job id 1");

        let manager = JobManager::new(dir.path(), &cfg, &id, &runner);
        assert_eq!(manager.cancel().unwrap(), 2);

        assert_eq!(runner.call_lines(), vec!["scancel 1", "scancel 2", "scancel 3"]);
        let store = SentinelStore::new(dir.path());
        assert!(timestamp::read(&store, sentinel::CANCELED).is_some());
    }

    #[test]
    fn test_cancel_without_ids_still_stamps() {
        let dir = TempDir::new().unwrap();
        let (cfg, id, runner) = (JobConfig::default(), identity(), FakeRunner::new());

        let manager = JobManager::new(dir.path(), &cfg, &id, &runner);
        assert_eq!(manager.cancel().unwrap(), 0);
        assert!(dir.path().join(sentinel::CANCELED).exists());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_queue_report() {
        let dir = TempDir::new().unwrap();
        let cfg = JobConfig {
            queue: Some("oreillylab".to_string()),
            ..JobConfig::default()
        };
        let (id, runner) = (identity(), FakeRunner::new());
        runner.push_ok("PARTITION AVAIL\nlow up\n");
        runner.push_exit(1, "squeue: error: Invalid user");

        let manager = JobManager::new(dir.path(), &cfg, &id, &runner);
        manager.queue().unwrap();

        let report = read(&dir, sentinel::QUEUE);
        assert!(report.starts_with("queue at: "));
        assert!(report.contains("\nsinfo on: oreillylab\n\nPARTITION AVAIL\nlow up\n"));
        assert!(report.ends_with("\nsqueue -u alice\n\n"));
        assert_eq!(runner.call_lines(), vec!["sinfo", "squeue -u alice"]);
    }

    #[test]
    fn test_results_listing() {
        let dir = TempDir::new().unwrap();
        for name in ["a_epc.tsv", "b.csv", "notes.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        std::fs::create_dir(dir.path().join("results")).unwrap();
        std::fs::write(dir.path().join("results/r_run.tsv"), "").unwrap();
        let (id, runner) = (identity(), FakeRunner::new());

        let cfg = JobConfig::default();
        let mut simple = JobManager::new(dir.path(), &cfg, &id, &runner).results().unwrap();
        simple.sort();
        assert_eq!(simple, vec!["a_epc.tsv", "b.csv"]);

        let cfg = JobConfig::for_mode(Mode::Array);
        let array = JobManager::new(dir.path(), &cfg, &id, &runner).results().unwrap();
        assert_eq!(array.len(), 3);
        assert_eq!(array.last().map(String::as_str), Some("results/r_run.tsv"));
    }

    #[test]
    fn test_etcat_collates_and_pushes() {
        let dir = TempDir::new().unwrap();
        let grpath = dir.path().join(GRESULTS_DIR).join("v1");
        std::fs::create_dir_all(&grpath).unwrap();
        for name in ["ra25_run.tsv", "ra25_001_run.tsv", "ra25_000_run.tsv", "ra25_epc.tsv"] {
            std::fs::write(grpath.join(name), "").unwrap();
        }
        let (cfg, id, runner) = (JobConfig::for_mode(Mode::Array), identity(), FakeRunner::new());
        runner.push_ok("");
        runner.push_exit(1, "etcat: bad column");

        JobManager::new(dir.path(), &cfg, &id, &runner).etcat("v1").unwrap();

        assert_eq!(
            runner.call_lines(),
            vec![
                "etcat -avg -o ra25_avgrun.tsv ra25_000_run.tsv ra25_001_run.tsv ra25_run.tsv",
                "etcat -d -o ra25_allrun.tsv ra25_000_run.tsv ra25_001_run.tsv ra25_run.tsv",
                "git add ra25_allrun.tsv ra25_avgrun.tsv",
                "git commit -am etcat data",
                "git push",
            ]
        );
        assert!(runner.calls().iter().all(|c| c.cwd.as_deref() == Some(grpath.as_path())));
    }

    #[test]
    fn test_etcat_without_files() {
        let dir = TempDir::new().unwrap();
        let (cfg, id, runner) = (JobConfig::for_mode(Mode::Array), identity(), FakeRunner::new());
        JobManager::new(dir.path(), &cfg, &id, &runner).etcat("missing").unwrap();
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_etcat_without_base_file() {
        let dir = TempDir::new().unwrap();
        let grpath = dir.path().join(GRESULTS_DIR).join("v1");
        std::fs::create_dir_all(&grpath).unwrap();
        for name in ["ra25_000_run.tsv", "ra25_001_run.tsv"] {
            std::fs::write(grpath.join(name), "").unwrap();
        }
        let (cfg, id, runner) = (JobConfig::for_mode(Mode::Array), identity(), FakeRunner::new());

        JobManager::new(dir.path(), &cfg, &id, &runner).etcat("v1").unwrap();
        assert!(runner.calls().is_empty());
        assert!(!grpath.join("ra25_avgrun.tsv").exists());
    }
}
