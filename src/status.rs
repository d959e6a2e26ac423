//! Status aggregation over `squeue` output.
//!
//! Raw query lines are parsed into a [`QueryResult`] and then folded, stage
//! by stage, into the one [`StatusToken`] written to `job.status`.

use std::fmt;

/// State column value as printed by `squeue -o %T`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlurmState {
    Pending,
    Configuring,
    Running,
    Suspended,
    Completing,
    Completed,
    Cancelled,
    Failed,
    Timeout,
    NodeFail,
    Preempted,
    OutOfMemory,
    /// Anything else, kept verbatim.
    Other(String),
}

impl SlurmState {
    pub fn from_slurm_state(state: &str) -> Self {
        match state.trim() {
            "PENDING" => SlurmState::Pending,
            "CONFIGURING" => SlurmState::Configuring,
            "RUNNING" => SlurmState::Running,
            "SUSPENDED" => SlurmState::Suspended,
            "COMPLETING" => SlurmState::Completing,
            "COMPLETED" => SlurmState::Completed,
            "CANCELLED" => SlurmState::Cancelled,
            "FAILED" => SlurmState::Failed,
            "TIMEOUT" => SlurmState::Timeout,
            "NODE_FAIL" => SlurmState::NodeFail,
            "PREEMPTED" => SlurmState::Preempted,
            "OUT_OF_MEMORY" => SlurmState::OutOfMemory,
            other => SlurmState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SlurmState::Pending => "PENDING",
            SlurmState::Configuring => "CONFIGURING",
            SlurmState::Running => "RUNNING",
            SlurmState::Suspended => "SUSPENDED",
            SlurmState::Completing => "COMPLETING",
            SlurmState::Completed => "COMPLETED",
            SlurmState::Cancelled => "CANCELLED",
            SlurmState::Failed => "FAILED",
            SlurmState::Timeout => "TIMEOUT",
            SlurmState::NodeFail => "NODE_FAIL",
            SlurmState::Preempted => "PREEMPTED",
            SlurmState::OutOfMemory => "OUT_OF_MEMORY",
            SlurmState::Other(s) => s,
        }
    }
}

impl fmt::Display for SlurmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed `squeue` response for one job ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    /// No data lines: the job has left the live queue.
    Absent,
    Single(SlurmState),
    /// Array tasks, in output order.
    Many(Vec<SlurmState>),
    /// The query itself failed, so the job's state is not known.
    Unavailable,
}

const HEADER: &str = "STATE";

impl QueryResult {
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut states: Vec<SlurmState> = lines
            .iter()
            .map(|l| l.as_ref().trim())
            .filter(|l| !l.is_empty() && *l != HEADER)
            .map(SlurmState::from_slurm_state)
            .collect();
        match states.len() {
            0 => QueryResult::Absent,
            1 => QueryResult::Single(states.remove(0)),
            _ => QueryResult::Many(states),
        }
    }
}

/// Summarised status, written to `job.status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusToken {
    /// No scheduler IDs recorded.
    NoSlurmId,
    /// A single job is no longer in the queue.
    NotFound,
    /// Setup job is running.
    Compiling,
    /// Cleanup job is running.
    Cleanup,
    State(SlurmState),
    /// Counts per distinct state, in order of first appearance.
    Counts(Vec<(SlurmState, usize)>),
    /// Every stage of the chain has left the queue.
    Completed,
    /// SLURM could not be asked; not a terminal state.
    Unknown,
}

impl fmt::Display for StatusToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusToken::NoSlurmId => f.write_str("NOSLURMID"),
            StatusToken::NotFound => f.write_str("NOTFOUND"),
            StatusToken::Compiling => f.write_str("COMPILING"),
            StatusToken::Cleanup => f.write_str("CLEANUP"),
            StatusToken::State(state) => write!(f, "{}", state),
            StatusToken::Counts(counts) => {
                let parts: Vec<String> = counts
                    .iter()
                    .map(|(state, n)| format!("{}{}", state, n))
                    .collect();
                f.write_str(&parts.join(" "))
            }
            StatusToken::Completed => f.write_str("COMPLETED"),
            StatusToken::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// Count each distinct state, preserving first-seen order.
pub fn count_states(states: &[SlurmState]) -> Vec<(SlurmState, usize)> {
    let mut counts: Vec<(SlurmState, usize)> = Vec::new();
    for state in states {
        match counts.iter_mut().find(|(s, _)| s == state) {
            Some((_, n)) => *n += 1,
            None => counts.push((state.clone(), 1)),
        }
    }
    counts
}

fn summarize(result: QueryResult) -> Option<StatusToken> {
    match result {
        QueryResult::Absent => None,
        QueryResult::Single(state) => Some(StatusToken::State(state)),
        QueryResult::Many(states) => Some(StatusToken::Counts(count_states(&states))),
        QueryResult::Unavailable => Some(StatusToken::Unknown),
    }
}

/// Position of a job ID within the submitted chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Setup,
    Array,
    Cleanup,
}

impl Stage {
    fn token(self, result: QueryResult) -> Option<StatusToken> {
        match (self, result) {
            (Stage::Setup, QueryResult::Single(SlurmState::Running)) => Some(StatusToken::Compiling),
            (Stage::Cleanup, QueryResult::Single(SlurmState::Running)) => Some(StatusToken::Cleanup),
            (_, result) => summarize(result),
        }
    }
}

/// Fold the recorded job IDs into one status token.
///
/// `query` is called lazily, in dependency order, and only until a stage is
/// still present in the queue. A single ID is reported directly
/// (`NOTFOUND` once gone); a chain walks setup → array → cleanup and is
/// `COMPLETED` once every stage has drained. A stage whose query failed
/// stops the walk with `UNKNOWN`.
pub fn aggregate<F>(ids: &[String], mut query: F) -> StatusToken
where
    F: FnMut(&str) -> QueryResult,
{
    match ids {
        [] => StatusToken::NoSlurmId,
        [only] => summarize(query(only.as_str())).unwrap_or(StatusToken::NotFound),
        chain => {
            let stages = [Stage::Setup, Stage::Array, Stage::Cleanup];
            for (id, stage) in chain.iter().zip(stages) {
                if let Some(token) = stage.token(query(id.as_str())) {
                    return token;
                }
            }
            StatusToken::Completed
        }
    }
}
