use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a scheduled query execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// The query is running and reporting progress
    Running,
    /// The query completed successfully
    Finished,
    /// The query completed with an error
    Failed,
    /// The query stopped reporting progress and was abandoned by maintenance
    TimedOut,
}

impl ExecutionState {
    /// Whether the execution has reached a final state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionState::Running)
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionState::Running => write!(f, "running"),
            ExecutionState::Finished => write!(f, "finished"),
            ExecutionState::Failed => write!(f, "failed"),
            ExecutionState::TimedOut => write!(f, "timed_out"),
        }
    }
}

impl std::str::FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionState::Running),
            "finished" => Ok(ExecutionState::Finished),
            "failed" => Ok(ExecutionState::Failed),
            "timed_out" => Ok(ExecutionState::TimedOut),
            _ => Err(format!("Invalid execution state: {}", s)),
        }
    }
}

/// One run of a scheduled query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledExecution {
    /// Unique identifier for this execution
    pub id: Uuid,
    /// Name of the schedule that produced this run
    pub scheduled_query: String,
    /// Query id assigned by the executing engine, once known
    pub executor_query_id: Option<String>,
    /// Current lifecycle state
    pub state: ExecutionState,
    /// When the run started
    pub start_time: DateTime<Utc>,
    /// When the executor last reported progress
    pub last_update_time: DateTime<Utc>,
    /// When the run reached a terminal state
    pub end_time: Option<DateTime<Utc>>,
    /// Failure detail for failed and timed out runs
    pub error_message: Option<String>,
}

/// Input for registering a new execution when a scheduled run starts
#[derive(Debug, Clone)]
pub struct CreateScheduledExecution {
    pub scheduled_query: String,
    pub executor_query_id: Option<String>,
    pub start_time: DateTime<Utc>,
}

/// A progress report from the executor
///
/// Reporting a terminal state closes the execution and stamps its end time
/// with `at`.
#[derive(Debug, Clone)]
pub struct ExecutionProgress {
    pub state: ExecutionState,
    pub executor_query_id: Option<String>,
    pub error_message: Option<String>,
    pub at: DateTime<Utc>,
}
