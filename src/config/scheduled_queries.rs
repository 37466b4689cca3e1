//! Scheduled query maintenance configuration.
//!
//! Controls the background task that times out stalled scheduled query
//! executions and purges old execution records.
//!
//! # Example
//!
//! ```toml
//! [scheduled_queries]
//! enabled = true
//!
//! [scheduled_queries.execution]
//! progress_timeout_secs = 120
//! max_age_secs = 2592000
//! maint_task_frequency_secs = 60
//! delete_batch_size = 1000
//! max_deletes_per_run = 100000
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Scheduled queries configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct ScheduledQueriesConfig {
    /// Master switch for scheduled query maintenance.
    /// When false, maintenance cycles return immediately without touching
    /// the database.
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Execution record maintenance settings.
    #[serde(default)]
    pub execution: ExecutionMaintConfig,
}

impl Default for ScheduledQueriesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            execution: ExecutionMaintConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Settings for the execution maintenance task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct ExecutionMaintConfig {
    /// Seconds without a progress update after which a running execution
    /// is considered abandoned and marked timed out.
    /// Default: 120
    #[serde(default = "default_progress_timeout_secs")]
    pub progress_timeout_secs: u64,

    /// Seconds after an execution ends before its record is deleted.
    /// Default: 2592000 (30 days)
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// How often the maintenance task runs, in seconds.
    /// Default: 60
    #[serde(default = "default_maint_task_frequency_secs")]
    pub maint_task_frequency_secs: u64,

    /// Batch size for delete operations.
    /// Records are deleted in batches to avoid locking the database.
    /// Default: 1000
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: u32,

    /// Maximum number of records to delete per run.
    /// Set to 0 for unlimited.
    /// Default: 100000
    #[serde(default = "default_max_deletes_per_run")]
    pub max_deletes_per_run: u64,
}

impl Default for ExecutionMaintConfig {
    fn default() -> Self {
        Self {
            progress_timeout_secs: default_progress_timeout_secs(),
            max_age_secs: default_max_age_secs(),
            maint_task_frequency_secs: default_maint_task_frequency_secs(),
            delete_batch_size: default_delete_batch_size(),
            max_deletes_per_run: default_max_deletes_per_run(),
        }
    }
}

fn default_progress_timeout_secs() -> u64 {
    120
}

fn default_max_age_secs() -> u64 {
    30 * 24 * 3600 // 30 days
}

fn default_maint_task_frequency_secs() -> u64 {
    60
}

fn default_delete_batch_size() -> u32 {
    1000
}

fn default_max_deletes_per_run() -> u64 {
    100_000
}

impl ScheduledQueriesConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.execution.validate()
    }
}

impl ExecutionMaintConfig {
    /// Get the maintenance interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.maint_task_frequency_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.maint_task_frequency_secs == 0 {
            return Err(ConfigError::Validation(
                "scheduled_queries.execution.maint_task_frequency_secs must be greater than 0"
                    .into(),
            ));
        }
        if self.delete_batch_size == 0 {
            return Err(ConfigError::Validation(
                "scheduled_queries.execution.delete_batch_size must be greater than 0".into(),
            ));
        }
        // Thresholds are converted to signed durations when computing cutoffs.
        if self.progress_timeout_secs > i64::MAX as u64 / 1000
            || self.max_age_secs > i64::MAX as u64 / 1000
        {
            return Err(ConfigError::Validation(
                "scheduled_queries.execution thresholds are out of range".into(),
            ));
        }
        Ok(())
    }
}
