//! Background maintenance for the metastore.
//!
//! Maintenance work is expressed as [`MaintenanceTask`]s driven by the
//! [`MaintenanceHost`]. Each task runs one cycle at a time on its own loop,
//! reading the latest configuration snapshot at the start of every cycle.
//!
//! Current tasks:
//! - [`ScheduledExecutionsMaintTask`]: times out stalled scheduled query
//!   executions and purges old execution records.

mod host;
mod scheduled_executions;
mod store;

use std::time::Duration;

use async_trait::async_trait;
pub use host::MaintenanceHost;
pub use scheduled_executions::{
    ScheduledExecutionsMaintTask, SweepRunResult, TASK_NAME as SCHEDULED_EXECUTIONS_TASK,
    run_sweep_cycle,
};
pub use store::{DbExecutionStore, ExecutionStore};

use crate::config::MetastoreConfig;

/// A periodic unit of maintenance work.
#[async_trait]
pub trait MaintenanceTask: Send + Sync {
    /// Stable name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Delay between the end of one cycle and the start of the next.
    fn run_frequency(&self, config: &MetastoreConfig) -> Duration;

    /// Run a single cycle. Implementations handle their own errors.
    async fn run_cycle(&self, config: &MetastoreConfig);
}
