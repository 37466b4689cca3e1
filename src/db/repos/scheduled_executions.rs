use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{CreateScheduledExecution, ExecutionProgress, ScheduledExecution},
};

#[async_trait]
pub trait ScheduledExecutionRepo: Send + Sync {
    /// Register a new running execution
    async fn create(&self, input: CreateScheduledExecution) -> DbResult<ScheduledExecution>;

    /// Get an execution by ID
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<ScheduledExecution>>;

    /// List executions of a scheduled query, newest start time first
    async fn list_by_query(
        &self,
        scheduled_query: &str,
        limit: i64,
    ) -> DbResult<Vec<ScheduledExecution>>;

    /// Apply a progress report from the executor.
    ///
    /// Bumps `last_update_time` to `progress.at`. A terminal state also sets
    /// `end_time`. Returns `DbError::NotFound` for unknown ids and
    /// `DbError::Conflict` when the execution is already terminal.
    async fn record_progress(
        &self,
        id: Uuid,
        progress: ExecutionProgress,
    ) -> DbResult<ScheduledExecution>;

    // ==================== Maintenance Operations ====================

    /// Move running executions whose last progress update is strictly older
    /// than `cutoff` to `timed_out`, stamping `end_time` with `now`.
    ///
    /// Already-terminal executions are never touched, so repeated calls are
    /// idempotent. Returns the number of executions transitioned.
    async fn mark_timed_out_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<u64>;

    /// Delete terminal executions whose end time is strictly older than
    /// `cutoff`. Running executions are never deleted.
    ///
    /// Deletes in batches to avoid locking the database.
    /// Returns the total number of records deleted.
    async fn delete_ended_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: u32,
        max_deletes: u64,
    ) -> DbResult<u64>;
}
