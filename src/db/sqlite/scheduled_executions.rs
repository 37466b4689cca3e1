use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{ScheduledExecutionRepo, TIMED_OUT_ERROR_MESSAGE, truncate_to_millis},
    },
    models::{CreateScheduledExecution, ExecutionProgress, ExecutionState, ScheduledExecution},
};

pub struct SqliteScheduledExecutionRepo {
    pool: SqlitePool,
}

impl SqliteScheduledExecutionRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_state(s: &str) -> DbResult<ExecutionState> {
        s.parse().map_err(|e: String| DbError::Internal(e))
    }

    fn row_to_execution(row: &SqliteRow) -> DbResult<ScheduledExecution> {
        let id: String = row.get("id");
        let state: String = row.get("state");

        Ok(ScheduledExecution {
            id: parse_uuid(&id)?,
            scheduled_query: row.get("scheduled_query"),
            executor_query_id: row.get("executor_query_id"),
            state: Self::parse_state(&state)?,
            start_time: row.get("start_time"),
            last_update_time: row.get("last_update_time"),
            end_time: row.get("end_time"),
            error_message: row.get("error_message"),
        })
    }
}

#[async_trait]
impl ScheduledExecutionRepo for SqliteScheduledExecutionRepo {
    async fn create(&self, input: CreateScheduledExecution) -> DbResult<ScheduledExecution> {
        if input.scheduled_query.is_empty() {
            return Err(DbError::Validation(
                "scheduled_query cannot be empty".into(),
            ));
        }

        let id = Uuid::new_v4();
        let start_time = truncate_to_millis(input.start_time);

        sqlx::query(
            r#"
            INSERT INTO scheduled_executions (
                id, scheduled_query, executor_query_id, state,
                start_time, last_update_time, end_time, error_message
            )
            VALUES (?, ?, ?, ?, ?, ?, NULL, NULL)
            "#,
        )
        .bind(id.to_string())
        .bind(&input.scheduled_query)
        .bind(&input.executor_query_id)
        .bind(ExecutionState::Running.to_string())
        .bind(start_time)
        .bind(start_time)
        .execute(&self.pool)
        .await?;

        Ok(ScheduledExecution {
            id,
            scheduled_query: input.scheduled_query,
            executor_query_id: input.executor_query_id,
            state: ExecutionState::Running,
            start_time,
            last_update_time: start_time,
            end_time: None,
            error_message: None,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<ScheduledExecution>> {
        let row = sqlx::query(
            r#"
            SELECT id, scheduled_query, executor_query_id, state,
                   start_time, last_update_time, end_time, error_message
            FROM scheduled_executions
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_execution).transpose()
    }

    async fn list_by_query(
        &self,
        scheduled_query: &str,
        limit: i64,
    ) -> DbResult<Vec<ScheduledExecution>> {
        let rows = sqlx::query(
            r#"
            SELECT id, scheduled_query, executor_query_id, state,
                   start_time, last_update_time, end_time, error_message
            FROM scheduled_executions
            WHERE scheduled_query = ?
            ORDER BY start_time DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(scheduled_query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_execution).collect()
    }

    async fn record_progress(
        &self,
        id: Uuid,
        progress: ExecutionProgress,
    ) -> DbResult<ScheduledExecution> {
        let at = truncate_to_millis(progress.at);
        let end_time = progress.state.is_terminal().then_some(at);

        // Only running executions accept progress; a late report must not
        // resurrect an execution the sweep already timed out.
        let result = sqlx::query(
            r#"
            UPDATE scheduled_executions
            SET state = ?,
                executor_query_id = COALESCE(?, executor_query_id),
                last_update_time = ?,
                end_time = ?,
                error_message = COALESCE(?, error_message)
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(progress.state.to_string())
        .bind(&progress.executor_query_id)
        .bind(at)
        .bind(end_time)
        .bind(&progress.error_message)
        .bind(id.to_string())
        .bind(ExecutionState::Running.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_by_id(id).await? {
                Some(existing) => Err(DbError::Conflict(format!(
                    "Execution {} is already {}",
                    id, existing.state
                ))),
                None => Err(DbError::NotFound),
            };
        }

        self.get_by_id(id).await?.ok_or(DbError::NotFound)
    }

    async fn mark_timed_out_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_executions
            SET state = ?,
                end_time = ?,
                error_message = ?
            WHERE state = ?
              AND last_update_time < ?
            "#,
        )
        .bind(ExecutionState::TimedOut.to_string())
        .bind(truncate_to_millis(now))
        .bind(TIMED_OUT_ERROR_MESSAGE)
        .bind(ExecutionState::Running.to_string())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_ended_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: u32,
        max_deletes: u64,
    ) -> DbResult<u64> {
        let mut total_deleted: u64 = 0;

        loop {
            if total_deleted >= max_deletes {
                break;
            }

            let remaining = max_deletes - total_deleted;
            let limit = std::cmp::min(batch_size as u64, remaining) as i64;

            // Delete a batch using subquery to select IDs
            let result = sqlx::query(
                r#"
                DELETE FROM scheduled_executions
                WHERE id IN (
                    SELECT id FROM scheduled_executions
                    WHERE state != ?
                      AND end_time IS NOT NULL
                      AND end_time < ?
                    LIMIT ?
                )
                "#,
            )
            .bind(ExecutionState::Running.to_string())
            .bind(cutoff)
            .bind(limit)
            .execute(&self.pool)
            .await?;

            let rows_deleted = result.rows_affected();
            total_deleted += rows_deleted;

            if rows_deleted < limit as u64 {
                break;
            }
        }

        Ok(total_deleted)
    }
}
