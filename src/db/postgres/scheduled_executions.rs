use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{ScheduledExecutionRepo, TIMED_OUT_ERROR_MESSAGE, truncate_to_millis},
    },
    models::{CreateScheduledExecution, ExecutionProgress, ExecutionState, ScheduledExecution},
};

pub struct PostgresScheduledExecutionRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresScheduledExecutionRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn parse_state(s: &str) -> DbResult<ExecutionState> {
        s.parse().map_err(|e: String| DbError::Internal(e))
    }

    fn row_to_execution(row: &PgRow) -> DbResult<ScheduledExecution> {
        Ok(ScheduledExecution {
            id: row.get("id"),
            scheduled_query: row.get("scheduled_query"),
            executor_query_id: row.get("executor_query_id"),
            state: Self::parse_state(&row.get::<String, _>("state"))?,
            start_time: row.get("start_time"),
            last_update_time: row.get("last_update_time"),
            end_time: row.get("end_time"),
            error_message: row.get("error_message"),
        })
    }

    /// Look up an execution on the primary so a read replica's lag cannot
    /// hide a row that was just written.
    async fn get_from_primary(&self, id: Uuid) -> DbResult<Option<ScheduledExecution>> {
        let row = sqlx::query(
            r#"
            SELECT id, scheduled_query, executor_query_id, state,
                   start_time, last_update_time, end_time, error_message
            FROM scheduled_executions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.write_pool)
        .await?;

        row.as_ref().map(Self::row_to_execution).transpose()
    }
}

#[async_trait]
impl ScheduledExecutionRepo for PostgresScheduledExecutionRepo {
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
            VALUES ($1, $2, $3, $4, $5, $5, NULL, NULL)
            "#,
        )
        .bind(id)
        .bind(&input.scheduled_query)
        .bind(&input.executor_query_id)
        .bind(ExecutionState::Running.to_string())
        .bind(start_time)
        .execute(&self.write_pool)
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
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.read_pool)
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
            WHERE scheduled_query = $1
            ORDER BY start_time DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(scheduled_query)
        .bind(limit)
        .fetch_all(&self.read_pool)
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

        let row = sqlx::query(
            r#"
            UPDATE scheduled_executions
            SET state = $1,
                executor_query_id = COALESCE($2, executor_query_id),
                last_update_time = $3,
                end_time = $4,
                error_message = COALESCE($5, error_message)
            WHERE id = $6 AND state = $7
            RETURNING id, scheduled_query, executor_query_id, state,
                      start_time, last_update_time, end_time, error_message
            "#,
        )
        .bind(progress.state.to_string())
        .bind(&progress.executor_query_id)
        .bind(at)
        .bind(end_time)
        .bind(&progress.error_message)
        .bind(id)
        .bind(ExecutionState::Running.to_string())
        .fetch_optional(&self.write_pool)
        .await?;

        match row {
            Some(row) => Self::row_to_execution(&row),
            None => match self.get_from_primary(id).await? {
                Some(existing) => Err(DbError::Conflict(format!(
                    "Execution {} is already {}",
                    id, existing.state
                ))),
                None => Err(DbError::NotFound),
            },
        }
    }

    async fn mark_timed_out_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_executions
            SET state = $1,
                end_time = $2,
                error_message = $3
            WHERE state = $4
              AND last_update_time < $5
            "#,
        )
        .bind(ExecutionState::TimedOut.to_string())
        .bind(truncate_to_millis(now))
        .bind(TIMED_OUT_ERROR_MESSAGE)
        .bind(ExecutionState::Running.to_string())
        .bind(cutoff)
        .execute(&self.write_pool)
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

            // PostgreSQL efficient batched deletion using ctid
            let result = sqlx::query(
                r#"
                DELETE FROM scheduled_executions
                WHERE ctid IN (
                    SELECT ctid FROM scheduled_executions
                    WHERE state != $1
                      AND end_time IS NOT NULL
                      AND end_time < $2
                    LIMIT $3
                )
                "#,
            )
            .bind(ExecutionState::Running.to_string())
            .bind(cutoff)
            .bind(limit)
            .execute(&self.write_pool)
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
