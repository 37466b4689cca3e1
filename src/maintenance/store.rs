//! Storage capability consumed by the execution sweep.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use crate::{
    config::ExecutionMaintConfig,
    db::{DbPool, DbResult, ScheduledExecutionRepo, max_deletes_limit},
};

/// Bulk maintenance operations over scheduled query execution records.
///
/// Both operations must be idempotent: the sweep never retries within a
/// cycle and relies on the next cycle to pick up anything left behind.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Mark every running execution whose last progress update is older
    /// than `timeout_secs` as timed out. Returns the number of executions
    /// transitioned.
    async fn mark_timed_out_executions(&self, timeout_secs: u64) -> DbResult<u64>;

    /// Permanently delete every terminal execution that ended more than
    /// `max_age_secs` ago. Running executions are never deleted. Returns the
    /// number of records removed.
    async fn delete_old_executions(&self, max_age_secs: u64) -> DbResult<u64>;
}

/// `ExecutionStore` backed by the configured database.
pub struct DbExecutionStore {
    repo: Arc<dyn ScheduledExecutionRepo>,
    delete_batch_size: u32,
    max_deletes: u64,
}

impl DbExecutionStore {
    /// Batch limits are taken from `config` once; later config reloads only
    /// affect thresholds, not batching.
    pub fn new(db: &DbPool, config: &ExecutionMaintConfig) -> Self {
        Self::from_repo(db.scheduled_executions(), config)
    }

    pub fn from_repo(repo: Arc<dyn ScheduledExecutionRepo>, config: &ExecutionMaintConfig) -> Self {
        Self {
            repo,
            delete_batch_size: config.delete_batch_size.max(1),
            max_deletes: max_deletes_limit(config.max_deletes_per_run),
        }
    }
}

#[async_trait]
impl ExecutionStore for DbExecutionStore {
    async fn mark_timed_out_executions(&self, timeout_secs: u64) -> DbResult<u64> {
        let now = Utc::now();
        let Some(cutoff) = cutoff_before(now, timeout_secs) else {
            return Ok(0);
        };
        let marked = self.repo.mark_timed_out_before(cutoff, now).await?;

        if marked > 0 {
            tracing::debug!(
                marked = marked,
                cutoff = %cutoff,
                "Marked stalled scheduled query executions as timed out"
            );
        }

        Ok(marked)
    }

    async fn delete_old_executions(&self, max_age_secs: u64) -> DbResult<u64> {
        let Some(cutoff) = cutoff_before(Utc::now(), max_age_secs) else {
            return Ok(0);
        };
        let deleted = self
            .repo
            .delete_ended_before(cutoff, self.delete_batch_size, self.max_deletes)
            .await?;

        if deleted > 0 {
            tracing::debug!(
                deleted = deleted,
                cutoff = %cutoff,
                "Deleted old scheduled query executions"
            );
        }

        Ok(deleted)
    }
}

/// Unix timestamp of 0001-01-01T00:00:00Z. Both backends store and compare
/// timestamps from this instant onwards.
const EARLIEST_CUTOFF_SECS: i64 = -62_135_596_800;

/// The instant `secs` seconds before `now`.
///
/// Returns `None` when that instant precedes every storable timestamp, in
/// which case no record can be older than the cutoff.
pub(crate) fn cutoff_before(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| now.checked_sub_signed(delta))
        .filter(|cutoff| cutoff.timestamp() >= EARLIEST_CUTOFF_SECS)
}



// ============================================================================
// PostgreSQL Tests - Require Docker, run with `cargo test -- --ignored`
// ============================================================================
