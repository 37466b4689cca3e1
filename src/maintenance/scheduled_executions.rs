//! Scheduled query execution sweep.
//!
//! Each cycle first closes running executions that stopped reporting
//! progress, then purges terminal executions past their retention period.
//! A failing cycle is logged and dropped; the next cycle starts fresh.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::FutureExt;

use super::{ExecutionStore, MaintenanceTask};
use crate::{
    config::{MetastoreConfig, ScheduledQueriesConfig},
    db::DbResult,
    observability::metrics,
};

/// Task name used in logs and metric labels.
pub const TASK_NAME: &str = "scheduled_query_executions";

/// Results from a single sweep cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepRunResult {
    /// Number of running executions moved to timed out.
    pub timed_out: u64,
    /// Number of terminal executions deleted.
    pub deleted: u64,
}

/// Run one maintenance cycle over scheduled query executions.
///
/// Never fails: storage errors and panics raised while sweeping are logged
/// at error level and swallowed. Does nothing when scheduled queries are
/// disabled.
pub async fn run_sweep_cycle(config: &ScheduledQueriesConfig, store: &dyn ExecutionStore) {
    if !config.enabled {
        return;
    }

    match AssertUnwindSafe(sweep(config, store)).catch_unwind().await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            tracing::error!(
                task = TASK_NAME,
                error = %e,
                detail = ?e,
                "Error while running scheduled query execution maintenance: {}",
                e
            );
            metrics::record_maintenance_error(TASK_NAME);
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(
                task = TASK_NAME,
                error = %message,
                "Scheduled query execution maintenance panicked: {}",
                message
            );
            metrics::record_maintenance_error(TASK_NAME);
        }
    }
}

/// Timeout marking runs first; deletion is skipped if it fails.
async fn sweep(
    config: &ScheduledQueriesConfig,
    store: &dyn ExecutionStore,
) -> DbResult<SweepRunResult> {
    let execution = &config.execution;
    let mut result = SweepRunResult::default();

    result.timed_out = store
        .mark_timed_out_executions(execution.progress_timeout_secs)
        .await?;
    if result.timed_out > 0 {
        tracing::info!(
            task = TASK_NAME,
            count = result.timed_out,
            "Number of timed out scheduled query executions: {}",
            result.timed_out
        );
        metrics::record_maintenance_rows(TASK_NAME, "timed_out", result.timed_out);
    }

    result.deleted = store.delete_old_executions(execution.max_age_secs).await?;
    if result.deleted > 0 {
        tracing::info!(
            task = TASK_NAME,
            count = result.deleted,
            "Number of deleted entries: {}",
            result.deleted
        );
        metrics::record_maintenance_rows(TASK_NAME, "deleted", result.deleted);
    }

    Ok(result)
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Periodic task wrapping [`run_sweep_cycle`].
pub struct ScheduledExecutionsMaintTask {
    store: Arc<dyn ExecutionStore>,
}

impl ScheduledExecutionsMaintTask {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MaintenanceTask for ScheduledExecutionsMaintTask {
    fn name(&self) -> &'static str {
        TASK_NAME
    }

    fn run_frequency(&self, config: &MetastoreConfig) -> Duration {
        config.scheduled_queries.execution.interval()
    }

    async fn run_cycle(&self, config: &MetastoreConfig) {
        run_sweep_cycle(&config.scheduled_queries, self.store.as_ref()).await;
    }
}


#[cfg(all(test, feature = "database-sqlite"))]
mod sqlite_tests {
    use chrono::{Duration, Utc};
    use tracing::Level;

    use super::*;
    use crate::{
        db::tests::harness::create_migrated_sqlite_db,
        maintenance::DbExecutionStore,
        models::{CreateScheduledExecution, ExecutionProgress, ExecutionState},
        tests::log_capture::LogCapture,
    };

    #[tokio::test]
    async fn test_cycle_times_out_stalled_and_purges_old() {
        let db = create_migrated_sqlite_db().await;
        let repo = db.scheduled_executions();
        let now = Utc::now();

        let running = |name: &str, start: chrono::DateTime<Utc>| CreateScheduledExecution {
            scheduled_query: name.to_string(),
            executor_query_id: None,
            start_time: start,
        };

        // Stalled: last progress 10 minutes ago.
        let stalled = repo
            .create(running("stalled", now - Duration::minutes(10)))
            .await
            .unwrap();
        // Healthy: last progress 2 minutes ago.
        let healthy = repo
            .create(running("healthy", now - Duration::minutes(2)))
            .await
            .unwrap();
        // Finished 40 days ago.
        let old = repo
            .create(running("old", now - Duration::days(41)))
            .await
            .unwrap();
        repo.record_progress(
            old.id,
            ExecutionProgress {
                state: ExecutionState::Finished,
                executor_query_id: None,
                error_message: None,
                at: now - Duration::days(40),
            },
        )
        .await
        .unwrap();

        let config = ScheduledQueriesConfig {
            enabled: true,
            execution: crate::config::ExecutionMaintConfig {
                progress_timeout_secs: 300,
                max_age_secs: 30 * 86400,
                ..Default::default()
            },
        };
        let store = DbExecutionStore::new(&db, &config.execution);

        let capture = LogCapture::new();
        let _guard = capture.install();
        run_sweep_cycle(&config, &store).await;

        let stalled = repo.get_by_id(stalled.id).await.unwrap().unwrap();
        assert_eq!(stalled.state, ExecutionState::TimedOut);
        assert!(stalled.end_time.is_some());
        let healthy = repo.get_by_id(healthy.id).await.unwrap().unwrap();
        assert_eq!(healthy.state, ExecutionState::Running);
        assert!(repo.get_by_id(old.id).await.unwrap().is_none());

        let info: Vec<String> = capture
            .at_level(Level::INFO)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(
            info,
            vec![
                "Number of timed out scheduled query executions: 1".to_string(),
                "Number of deleted entries: 1".to_string(),
            ]
        );

        // The freshly timed out execution is retained until it ages out.
        capture.clear();
        run_sweep_cycle(&config, &store).await;
        assert!(repo.get_by_id(stalled.id).await.unwrap().is_some());
        assert!(capture.events().is_empty());
    }
}
