//! Periodic driver for maintenance tasks.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{MaintenanceTask, scheduled_executions::panic_message};
use crate::config::MetastoreConfig;

/// Runs registered maintenance tasks until shut down.
///
/// Every task gets its own loop: run a cycle, then sleep for the task's
/// frequency. Cycles of the same task never overlap, and a panicking cycle
/// is logged without stopping the loop or affecting other tasks.
pub struct MaintenanceHost {
    tasks: Vec<Arc<dyn MaintenanceTask>>,
    config: watch::Receiver<Arc<MetastoreConfig>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl MaintenanceHost {
    /// Create a host reading configuration from `config`.
    ///
    /// Every cycle uses the value current when it starts, so sending a new
    /// config takes effect from the next cycle onwards.
    pub fn new(config: watch::Receiver<Arc<MetastoreConfig>>) -> Self {
        Self {
            tasks: Vec::new(),
            config,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Register a task. Tasks registered after [`start`](Self::start) are
    /// not run.
    pub fn register(&mut self, task: Arc<dyn MaintenanceTask>) -> &mut Self {
        self.tasks.push(task);
        self
    }

    /// Spawn one loop per registered task.
    pub fn start(&self) {
        for task in &self.tasks {
            tracing::info!(task = task.name(), "Starting maintenance task");
            self.tracker.spawn(run_task_loop(
                Arc::clone(task),
                self.config.clone(),
                self.shutdown.clone(),
            ));
        }
    }

    /// Token cancelled when the host shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop all task loops and wait up to `timeout` for in-flight cycles.
    ///
    /// Returns `false` if some cycles were still running at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.shutdown.cancel();
        self.tracker.close();

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                tracing::info!("All maintenance tasks stopped");
                true
            }
            Err(_) => {
                tracing::warn!("Timeout waiting for maintenance tasks, some may not have completed");
                false
            }
        }
    }
}

async fn run_task_loop(
    task: Arc<dyn MaintenanceTask>,
    mut config: watch::Receiver<Arc<MetastoreConfig>>,
    shutdown: CancellationToken,
) {
    let name = task.name();

    while !shutdown.is_cancelled() {
        let snapshot = Arc::clone(&config.borrow_and_update());

        if let Err(panic) = AssertUnwindSafe(task.run_cycle(&snapshot))
            .catch_unwind()
            .await
        {
            tracing::error!(
                task = name,
                error = %panic_message(panic.as_ref()),
                "Maintenance cycle panicked"
            );
        }

        let interval = task.run_frequency(&snapshot);
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::info!(task = name, "Maintenance task stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use super::*;

    /// Records each cycle and the `enabled` flag it saw.
    #[derive(Default)]
    struct RecordingTask {
        cycles: AtomicUsize,
        seen_enabled: Mutex<Vec<bool>>,
        in_cycle: AtomicBool,
        overlapped: AtomicBool,
        panic_every_cycle: bool,
        cycle_time: Duration,
    }

    impl RecordingTask {
        fn cycles(&self) -> usize {
            self.cycles.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MaintenanceTask for RecordingTask {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn run_frequency(&self, _config: &MetastoreConfig) -> Duration {
            Duration::from_millis(5)
        }

        async fn run_cycle(&self, config: &MetastoreConfig) {
            if self.in_cycle.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            self.cycles.fetch_add(1, Ordering::SeqCst);
            self.seen_enabled
                .lock()
                .unwrap()
                .push(config.scheduled_queries.enabled);

            if !self.cycle_time.is_zero() {
                tokio::time::sleep(self.cycle_time).await;
            }
            self.in_cycle.store(false, Ordering::SeqCst);

            if self.panic_every_cycle {
                panic!("cycle failed");
            }
        }
    }

    fn config_channel() -> (
        watch::Sender<Arc<MetastoreConfig>>,
        watch::Receiver<Arc<MetastoreConfig>>,
    ) {
        watch::channel(Arc::new(MetastoreConfig::default()))
    }

    async fn wait_for_cycles(task: &RecordingTask, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while task.cycles() < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("task did not reach expected cycle count");
    }

    #[tokio::test]
    async fn test_runs_repeatedly_until_shutdown() {
        let (_tx, rx) = config_channel();
        let task = Arc::new(RecordingTask::default());
        let mut host = MaintenanceHost::new(rx);
        host.register(task.clone());
        host.start();

        wait_for_cycles(&task, 3).await;
        assert!(host.shutdown(Duration::from_secs(1)).await);
        assert!(host.shutdown_token().is_cancelled());

        let after_shutdown = task.cycles();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(task.cycles(), after_shutdown);
    }

    #[tokio::test]
    async fn test_panicking_cycle_keeps_loop_alive() {
        let (_tx, rx) = config_channel();
        let task = Arc::new(RecordingTask {
            panic_every_cycle: true,
            ..Default::default()
        });
        let healthy = Arc::new(RecordingTask::default());
        let mut host = MaintenanceHost::new(rx);
        host.register(task.clone()).register(healthy.clone());
        host.start();

        wait_for_cycles(&task, 3).await;
        wait_for_cycles(&healthy, 3).await;
        assert!(host.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_cycles_do_not_overlap() {
        let (_tx, rx) = config_channel();
        let task = Arc::new(RecordingTask {
            cycle_time: Duration::from_millis(10),
            ..Default::default()
        });
        let mut host = MaintenanceHost::new(rx);
        host.register(task.clone());
        host.start();

        wait_for_cycles(&task, 4).await;
        assert!(host.shutdown(Duration::from_secs(1)).await);
        assert!(!task.overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_config_changes_apply_to_next_cycle() {
        let (tx, rx) = config_channel();
        let task = Arc::new(RecordingTask::default());
        let mut host = MaintenanceHost::new(rx);
        host.register(task.clone());
        host.start();

        wait_for_cycles(&task, 1).await;
        let mut disabled = MetastoreConfig::default();
        disabled.scheduled_queries.enabled = false;
        tx.send(Arc::new(disabled)).unwrap();

        let seen_before = task.cycles();
        wait_for_cycles(&task, seen_before + 2).await;
        assert!(host.shutdown(Duration::from_secs(1)).await);

        let seen = task.seen_enabled.lock().unwrap().clone();
        assert!(seen[0]);
        assert_eq!(seen.last(), Some(&false));
    }

    #[tokio::test]
    async fn test_shutdown_times_out_on_long_cycle() {
        let (_tx, rx) = config_channel();
        let task = Arc::new(RecordingTask {
            cycle_time: Duration::from_secs(10),
            ..Default::default()
        });
        let mut host = MaintenanceHost::new(rx);
        host.register(task.clone());
        host.start();

        wait_for_cycles(&task, 1).await;
        assert!(!host.shutdown(Duration::from_millis(20)).await);
    }
}
