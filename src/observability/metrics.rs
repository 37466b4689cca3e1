//! Prometheus metrics for maintenance tasks.
//!
//! Recording functions are always available and compile to no-ops when the
//! `prometheus` feature is disabled.

#[cfg(feature = "prometheus")]
use metrics::counter;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a Tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    tracing::info!(listen = %config.listen, "Prometheus metrics endpoint started");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!(
            "Metrics are enabled in config but the 'prometheus' feature is not compiled. \
             Rebuild with: cargo build --features prometheus"
        );
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record rows affected by a maintenance task.
///
/// # Arguments
/// * `task` - The maintenance task name (e.g., "scheduled_query_executions")
/// * `action` - What happened to the rows ("timed_out", "deleted")
/// * `count` - The number of rows affected
pub fn record_maintenance_rows(task: &str, action: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "maintenance_rows_total",
            "task" => task.to_string(),
            "action" => action.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (task, action, count);
    }
}

/// Record a failed maintenance cycle.
pub fn record_maintenance_error(task: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "maintenance_errors_total",
            "task" => task.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = task;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),
}
