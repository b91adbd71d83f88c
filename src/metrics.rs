//! Prometheus metrics registration and export.
//!
//! Metrics are optional: call `init_metrics` once at startup to enable them.
//! The recording helpers used by the queue and workers are no-ops until then,
//! so library embedders who bring their own telemetry pay nothing.

use prometheus::{CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all furrow metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total tasks enqueued, labeled by task type.
pub static TASKS_ENQUEUED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total tasks reaching a terminal outcome, labeled by type and status.
pub static TASKS_PROCESSED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Pending tasks per priority level.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Tasks currently dispatched to handlers across all workers.
pub static TASKS_IN_FLIGHT: OnceLock<Gauge> = OnceLock::new();

/// Number of running workers.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at application startup, before starting workers.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due
/// to duplicate metric names.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let tasks_enqueued = CounterVec::new(
        Opts::new("furrow_tasks_enqueued_total", "Total tasks enqueued"),
        &["task_type"],
    )?;

    let tasks_processed = CounterVec::new(
        Opts::new(
            "furrow_tasks_processed_total",
            "Total tasks reaching a terminal outcome",
        ),
        &["task_type", "status"],
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("furrow_queue_depth", "Pending tasks per priority level"),
        &["priority"],
    )?;

    let tasks_in_flight = Gauge::new(
        "furrow_tasks_in_flight",
        "Tasks currently dispatched to handlers",
    )?;

    let active_workers = Gauge::new("furrow_active_workers", "Number of running workers")?;

    registry.register(Box::new(tasks_enqueued.clone()))?;
    registry.register(Box::new(tasks_processed.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(tasks_in_flight.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    let _ = TASKS_ENQUEUED_TOTAL.set(tasks_enqueued);
    let _ = TASKS_PROCESSED_TOTAL.set(tasks_processed);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = TASKS_IN_FLIGHT.set(tasks_in_flight);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = REGISTRY.set(registry);

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an empty string if `init_metrics` was never called.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return String::new();
    };

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&registry.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Records an enqueued task.
pub(crate) fn record_enqueued(task_type: &str) {
    if let Some(counter) = TASKS_ENQUEUED_TOTAL.get() {
        counter.with_label_values(&[task_type]).inc();
    }
}

/// Records a terminal task outcome (`completed`, `failed`, `timeout`).
pub(crate) fn record_processed(task_type: &str, status: &str) {
    if let Some(counter) = TASKS_PROCESSED_TOTAL.get() {
        counter.with_label_values(&[task_type, status]).inc();
    }
}

/// Updates the pending-depth gauge for one priority level.
pub(crate) fn record_queue_depth(priority: u8, depth: u64) {
    if let Some(gauge) = QUEUE_DEPTH.get() {
        gauge
            .with_label_values(&[&priority.to_string()])
            .set(depth as f64);
    }
}

/// Adjusts the in-flight dispatch gauge.
pub(crate) fn record_in_flight(delta: i64) {
    if let Some(gauge) = TASKS_IN_FLIGHT.get() {
        gauge.add(delta as f64);
    }
}

/// Adjusts the active-worker gauge.
pub(crate) fn record_active_workers(delta: i64) {
    if let Some(gauge) = ACTIVE_WORKERS.get() {
        gauge.add(delta as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_init_is_a_noop() {
        // Must not panic when metrics were never initialized.
        record_enqueued("a");
        record_processed("a", "completed");
        record_queue_depth(5, 3);
        record_in_flight(1);
        record_active_workers(1);
    }

    #[test]
    fn test_init_and_export() {
        // init twice is tolerated; only the first registration wins.
        let _ = init_metrics();
        let _ = init_metrics();

        record_enqueued("irrigation_plan");
        record_processed("irrigation_plan", "completed");

        let text = export_metrics();
        assert!(text.contains("furrow_tasks_enqueued_total"));
        assert!(text.contains("furrow_tasks_processed_total"));
    }
}
