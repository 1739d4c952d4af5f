// src/metrics.rs
//! Metric names used across the crate. Recording goes through the `metrics`
//! facade; without an installed recorder every call is a no-op, so embedding
//! applications decide where (and whether) the numbers go.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("fetch_tasks_total", "Acquisition tasks executed.");
        describe_counter!("fetch_cache_hits_total", "Tasks served from the cache.");
        describe_counter!(
            "fetch_provider_attempts_total",
            "Provider calls issued, including retries."
        );
        describe_counter!(
            "fetch_task_failures_total",
            "Tasks that ended in a classified failure."
        );
        describe_counter!("fetch_cancelled_total", "Fetch rounds cut short by cancellation.");
        describe_counter!("cache_evictions_total", "Cache entries removed by TTL or size budget.");
        describe_counter!(
            "sanitize_lines_dropped_total",
            "Lines removed by the directive filter."
        );
        describe_histogram!("fetch_task_ms", "Per-task execution time in milliseconds.");
        describe_counter!("research_runs_total", "Pipeline runs by final status.");
        describe_gauge!("research_last_run_ts", "Unix ts when a pipeline run last finished.");
    });
}
