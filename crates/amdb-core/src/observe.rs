//! Optional metrics instrumentation.
//!
//! With the `observe` feature enabled, the worker pool and environment emit
//! counters, histograms and gauges through the [`metrics`] crate. A downstream
//! application installs a recorder (e.g. `metrics-exporter-prometheus`) to
//! collect them.
//!
//! Without the feature every function here is a no-op.

use crate::types::TxnMode;

/// Record a finished unit of work.
///
/// - `amdb.unit_of_work.total` – counter with `mode` and `outcome` labels
/// - `amdb.unit_of_work.duration_seconds` – histogram with `mode` label
#[inline]
pub fn record_unit_of_work(mode: TxnMode, duration: std::time::Duration, success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("amdb.unit_of_work.total", "mode" => mode.as_str(), "outcome" => outcome)
            .increment(1);
        metrics::histogram!("amdb.unit_of_work.duration_seconds", "mode" => mode.as_str())
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (mode, duration, success);
    }
}

/// Set the number of queued, not yet started tasks.
///
/// - `amdb.pool.queue_depth` – gauge
#[inline]
pub fn set_queue_depth(depth: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::gauge!("amdb.pool.queue_depth").set(depth as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = depth;
    }
}

/// Record a task withdrawn by its caller before a worker picked it up.
///
/// - `amdb.pool.withdrawn_total` – counter
#[inline]
pub fn record_withdrawn() {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("amdb.pool.withdrawn_total").increment(1);
    }
}

/// Record an environment maintenance operation (copy, sync, resize).
///
/// - `amdb.maintenance.total` – counter with `op` and `outcome` labels
#[inline]
pub fn record_maintenance(op: &'static str, success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("amdb.maintenance.total", "op" => op, "outcome" => outcome).increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (op, success);
    }
}
