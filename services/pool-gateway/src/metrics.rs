//! Prometheus metrics exposition
//!
//! The pool and dispatcher emit through the `metrics` facade; this module
//! installs the Prometheus recorder that renders them on `/metrics`:
//!
//! - `pool_jobs_total` (counter): label `outcome`
//! - `pool_job_duration_seconds` (histogram)
//! - `pool_suspensions_total` (counter)
//! - `pool_resources` (gauge): label `status`
//! - `gateway_batches_total` (counter): label `result`
//! - `gateway_batch_size` (histogram)

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Bucket boundaries for per-job latency, 5ms to 60s.
const JOB_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Bucket boundaries for batch sizes.
const BATCH_SIZE_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("pool_job_duration_seconds".to_string()),
            JOB_DURATION_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full("gateway_batch_size".to_string()),
            BATCH_SIZE_BUCKETS,
        )
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Histograms get explicit buckets so they render `_bucket` lines rather
/// than summaries.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a finished batch: how many targets and whether it ran.
pub fn record_batch(result: &str, targets: usize) {
    metrics::counter!("gateway_batches_total", "result" => result.to_string()).increment(1);
    if result == "dispatched" {
        metrics::histogram!("gateway_batch_size").record(targets as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_batch("dispatched", 3);
        record_batch("no_resource", 3);
    }

    /// Isolated recorder/handle pair; only one global recorder may exist per process.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_batch_increments_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_batch("dispatched", 12);
        record_batch("rejected", 0);

        let output = handle.render();
        assert!(output.contains("gateway_batches_total"));
        assert!(output.contains("result=\"dispatched\""));
        assert!(output.contains("result=\"rejected\""));
        assert!(
            output.contains("gateway_batch_size_bucket"),
            "batch size must render as a histogram"
        );
    }

    #[test]
    fn job_duration_histogram_uses_configured_buckets() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        metrics::histogram!("pool_job_duration_seconds").record(0.003);

        let output = handle.render();
        assert!(output.contains("pool_job_duration_seconds_bucket"));
        assert!(output.contains("le=\"0.005\""), "5ms bucket must exist");
        assert!(output.contains("le=\"60\""), "60s bucket must exist");
        assert!(output.contains("le=\"+Inf\""));
    }
}
