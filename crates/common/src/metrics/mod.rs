//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all DeskWise metrics
pub const METRICS_PREFIX: &str = "deskwise";

/// SLO-aligned histogram buckets for stage latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, // 1ms
    0.005, // 5ms
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of answer requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end answer latency in seconds"
    );

    describe_counter!(
        format!("{}_idempotency_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Requests short-circuited by the idempotency cache"
    );

    // Stage metrics
    describe_counter!(
        format!("{}_stage_executions_total", METRICS_PREFIX),
        Unit::Count,
        "Stage executions by stage and status"
    );

    describe_histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Per-stage latency in seconds"
    );

    describe_counter!(
        format!("{}_stage_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Stage retries on retryable upstream errors"
    );

    // Retrieval metrics
    describe_counter!(
        format!("{}_retrievals_total", METRICS_PREFIX),
        Unit::Count,
        "Total retrieval passes"
    );

    describe_gauge!(
        format!("{}_retrieval_results_count", METRICS_PREFIX),
        Unit::Count,
        "Citations returned from a retrieval pass"
    );

    // Tool metrics
    describe_counter!(
        format!("{}_tool_calls_total", METRICS_PREFIX),
        Unit::Count,
        "Tool calls by tool and status"
    );

    describe_histogram!(
        format!("{}_tool_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Tool call latency in seconds"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record end-to-end request metrics
pub struct RequestMetrics {
    start: Instant,
    domain: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(domain: &str) -> Self {
        Self {
            start: Instant::now(),
            domain: domain.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: &str) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "domain" => self.domain.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "domain" => self.domain
        )
        .record(duration);
    }
}

/// Helper to record a finished request without the RAII wrapper
pub fn record_request(domain: &str, status: &str, duration_secs: f64) {
    counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        "domain" => domain.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        "domain" => domain.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a stage execution
pub fn record_stage(stage: &str, duration_secs: f64, status: &str) {
    counter!(
        format!("{}_stage_executions_total", METRICS_PREFIX),
        "stage" => stage.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a stage retry
pub fn record_stage_retry(stage: &str) {
    counter!(
        format!("{}_stage_retries_total", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .increment(1);
}

/// Helper to record a retrieval pass
pub fn record_retrieval(domain: &str, result_count: usize) {
    counter!(
        format!("{}_retrievals_total", METRICS_PREFIX),
        "domain" => domain.to_string()
    )
    .increment(1);

    gauge!(
        format!("{}_retrieval_results_count", METRICS_PREFIX),
        "domain" => domain.to_string()
    )
    .set(result_count as f64);
}

/// Helper to record a tool call
pub fn record_tool(tool: &str, duration_secs: f64, status: &str) {
    counter!(
        format!("{}_tool_calls_total", METRICS_PREFIX),
        "tool" => tool.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_tool_duration_seconds", METRICS_PREFIX),
        "tool" => tool.to_string()
    )
    .record(duration_secs);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

/// Helper to record an idempotency cache hit
pub fn record_idempotency_hit() {
    counter!(format!("{}_idempotency_hits_total", METRICS_PREFIX)).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_request_metrics() {
        let metrics = RequestMetrics::start("hr");
        std::thread::sleep(std::time::Duration::from_millis(5));
        metrics.finish("ok");
        // Just verify it runs without panic
    }
}
