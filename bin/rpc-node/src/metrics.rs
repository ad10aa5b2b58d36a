use std::sync::LazyLock;

use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder, register_histogram,
    register_int_counter, register_int_counter_vec, register_int_gauge,
};

// SAFETY: The `unwrap` calls here are safe because:
// 1. The metrics being registered (gauges, counters, histograms) use hardcoded names and
//    descriptions, which are guaranteed not to conflict within the application.
// 2. Registration errors occur only if there is a naming conflict, which is not possible in this
//    context due to controlled metric definitions.
// 3. Any changes to metric names or types should be carefully reviewed to avoid conflicts.

// WORK QUEUE METRICS
// ================================================================================================

pub static QUEUE_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("rpc_work_queue_depth", "Number of work items currently queued").unwrap()
});
pub static QUEUE_REJECTED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "rpc_work_queue_rejected_total",
        "Number of requests rejected because the work queue was at capacity"
    )
    .unwrap()
});

// WORKER METRICS
// ================================================================================================

pub static WORKER_COUNT: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("rpc_worker_count", "Number of work-queue worker threads currently attending")
        .unwrap()
});

// REQUEST METRICS
// ================================================================================================

pub static REQUEST_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "rpc_request_total",
        "Number of requests handled, labeled by response status class",
        &["status_class"]
    )
    .unwrap()
});
pub static REQUEST_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "rpc_request_latency_seconds",
        "Time from accept to reply being posted",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .unwrap()
});
pub static ACL_REJECTED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("rpc_acl_rejected_total", "Number of requests rejected by the ACL").unwrap()
});

// SCHEDULER METRICS
// ================================================================================================

pub static SCHEDULER_QUEUE_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("rpc_scheduler_queue_depth", "Number of tasks currently scheduled").unwrap()
});
pub static SCHEDULER_TASK_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("rpc_scheduler_task_total", "Number of scheduler tasks executed").unwrap()
});

/// Renders the current registry in Prometheus text-exposition format. Registered in the
/// path-handler registry at `/metrics` rather than served through a side channel, since the
/// registry already knows how to route arbitrary GETs to arbitrary handlers.
pub fn render() -> Vec<u8> {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&metric_families, &mut buffer).expect("encoding cannot fail for gathered metrics");
    buffer
}
