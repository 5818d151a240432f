use anyhow::Result;
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all index sync metrics
const PREFIX: &str = "index_sync";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Capture side
    pub static ref PROPAGATION_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_propagation_requests_total"),
            "Propagation requests handed to the job queue"
        ),
        &["kind", "dispatch"]
    ).expect("Failed to create propagation_requests_total metric");

    pub static ref COMMIT_CALLBACKS_DISCARDED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_commit_callbacks_discarded_total"),
        "Commit callbacks dropped because their transaction rolled back"
    ).expect("Failed to create commit_callbacks_discarded_total metric");

    pub static ref COMMIT_DISPATCH_FAILURES_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_commit_dispatch_failures_total"),
        "Deferred propagation requests that could not be enqueued after commit"
    ).expect("Failed to create commit_dispatch_failures_total metric");

    // Job side
    pub static ref JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_job_executions_total"), "Job executions by outcome"),
        &["job", "status"]
    ).expect("Failed to create job_executions_total metric");

    pub static ref JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_job_duration_seconds"),
            "Job execution duration in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["job"]
    ).expect("Failed to create job_duration_seconds metric");

    pub static ref JOB_RETRIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_job_retries_total"), "Job attempts scheduled for retry"),
        &["job"]
    ).expect("Failed to create job_retries_total metric");

    pub static ref JOBS_PENDING: Gauge = Gauge::new(
        format!("{PREFIX}_jobs_pending"),
        "Jobs enqueued and not yet finished"
    ).expect("Failed to create jobs_pending metric");
}

/// Register all metrics with the registry. Safe to call more than once.
pub fn init_metrics() {
    let _ = REGISTRY.register(Box::new(PROPAGATION_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(COMMIT_CALLBACKS_DISCARDED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(COMMIT_DISPATCH_FAILURES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(JOB_RETRIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_PENDING.clone()));
}

/// Render registered metrics in the Prometheus text format.
pub fn encode_metrics() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// `dispatch` is "deferred" or "eager".
pub fn record_propagation_request(kind: &str, dispatch: &str) {
    PROPAGATION_REQUESTS_TOTAL
        .with_label_values(&[kind, dispatch])
        .inc();
}

pub fn record_discarded_commit_callbacks(count: usize) {
    if count > 0 {
        COMMIT_CALLBACKS_DISCARDED_TOTAL.inc_by(count as f64);
    }
}

pub fn record_commit_dispatch_failure() {
    COMMIT_DISPATCH_FAILURES_TOTAL.inc();
}

pub fn record_job_execution(job: &str, status: &str, duration: Duration) {
    JOB_EXECUTIONS_TOTAL.with_label_values(&[job, status]).inc();
    JOB_DURATION_SECONDS
        .with_label_values(&[job])
        .observe(duration.as_secs_f64());
}

pub fn record_job_retry(job: &str) {
    JOB_RETRIES_TOTAL.with_label_values(&[job]).inc();
}

pub fn set_jobs_pending(count: usize) {
    JOBS_PENDING.set(count as f64);
}
