// Prometheus metrics for the Gradeflow API

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder,
};

lazy_static! {
    // Global registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Interactive runs executed (counter with language and status labels)
    pub static ref RUNS_EXECUTED: CounterVec = CounterVec::new(
        Opts::new("gradeflow_runs_executed_total", "Total number of interactive runs executed"),
        &["language", "status"]
    )
    .expect("metric can be created");

    // Interactive runs rejected before reaching the execution service
    pub static ref RUNS_REJECTED: CounterVec = CounterVec::new(
        Opts::new("gradeflow_runs_rejected_total", "Total runs rejected due to validation"),
        &["reason"]
    )
    .expect("metric can be created");

    // Batch grading jobs started
    pub static ref BATCH_JOBS_STARTED: IntCounter = IntCounter::new(
        "gradeflow_batch_jobs_started_total",
        "Total number of batch grading jobs started"
    )
    .expect("metric can be created");

    // Submissions enqueued into batch jobs
    pub static ref BATCH_SUBMISSIONS_ENQUEUED: IntCounter = IntCounter::new(
        "gradeflow_batch_submissions_enqueued_total",
        "Total number of submissions handed to batch jobs"
    )
    .expect("metric can be created");

    // Batch jobs cancelled
    pub static ref BATCH_JOBS_CANCELLED: IntCounter = IntCounter::new(
        "gradeflow_batch_jobs_cancelled_total",
        "Total number of batch grading jobs cancelled"
    )
    .expect("metric can be created");

    // Interactive run execution time histogram (in milliseconds)
    pub static ref RUN_EXECUTION_TIME: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "gradeflow_run_execution_time_ms",
            "Interactive run execution time in milliseconds"
        )
        .buckets(vec![50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]),
        &["language"]
    )
    .expect("metric can be created");
}

/// Initialize metrics registry
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(RUNS_EXECUTED.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(RUNS_REJECTED.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(BATCH_JOBS_STARTED.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(BATCH_SUBMISSIONS_ENQUEUED.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(BATCH_JOBS_CANCELLED.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(RUN_EXECUTION_TIME.clone()))
        .expect("collector can be registered");
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record a finished interactive run
pub fn record_run_executed(language: &str, status: &str, execution_time_ms: f64) {
    RUNS_EXECUTED.with_label_values(&[language, status]).inc();
    RUN_EXECUTION_TIME
        .with_label_values(&[language])
        .observe(execution_time_ms);
}

/// Record an interactive run rejected by validation
pub fn record_run_rejected(reason: &str) {
    RUNS_REJECTED.with_label_values(&[reason]).inc();
}

/// Record a batch grading job being accepted
pub fn record_batch_started(total_submissions: usize) {
    BATCH_JOBS_STARTED.inc();
    BATCH_SUBMISSIONS_ENQUEUED.inc_by(total_submissions as u64);
}

/// Record a batch grading job being cancelled
pub fn record_batch_cancelled() {
    BATCH_JOBS_CANCELLED.inc();
}
