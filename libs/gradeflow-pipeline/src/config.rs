// Pipeline configuration
// Execution limits are sent with every run; they are configuration,
// not negotiated per call.

use std::time::Duration;

/// Resource limits forwarded to the execution service with each run
#[derive(Debug, Clone, Copy)]
pub struct ExecutionLimits {
    pub cpu_time_limit_s: u32,
    pub memory_limit_kb: u32,
    pub max_processes_and_or_threads: u32,
    pub max_file_size_kb: u32,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            cpu_time_limit_s: 5,
            memory_limit_kb: 128_000,
            max_processes_and_or_threads: 60,
            max_file_size_kb: 1024,
        }
    }
}

/// Settings for the grading pipeline, read from the environment with
/// sensible defaults so a bare process still boots against a local
/// execution service.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Base URL of the execution service
    pub execution_service_url: String,
    pub limits: ExecutionLimits,
    /// Size of the batch runner's worker pool
    pub worker_count: usize,
    /// Fixed interval between result polls (floor of 1s)
    pub poll_interval: Duration,
    /// Hard deadline for a single polled execution
    pub item_deadline: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            execution_service_url: "http://127.0.0.1:2358".to_string(),
            limits: ExecutionLimits::default(),
            worker_count: 4,
            poll_interval: Duration::from_secs(1),
            item_deadline: Duration::from_secs(60),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let execution_service_url = std::env::var("JUDGE0_URL")
            .unwrap_or(defaults.execution_service_url);

        let worker_count = std::env::var("GRADEFLOW_WORKER_COUNT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.worker_count);

        let poll_interval = std::env::var("GRADEFLOW_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval)
            // Polling faster than once a second hammers the service
            .max(Duration::from_secs(1));

        let item_deadline = std::env::var("GRADEFLOW_ITEM_DEADLINE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.item_deadline);

        Self {
            execution_service_url,
            limits: ExecutionLimits::default(),
            worker_count,
            poll_interval,
            item_deadline,
        }
    }
}
