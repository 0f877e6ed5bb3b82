// Execution Client - Adapter for the Remote Execution Service
//
// The client knows HOW a run reaches the sandbox (submit/poll protocol,
// runtime id mapping, resource limits). It does NOT know scoring rules
// and it does NOT evaluate correctness; raw outputs go to the scorer.
//
// Two call modes:
// - synchronous: submit with wait=true, the service computes and answers
//   in one round trip (interactive "try my code")
// - polling: submit, get a token back, poll on a fixed interval until the
//   run leaves the queued/processing states or the caller's deadline
//   expires. On deadline the remote run is abandoned, not cancelled.
//
// No local state is retained between calls and nothing is retried here.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use gradeflow_common::error::ExecutionError;
use gradeflow_common::types::Language;

use crate::config::ExecutionLimits;

/// Status ids the service reports while a run has not finished yet
const STATUS_IN_QUEUE: u32 = 1;
const STATUS_PROCESSING: u32 = 2;

/// Cap on a single HTTP round trip. The wait=true call computes the run
/// inside this window; polls answer far quicker. Every external call
/// carries a hard deadline, there is no unbounded wait anywhere.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw result of one run as the execution service reported it
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub token: Option<String>,
    pub status_id: u32,
    pub status_description: String,
    pub stdout: String,
    pub stderr: String,
    pub compile_output: String,
    pub exit_code: Option<i32>,
    pub execution_time_ms: u64,
    pub memory_kb: u64,
}

/// Seam between the pipeline and the sandbox.
/// The batch runner only sees this trait, so tests can substitute
/// a fake without any HTTP involved.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Submit-and-wait: one round trip, used for interactive runs.
    async fn execute(
        &self,
        source_code: &str,
        language: &str,
        stdin: &str,
    ) -> Result<ExecutionReport, ExecutionError>;

    /// Submit then poll until the run finishes or `deadline` elapses.
    async fn execute_polling(
        &self,
        source_code: &str,
        language: &str,
        stdin: &str,
        deadline: Duration,
    ) -> Result<ExecutionReport, ExecutionError>;
}

#[derive(Debug, Serialize)]
struct SubmitPayload<'a> {
    source_code: &'a str,
    language_id: u32,
    stdin: &'a str,
    cpu_time_limit: u32,
    memory_limit: u32,
    max_processes_and_or_threads: u32,
    enable_per_process_and_thread_time_limit: bool,
    enable_per_process_and_thread_memory_limit: bool,
    max_file_size: u32,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    id: u32,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultBody {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    status: Option<StatusBody>,
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
    #[serde(default)]
    compile_output: Option<String>,
    #[serde(default)]
    exit_code: Option<i32>,
    // The service reports wall time as a decimal-second string ("0.002"),
    // occasionally as a bare number, and null for unfinished runs
    #[serde(default)]
    time: Option<serde_json::Value>,
    #[serde(default)]
    memory: Option<u64>,
}

impl ResultBody {
    fn into_report(self) -> Result<ExecutionReport, ExecutionError> {
        let status = self.status.ok_or_else(|| {
            ExecutionError::MalformedResponse("result is missing the status object".to_string())
        })?;

        Ok(ExecutionReport {
            token: self.token,
            status_id: status.id,
            status_description: status.description.unwrap_or_default(),
            stdout: self.stdout.unwrap_or_default(),
            stderr: self.stderr.unwrap_or_default(),
            compile_output: self.compile_output.unwrap_or_default(),
            exit_code: self.exit_code,
            execution_time_ms: parse_time_ms(self.time.as_ref()),
            memory_kb: self.memory.unwrap_or(0),
        })
    }
}

/// Convert the service's time field (decimal seconds) to milliseconds
fn parse_time_ms(time: Option<&serde_json::Value>) -> u64 {
    let seconds = match time {
        Some(serde_json::Value::String(s)) => s.parse::<f64>().unwrap_or(0.0),
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    };
    (seconds * 1000.0).round() as u64
}

/// Stateless adapter that submits one source-code run to the external
/// execution service and retrieves its result.
#[derive(Clone)]
pub struct ExecutionClient {
    http: reqwest::Client,
    base_url: String,
    limits: ExecutionLimits,
    poll_interval: Duration,
}

impl ExecutionClient {
    pub fn new(base_url: impl Into<String>, limits: ExecutionLimits, poll_interval: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limits,
            // Anything faster than once a second hammers the service
            poll_interval: poll_interval.max(Duration::from_secs(1)),
        }
    }

    fn payload<'a>(&self, source_code: &'a str, language: Language, stdin: &'a str) -> SubmitPayload<'a> {
        SubmitPayload {
            source_code,
            language_id: language.runtime_id(),
            stdin,
            cpu_time_limit: self.limits.cpu_time_limit_s,
            memory_limit: self.limits.memory_limit_kb,
            max_processes_and_or_threads: self.limits.max_processes_and_or_threads,
            enable_per_process_and_thread_time_limit: true,
            enable_per_process_and_thread_memory_limit: true,
            max_file_size: self.limits.max_file_size_kb,
        }
    }

    fn parse_language(language: &str) -> Result<Language, ExecutionError> {
        Language::from_str(language)
            .ok_or_else(|| ExecutionError::UnsupportedLanguage(language.to_string()))
    }

    async fn submit(
        &self,
        payload: &SubmitPayload<'_>,
        wait: bool,
    ) -> Result<ResultBody, ExecutionError> {
        let url = format!("{}/submissions", self.base_url);
        let mut request = self.http.post(&url).json(payload);
        if wait {
            request = request.query(&[("wait", "true")]);
        }

        let response = request.send().await.map_err(connection_error)?;
        decode_response(response).await
    }

    async fn fetch_result(&self, token: &str) -> Result<ResultBody, ExecutionError> {
        let url = format!("{}/submissions/{}", self.base_url, token);
        let response = self.http.get(&url).send().await.map_err(connection_error)?;
        decode_response(response).await
    }
}

fn connection_error(err: reqwest::Error) -> ExecutionError {
    if err.is_timeout() {
        return ExecutionError::ExecutionTimeout {
            waited_ms: HTTP_TIMEOUT.as_millis() as u64,
        };
    }
    ExecutionError::ServiceUnavailable(err.to_string())
}

async fn decode_response(response: reqwest::Response) -> Result<ResultBody, ExecutionError> {
    let status = response.status();
    if status.is_server_error() {
        return Err(ExecutionError::ServiceUnavailable(format!(
            "execution service answered {}",
            status
        )));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ExecutionError::MalformedResponse(format!(
            "execution service rejected the request ({}): {}",
            status, body
        )));
    }

    response
        .json::<ResultBody>()
        .await
        .map_err(|e| ExecutionError::MalformedResponse(e.to_string()))
}

#[async_trait]
impl CodeExecutor for ExecutionClient {
    async fn execute(
        &self,
        source_code: &str,
        language: &str,
        stdin: &str,
    ) -> Result<ExecutionReport, ExecutionError> {
        let language = Self::parse_language(language)?;
        let payload = self.payload(source_code, language, stdin);

        debug!(language = %language, "submitting synchronous run");
        let body = self.submit(&payload, true).await?;
        body.into_report()
    }

    async fn execute_polling(
        &self,
        source_code: &str,
        language: &str,
        stdin: &str,
        deadline: Duration,
    ) -> Result<ExecutionReport, ExecutionError> {
        let language = Self::parse_language(language)?;
        let payload = self.payload(source_code, language, stdin);

        let submitted = self.submit(&payload, false).await?;
        let token = submitted.token.ok_or_else(|| {
            ExecutionError::MalformedResponse("submission response carried no token".to_string())
        })?;

        debug!(token = %token, language = %language, "submitted, polling for result");

        let started = tokio::time::Instant::now();
        loop {
            if started.elapsed() >= deadline {
                // The remote run keeps going; we just stop waiting for it
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(token = %token, waited_ms, "abandoning run past deadline");
                return Err(ExecutionError::ExecutionTimeout { waited_ms });
            }

            tokio::time::sleep(self.poll_interval).await;

            let body = self.fetch_result(&token).await?;
            let still_running = matches!(
                body.status.as_ref().map(|s| s.id),
                Some(STATUS_IN_QUEUE) | Some(STATUS_PROCESSING)
            );
            if !still_running {
                let mut report = body.into_report()?;
                if report.token.is_none() {
                    report.token = Some(token);
                }
                return Ok(report);
            }
        }
    }
}
