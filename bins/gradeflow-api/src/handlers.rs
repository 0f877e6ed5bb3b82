// HTTP route handlers for the Gradeflow API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use gradeflow_common::error::ExecutionError;
use gradeflow_common::types::{ExecutionStatus, Language};
use gradeflow_pipeline::client::CodeExecutor;
use gradeflow_pipeline::scorer;
use gradeflow_pipeline::store::SubmissionStore;

use crate::{metrics, AppState};

#[derive(Debug, Deserialize)]
pub struct RunCodeRequest {
    pub source_code: String,
    pub language: String,
    #[serde(default)]
    pub stdin: String,
}

#[derive(Debug, Serialize)]
pub struct RunCodeResponse {
    pub success: bool,
    pub status: ExecutionStatus,
    pub status_id: u32,
    pub message: String,
    pub stdout: String,
    pub stderr: String,
    pub compile_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub execution_time_ms: u64,
    pub memory_kb: u64,
    pub language: String,
}

#[derive(Debug, Serialize)]
pub struct ProcessSubmissionsResponse {
    pub job_id: String,
    pub message: String,
    pub total_submissions: usize,
}

/// POST /submissions/execute - run code synchronously for immediate feedback
///
/// This endpoint never persists a submission; it exists for the student
/// pressing "run" during an exam.
pub async fn execute_code(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RunCodeRequest>,
) -> impl IntoResponse {
    if payload.source_code.trim().is_empty() {
        metrics::record_run_rejected("empty_source");
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Source code cannot be empty" })),
        )
            .into_response();
    }

    if payload.language.trim().is_empty() {
        metrics::record_run_rejected("missing_language");
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Language must be specified" })),
        )
            .into_response();
    }

    if Language::from_str(&payload.language).is_none() {
        metrics::record_run_rejected("unsupported_language");
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": format!("Unsupported language: {}", payload.language)
            })),
        )
            .into_response();
    }

    match state
        .executor
        .execute(&payload.source_code, &payload.language, &payload.stdin)
        .await
    {
        Ok(report) => {
            let status = scorer::score_single(&report);
            info!(
                language = %payload.language,
                status = %status,
                execution_ms = report.execution_time_ms,
                "Interactive run finished"
            );
            metrics::record_run_executed(&payload.language, status.as_str(), report.execution_time_ms as f64);

            (
                StatusCode::OK,
                Json(RunCodeResponse {
                    success: true,
                    status,
                    status_id: report.status_id,
                    message: user_message(report.status_id, &report.status_description),
                    stdout: report.stdout,
                    stderr: report.stderr,
                    compile_output: report.compile_output,
                    exit_code: report.exit_code,
                    execution_time_ms: report.execution_time_ms,
                    memory_kb: report.memory_kb,
                    language: payload.language,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(language = %payload.language, error = %e, "Interactive run failed");
            let status = match &e {
                ExecutionError::UnsupportedLanguage(_) => StatusCode::BAD_REQUEST,
                ExecutionError::ServiceUnavailable(_) | ExecutionError::ExecutionTimeout { .. } => {
                    StatusCode::BAD_GATEWAY
                }
                ExecutionError::MalformedResponse(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// POST /exams/{exam_id}/process-submissions - start batch grading
///
/// Returns immediately with a job id; progress is polled separately.
/// An exam with nothing pending still yields a job, already completed.
pub async fn process_submissions(
    State(state): State<Arc<AppState>>,
    Path(exam_id): Path<String>,
) -> impl IntoResponse {
    let exam_id = match Uuid::parse_str(&exam_id) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "Invalid exam ID format" })),
            )
                .into_response();
        }
    };

    let submissions = match state.store.pending_submissions(exam_id).await {
        Ok(submissions) => submissions,
        Err(e) => {
            error!(exam_id = %exam_id, error = %e, "Failed to fetch pending submissions");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": format!("Failed to fetch submissions: {}", e)
                })),
            )
                .into_response();
        }
    };

    let total = submissions.len();
    let job_id = state.runner.submit_batch(exam_id, submissions);
    metrics::record_batch_started(total);

    info!(exam_id = %exam_id, job_id = %job_id, total, "Batch grading accepted");

    (
        StatusCode::ACCEPTED,
        Json(ProcessSubmissionsResponse {
            job_id: job_id.to_string(),
            message: format!("Started processing {} submissions", total),
            total_submissions: total,
        }),
    )
        .into_response()
}

/// GET /processing-jobs/{job_id}/status - current batch job snapshot
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let job_id = match Uuid::parse_str(&job_id) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "Invalid job ID format" })),
            )
                .into_response();
        }
    };

    match state.registry.snapshot(&job_id) {
        Some(job) => (StatusCode::OK, Json(job)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "detail": "Job not found" })),
        )
            .into_response(),
    }
}

/// POST /processing-jobs/{job_id}/cancel - advisory cancellation
///
/// In-flight executions finish; not-yet-started submissions are skipped
/// and the job ends up failed with a partial count.
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let job_id = match Uuid::parse_str(&job_id) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "Invalid job ID format" })),
            )
                .into_response();
        }
    };

    if state.registry.cancel(&job_id) {
        warn!(job_id = %job_id, "Batch job cancellation requested");
        metrics::record_batch_cancelled();
        (
            StatusCode::OK,
            Json(serde_json::json!({ "message": "Cancellation requested" })),
        )
            .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "detail": "Job not found" })),
        )
            .into_response()
    }
}

/// DELETE /processing-jobs/{job_id} - explicit cleanup
///
/// The only way job memory is reclaimed; callers delete a job once they
/// are done observing it.
pub async fn cleanup_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let job_id = match Uuid::parse_str(&job_id) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "Invalid job ID format" })),
            )
                .into_response();
        }
    };

    if state.registry.delete(&job_id) {
        (
            StatusCode::OK,
            Json(serde_json::json!({ "message": "Job cleaned up successfully" })),
        )
            .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "detail": "Job not found" })),
        )
            .into_response()
    }
}

/// GET /health - health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus text format
pub async fn metrics_text() -> impl IntoResponse {
    (StatusCode::OK, metrics::render_metrics())
}

/// Convert an execution service status code to a user-friendly message
fn user_message(status_id: u32, status_description: &str) -> String {
    match status_id {
        1 => "Code is waiting in the queue...".to_string(),
        2 => "Code is running...".to_string(),
        3 => "Code executed successfully!".to_string(),
        4 => "Wrong Answer - Code ran but output doesn't match expected result".to_string(),
        5 => "Time Limit Exceeded - Code took too long to execute".to_string(),
        6 => "Compilation Error - There are syntax or compilation errors in your code".to_string(),
        7 => "Runtime Error (SIGSEGV) - Code crashed during execution".to_string(),
        8 => "Runtime Error (SIGXFSZ) - Code tried to create a file that's too large".to_string(),
        9 => "Runtime Error (SIGFPE) - Code has a division by zero or floating point error".to_string(),
        10 => "Runtime Error (SIGABRT) - Code was aborted during execution".to_string(),
        11 => "Runtime Error (NZEC) - Code exited with non-zero status".to_string(),
        12 => "Runtime Error - Code crashed during execution".to_string(),
        13 => "Internal Error - Server error occurred while running your code".to_string(),
        14 => "Exec Format Error - There was an issue with the executable format".to_string(),
        _ => format!("Status: {}", status_description),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_user_messages_are_distinct() {
        let messages: HashSet<String> = (1..=14).map(|id| user_message(id, "")).collect();
        assert_eq!(messages.len(), 14);
    }

    #[test]
    fn test_user_message_known_codes() {
        assert!(user_message(3, "Accepted").contains("successfully"));
        assert!(user_message(4, "Wrong Answer").contains("Wrong Answer"));
        assert!(user_message(5, "TLE").contains("Time Limit"));
        assert!(user_message(6, "CE").contains("Compilation Error"));
        assert!(user_message(13, "IE").contains("Internal Error"));
    }

    #[test]
    fn test_user_message_unknown_falls_back_to_description() {
        assert_eq!(user_message(42, "Mystery"), "Status: Mystery");
    }

    #[test]
    fn test_run_request_stdin_defaults_empty() {
        let request: RunCodeRequest = serde_json::from_str(
            r#"{"source_code": "print(2+2)", "language": "python"}"#,
        )
        .unwrap();
        assert_eq!(request.stdin, "");
        assert_eq!(request.language, "python");
    }
}
