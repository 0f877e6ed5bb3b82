// Route definitions for the Gradeflow API

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::{handlers, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_text))
        .route("/submissions/execute", post(handlers::execute_code))
        .route(
            "/exams/:exam_id/process-submissions",
            post(handlers::process_submissions),
        )
        .route(
            "/processing-jobs/:job_id/status",
            get(handlers::job_status),
        )
        .route(
            "/processing-jobs/:job_id/cancel",
            post(handlers::cancel_job),
        )
        .route("/processing-jobs/:job_id", delete(handlers::cleanup_job))
}
