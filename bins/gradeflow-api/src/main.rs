mod handlers;
mod metrics;
mod routes;

use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use gradeflow_pipeline::client::{CodeExecutor, ExecutionClient};
use gradeflow_pipeline::config::PipelineConfig;
use gradeflow_pipeline::registry::JobRegistry;
use gradeflow_pipeline::runner::BatchRunner;
use gradeflow_pipeline::store::{InMemoryStore, SubmissionStore};

pub struct AppState {
    pub executor: Arc<dyn CodeExecutor>,
    pub store: Arc<dyn SubmissionStore>,
    pub registry: Arc<JobRegistry>,
    pub runner: BatchRunner,
}

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_target(false)
        .init();

    info!("Gradeflow API booting...");

    let config = PipelineConfig::from_env();
    info!(
        execution_service = %config.execution_service_url,
        workers = config.worker_count,
        "Pipeline configured"
    );

    let executor: Arc<dyn CodeExecutor> = Arc::new(ExecutionClient::new(
        config.execution_service_url.clone(),
        config.limits,
        config.poll_interval,
    ));
    // The registry lives for the whole process; jobs vanish on restart,
    // the submission/outcome rows do not
    let registry = Arc::new(JobRegistry::new());
    let store: Arc<dyn SubmissionStore> = Arc::new(InMemoryStore::new());

    let runner = BatchRunner::new(
        Arc::clone(&executor),
        Arc::clone(&store),
        Arc::clone(&registry),
        config.worker_count,
        config.item_deadline,
    );

    metrics::init_metrics();

    let state = Arc::new(AppState {
        executor,
        store,
        registry,
        runner,
    });

    // Build router
    let app = Router::new()
        .merge(routes::routes())
        .with_state(state);

    // Start server
    let addr = std::env::var("GRADEFLOW_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8000".to_string());
    let listener = TcpListener::bind(&addr).await
        .expect("Failed to bind to address");

    info!("HTTP server listening on {}", addr);
    info!("Ready to grade submissions");

    axum::serve(listener, app).await
        .expect("Server error");
}
