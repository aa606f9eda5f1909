//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::OrchestratorError;
use crate::server::handlers::{
    build_webhook_handler, create_project_handler, delete_project_handler, deploy_handler,
    events_handler, get_project_handler, health_handler, list_projects_handler, logs_handler,
    project_env_handler, reset_handler, rollback_handler, snapshots_handler, source_webhook_handler,
    stats_handler, stop_handler, update_domain_handler, update_project_handler,
};
use crate::server::state::ServerState;

/// Build the router over a shared state
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health
        .route("/health", get(health_handler))
        // Webhooks
        .route("/webhooks/source/{project_id}", post(source_webhook_handler))
        .route("/webhooks/build/{project_id}", post(build_webhook_handler))
        // Projects
        .route("/projects", get(list_projects_handler).post(create_project_handler))
        .route(
            "/projects/{project_id}",
            get(get_project_handler)
                .patch(update_project_handler)
                .delete(delete_project_handler),
        )
        .route("/projects/{project_id}/env", get(project_env_handler))
        .route("/projects/{project_id}/domain", put(update_domain_handler))
        // Attempts
        .route("/projects/{project_id}/deploy", post(deploy_handler))
        .route("/projects/{project_id}/rollback", post(rollback_handler))
        .route("/projects/{project_id}/reset", post(reset_handler))
        .route("/projects/{project_id}/stop", post(stop_handler))
        // Inspection
        .route("/projects/{project_id}/snapshots", get(snapshots_handler))
        .route("/projects/{project_id}/events", get(events_handler))
        .route("/projects/{project_id}/logs", get(logs_handler))
        .route("/projects/{project_id}/stats", get(stats_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), OrchestratorError>>, OrchestratorError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| OrchestratorError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| OrchestratorError::ServerError(e.to_string()))
    });

    Ok(handle)
}
