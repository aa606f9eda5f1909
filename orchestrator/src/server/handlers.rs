//! HTTP request handlers

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::{ProjectStatus, TransitionRecord};
use crate::deploy::orchestrator::{AttemptKind, AttemptTicket, BuildReportOutcome};
use crate::errors::OrchestratorError;
use crate::models::project::{NewProject, Project, ProjectUpdate};
use crate::models::snapshot::{Snapshot, VersionLabel};
use crate::models::webhook::{Provider, WebhookEvent};
use crate::runtime::InstanceStats;
use crate::server::error::ApiResult;
use crate::server::state::ServerState;
use crate::webhook::dispatcher::{DispatchDecision, IgnoreReason};

/// Event type headers, checked in order
pub const EVENT_HEADERS: [&str; 2] = ["x-github-event", "x-gitlab-event"];

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

pub const DELIVERY_HEADER: &str = "x-github-delivery";

pub const BUILD_SIGNATURE_HEADER: &str = "x-build-signature-256";

const DEFAULT_LOG_TAIL: usize = 200;

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

// ================================== SERVICE ===================================== //

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "dockyard".to_string(),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

// ================================== WEBHOOKS ==================================== //

/// Outcome of a source-control webhook
#[derive(Debug, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum WebhookResponse {
    StartBuild { attempt: u64, event_id: String },
    Ignored { reason: IgnoreReason, message: String },
}

/// Source-control push webhook
pub async fn source_webhook_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let event = WebhookEvent {
        id: header(&headers, DELIVERY_HEADER).unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        provider: Provider::SourceControl,
        event_type: EVENT_HEADERS.iter().find_map(|name| header(&headers, name)),
        payload: body.to_vec(),
        signature: header(&headers, SIGNATURE_HEADER),
        project_id,
    };

    let response = match state.orchestrator.handle_source_webhook(&event).await? {
        DispatchDecision::StartBuild(ticket) => (
            StatusCode::ACCEPTED,
            Json(WebhookResponse::StartBuild {
                attempt: ticket.attempt(),
                event_id: ticket.event_id().to_string(),
            }),
        ),
        DispatchDecision::Ignore(reason) => (
            StatusCode::OK,
            Json(WebhookResponse::Ignored {
                message: reason.to_string(),
                reason,
            }),
        ),
    };
    Ok(response)
}

/// Build-system result webhook
pub async fn build_webhook_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<BuildReportOutcome>> {
    let signature = header(&headers, BUILD_SIGNATURE_HEADER);
    let outcome = state
        .orchestrator
        .handle_build_report(&project_id, &body, signature.as_deref())
        .await?;
    Ok(Json(outcome))
}

// ================================== PROJECTS ==================================== //

/// Project with its live status
#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    #[serde(flatten)]
    pub project: Project,
    pub live: ProjectStatus,
}

pub async fn list_projects_handler(State(state): State<Arc<ServerState>>) -> Json<Vec<Project>> {
    Json(state.orchestrator.projects().await)
}

pub async fn create_project_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<NewProject>,
) -> ApiResult<impl IntoResponse> {
    let project = state.orchestrator.register(request).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get_project_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ProjectResponse>> {
    let project = state.orchestrator.project(&project_id).await?;
    let live = state.orchestrator.status(&project_id).await?;
    Ok(Json(ProjectResponse { project, live }))
}

pub async fn delete_project_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Project>> {
    Ok(Json(state.orchestrator.remove(&project_id).await?))
}

pub async fn update_project_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    Json(update): Json<ProjectUpdate>,
) -> ApiResult<Json<Project>> {
    Ok(Json(state.orchestrator.update_project(&project_id, update).await?))
}

pub async fn project_env_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<BTreeMap<String, String>>> {
    Ok(Json(state.orchestrator.project(&project_id).await?.env))
}

/// Domain change request; a null or empty domain removes the route
#[derive(Debug, Deserialize)]
pub struct DomainRequest {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub tls: bool,
}

pub async fn update_domain_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    Json(request): Json<DomainRequest>,
) -> ApiResult<Json<Project>> {
    let project = state
        .orchestrator
        .update_domain(&project_id, request.domain, request.tls)
        .await?;
    Ok(Json(project))
}

// ================================== ATTEMPTS ==================================== //

/// Accepted operator attempt
#[derive(Debug, Serialize)]
pub struct AttemptAccepted {
    pub project_id: String,
    pub attempt: u64,
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<VersionLabel>,
}

impl AttemptAccepted {
    fn new(ticket: &AttemptTicket, target: Option<VersionLabel>) -> Self {
        Self {
            project_id: ticket.project_id().to_string(),
            attempt: ticket.attempt(),
            event_id: ticket.event_id().to_string(),
            target,
        }
    }
}

pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let ticket = state.orchestrator.request_deploy(&project_id).await?;
    Ok((StatusCode::ACCEPTED, Json(AttemptAccepted::new(&ticket, None))))
}

/// Rollback request; without a version the previous snapshot is restored
#[derive(Debug, Default, Deserialize)]
pub struct RollbackRequest {
    #[serde(default)]
    pub version: Option<String>,
}

pub async fn rollback_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: RollbackRequest = if body.is_empty() {
        RollbackRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| OrchestratorError::ValidationError(format!("malformed rollback request: {}", e)))?
    };
    let target = match request.version.as_deref() {
        Some(raw) => Some(VersionLabel::parse(raw).ok_or_else(|| {
            OrchestratorError::ValidationError(format!("invalid version label: {}", raw))
        })?),
        None => None,
    };

    let ticket = state.orchestrator.request_rollback(&project_id, target).await?;
    let restoring = match ticket.kind() {
        AttemptKind::Rollback { target } => Some(target.clone()),
        AttemptKind::Deploy => None,
    };
    Ok((StatusCode::ACCEPTED, Json(AttemptAccepted::new(&ticket, restoring))))
}

pub async fn stop_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ProjectStatus>> {
    Ok(Json(state.orchestrator.stop(&project_id).await?))
}

pub async fn reset_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ProjectStatus>> {
    Ok(Json(state.orchestrator.reset(&project_id).await?))
}

// ================================ INSPECTION ==================================== //

pub async fn snapshots_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<Snapshot>>> {
    Ok(Json(state.orchestrator.snapshots(&project_id).await?))
}

pub async fn events_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<TransitionRecord>>> {
    Ok(Json(state.orchestrator.events(&project_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub project_id: String,
    pub logs: String,
}

pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<LogsResponse>> {
    let tail = query.tail.unwrap_or(DEFAULT_LOG_TAIL);
    let logs = state.orchestrator.logs(&project_id, tail).await?;
    Ok(Json(LogsResponse { project_id, logs }))
}

pub async fn stats_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<InstanceStats>> {
    Ok(Json(state.orchestrator.stats(&project_id).await?))
}
