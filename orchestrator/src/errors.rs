//! Error types for the Dockyard orchestrator

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deploy::fsm::DeploymentState;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Webhook signature verification failed")]
    VerificationFailed,

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Instance start failed: {0}")]
    StartFailed(String),

    #[error("Health check timed out after {attempts} attempts")]
    HealthCheckTimeout { attempts: u32 },

    #[error("Restore failed: {0}")]
    RestoreFailed(String),

    #[error("No snapshot available for project {0}")]
    NoSnapshotAvailable(String),

    #[error("Snapshot {version} not found for project {project_id}")]
    SnapshotNotFound { project_id: String, version: String },

    #[error("Build already in progress for project {0}")]
    BuildInProgress(String),

    #[error("Invalid transition from {from:?} on {event}")]
    InvalidTransition { from: DeploymentState, event: String },

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Project already exists: {0}")]
    ProjectExists(String),

    #[error("Port {port} is already used by project {project_id}")]
    PortInUse { port: u16, project_id: String },

    #[error("Container runtime error: {0}")]
    RuntimeError(String),

    #[error("Proxy error: {0}")]
    ProxyError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Attempt cancelled")]
    Cancelled,
}

impl OrchestratorError {
    /// Classify the error as a status-level failure kind, when it is one
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            OrchestratorError::BuildFailed(_) => Some(FailureKind::BuildFailed),
            OrchestratorError::StartFailed(_) => Some(FailureKind::StartFailed),
            OrchestratorError::HealthCheckTimeout { .. } => Some(FailureKind::HealthCheckTimeout),
            OrchestratorError::RestoreFailed(_) => Some(FailureKind::RestoreFailed),
            OrchestratorError::Cancelled => Some(FailureKind::Cancelled),
            _ => None,
        }
    }
}

/// Why a project ended up in the `Failed` state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The build system reported failure, no swap was attempted
    BuildFailed,

    /// The new instance could not be started
    StartFailed,

    /// The new instance never became healthy
    HealthCheckTimeout,

    /// The previous instance could not be revived. The project may be down.
    RestoreFailed,

    /// The attempt was abandoned (project deleted, shutdown)
    Cancelled,

    /// The process stopped while the attempt was in flight
    Interrupted,
}

impl FailureKind {
    /// Whether this failure needs an operator, not just a new push
    pub fn is_severe(&self) -> bool {
        matches!(self, FailureKind::RestoreFailed)
    }

    /// Whether the rollback coordinator should run after this failure
    pub fn triggers_rollback(&self) -> bool {
        matches!(
            self,
            FailureKind::BuildFailed | FailureKind::StartFailed | FailureKind::HealthCheckTimeout
        )
    }
}
