//! Deployment attempt models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::FailureKind;

/// How an attempt resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// New instance healthy and serving
    Success,

    /// Attempt failed and nothing was rolled back
    Failure { kind: FailureKind, reason: String },

    /// Attempt failed and a snapshot is now serving
    RolledBack { version: String },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            AttemptOutcome::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// One build, health-check and swap cycle. Lives only as long as the attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentAttempt {
    pub project_id: String,

    /// ID of the webhook delivery or manual trigger
    pub event_id: String,

    /// Per-project monotonically increasing sequence number
    pub attempt: u64,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<AttemptOutcome>,
}

impl DeploymentAttempt {
    pub fn new(project_id: impl Into<String>, event_id: impl Into<String>, attempt: u64) -> Self {
        Self {
            project_id: project_id.into(),
            event_id: event_id.into(),
            attempt,
            started_at: Utc::now(),
            outcome: None,
        }
    }

    /// Record the outcome, consuming the attempt
    pub fn resolve(mut self, outcome: AttemptOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }
}
