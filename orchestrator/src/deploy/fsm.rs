//! Finite State Machine for the project deployment lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{FailureKind, OrchestratorError};

/// Deployment state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// Created, never deployed
    #[default]
    Idle,

    /// Build in progress
    Building,

    /// New instance started, waiting for the health probe
    HealthChecking,

    /// Serving a healthy instance
    Deployed,

    /// Last attempt failed
    Failed,

    /// Restoring a snapshot
    RollingBack,
}

impl DeploymentState {
    /// Whether an attempt currently owns the project
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            DeploymentState::Building | DeploymentState::HealthChecking | DeploymentState::RollingBack
        )
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// A push or manual trigger asks for a new attempt
    BuildRequested,

    /// The new instance is running
    InstanceStarted,

    /// The new instance passed the health probe
    ProbeSucceeded,

    /// Build, start or health gate failed, or the attempt was cancelled
    AttemptFailed { kind: FailureKind, reason: String },

    /// Automatic rollback after a failed attempt
    RollbackStarted,

    /// Operator asked to roll back to a snapshot
    RollbackRequested,

    /// The restored instance passed the health probe
    RollbackSucceeded,

    /// The restored instance could not be confirmed
    RollbackFailed(String),

    /// Operator cleared a failure
    Reset,

    /// Operator took the project's instances down
    Stopped,
}

impl DeploymentEvent {
    fn name(&self) -> &'static str {
        match self {
            DeploymentEvent::BuildRequested => "build_requested",
            DeploymentEvent::InstanceStarted => "instance_started",
            DeploymentEvent::ProbeSucceeded => "probe_succeeded",
            DeploymentEvent::AttemptFailed { .. } => "attempt_failed",
            DeploymentEvent::RollbackStarted => "rollback_started",
            DeploymentEvent::RollbackRequested => "rollback_requested",
            DeploymentEvent::RollbackSucceeded => "rollback_succeeded",
            DeploymentEvent::RollbackFailed(_) => "rollback_failed",
            DeploymentEvent::Reset => "reset",
            DeploymentEvent::Stopped => "stopped",
        }
    }
}

/// Lifecycle status exposed on the project record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStatus {
    pub state: DeploymentState,

    /// Set when the serving instance came from a snapshot
    #[serde(default)]
    pub rolled_back: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One entry of the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub project_id: String,
    pub attempt: u64,
    pub from: DeploymentState,
    pub to: DeploymentState,
    pub at: DateTime<Utc>,
}

/// Deployment FSM for a single project
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    project_id: String,
    state: DeploymentState,
    rolled_back: bool,
    failure: Option<FailureKind>,
    error: Option<String>,
    attempt: u64,
}

impl DeploymentFsm {
    /// Create a new FSM in idle state
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            state: DeploymentState::Idle,
            rolled_back: false,
            failure: None,
            error: None,
            attempt: 0,
        }
    }

    /// Rebuild the FSM from a persisted status.
    ///
    /// An in-flight state cannot be resumed after a restart; it becomes
    /// `Failed` with `Interrupted`.
    pub fn resume(project_id: impl Into<String>, status: &ProjectStatus, last_attempt: u64) -> Self {
        let mut fsm = Self {
            project_id: project_id.into(),
            state: status.state,
            rolled_back: status.rolled_back,
            failure: status.failure,
            error: status.error.clone(),
            attempt: last_attempt,
        };
        if fsm.state.is_in_flight() {
            fsm.state = DeploymentState::Failed;
            fsm.rolled_back = false;
            fsm.failure = Some(FailureKind::Interrupted);
            fsm.error = Some(format!("interrupted while {:?}", status.state));
        }
        fsm
    }

    /// Get current state
    pub fn state(&self) -> DeploymentState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Get the failure kind if any
    pub fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    /// Current attempt sequence number
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Snapshot of the status for persistence
    pub fn status(&self) -> ProjectStatus {
        ProjectStatus {
            state: self.state,
            rolled_back: self.rolled_back,
            failure: self.failure,
            error: self.error.clone(),
        }
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<TransitionRecord, OrchestratorError> {
        use DeploymentState::*;

        let from = self.state;
        let to = match (from, &event) {
            // New attempts
            (Idle | Deployed | Failed, DeploymentEvent::BuildRequested) => {
                self.begin_attempt();
                Building
            }
            (Idle | Deployed | Failed, DeploymentEvent::RollbackRequested) => {
                self.begin_attempt();
                RollingBack
            }
            (Building | HealthChecking | RollingBack, DeploymentEvent::BuildRequested)
            | (Building | HealthChecking | RollingBack, DeploymentEvent::RollbackRequested) => {
                return Err(OrchestratorError::BuildInProgress(self.project_id.clone()));
            }

            // From Building
            (Building, DeploymentEvent::InstanceStarted) => HealthChecking,

            // From HealthChecking
            (HealthChecking, DeploymentEvent::ProbeSucceeded) => Deployed,

            // RollingBack only fails this way when cancelled
            (Building | HealthChecking | RollingBack, DeploymentEvent::AttemptFailed { kind, reason }) => {
                self.failure = Some(*kind);
                self.error = Some(reason.clone());
                Failed
            }

            // From Failed
            (Failed, DeploymentEvent::RollbackStarted) => RollingBack,
            (Failed, DeploymentEvent::Reset) => {
                self.failure = None;
                self.error = None;
                Idle
            }

            // From RollingBack
            (RollingBack, DeploymentEvent::RollbackSucceeded) => {
                self.rolled_back = true;
                self.failure = None;
                self.error = None;
                Deployed
            }
            (RollingBack, DeploymentEvent::RollbackFailed(reason)) => {
                self.failure = Some(FailureKind::RestoreFailed);
                self.error = Some(reason.clone());
                Failed
            }

            // Nothing serves after a stop
            (Idle | Deployed | Failed, DeploymentEvent::Stopped) => {
                self.rolled_back = false;
                self.failure = None;
                self.error = None;
                Idle
            }
            (Building | HealthChecking | RollingBack, DeploymentEvent::Stopped) => {
                return Err(OrchestratorError::BuildInProgress(self.project_id.clone()));
            }

            // Invalid transitions
            (state, event) => {
                return Err(OrchestratorError::InvalidTransition {
                    from: state,
                    event: event.name().to_string(),
                });
            }
        };

        self.state = to;
        let record = TransitionRecord {
            project_id: self.project_id.clone(),
            attempt: self.attempt,
            from,
            to,
            at: Utc::now(),
        };
        info!(
            project_id = %record.project_id,
            attempt = record.attempt,
            from = ?record.from,
            to = ?record.to,
            event = event.name(),
            "state transition"
        );
        Ok(record)
    }

    fn begin_attempt(&mut self) {
        self.attempt += 1;
        self.rolled_back = false;
        self.failure = None;
        self.error = None;
    }
}
