//! Build trigger dispatcher
//!
//! Decides whether an inbound source-control event should start a build.
//! The dispatcher is purely decisional: the only side effect it can cause is
//! the state transition requested through [`BuildGate::request_build`].

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::deploy::orchestrator::AttemptTicket;
use crate::errors::OrchestratorError;
use crate::models::webhook::{PushPayload, WebhookEvent};
use crate::webhook::signature::SignatureVerifier;

/// The orchestrator-side of dispatching: project lookup and the state gate
#[async_trait]
pub trait BuildGate: Send + Sync {
    /// Tracked branch of a project, `None` if the project is unknown
    async fn tracked_branch(&self, project_id: &str) -> Option<String>;

    /// Ask the state machine to enter `Building`
    async fn request_build(
        &self,
        project_id: &str,
        event_id: &str,
    ) -> Result<AttemptTicket, OrchestratorError>;
}

/// Why an event did not start a build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    UnsupportedEvent(String),
    UnknownProject,
    MalformedPayload,
    BranchMismatch,
    BuildInProgress,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::UnsupportedEvent(kind) => write!(f, "unsupported event: {}", kind),
            IgnoreReason::UnknownProject => f.write_str("unknown project"),
            IgnoreReason::MalformedPayload => f.write_str("malformed payload"),
            IgnoreReason::BranchMismatch => f.write_str("branch mismatch"),
            IgnoreReason::BuildInProgress => f.write_str("build in progress"),
        }
    }
}

/// Dispatch result for a verified event
#[derive(Debug)]
pub enum DispatchDecision {
    StartBuild(AttemptTicket),
    Ignore(IgnoreReason),
}

impl DispatchDecision {
    pub fn is_start(&self) -> bool {
        matches!(self, DispatchDecision::StartBuild(_))
    }
}

/// Build trigger dispatcher
#[derive(Debug, Clone)]
pub struct Dispatcher {
    verifier: SignatureVerifier,
}

impl Dispatcher {
    pub fn new(verifier: SignatureVerifier) -> Self {
        Self { verifier }
    }

    /// Dispatch a source-control event.
    ///
    /// Returns `Err(VerificationFailed)` for a bad or missing signature; no
    /// state is touched in that case.
    pub async fn dispatch(
        &self,
        event: &WebhookEvent,
        gate: &dyn BuildGate,
    ) -> Result<DispatchDecision, OrchestratorError> {
        if !self.verifier.verify(&event.payload, event.signature.as_deref()) {
            warn!(
                project_id = %event.project_id,
                event_id = %event.id,
                "rejected webhook with invalid signature"
            );
            return Err(OrchestratorError::VerificationFailed);
        }

        if !event.is_push() {
            let kind = event.event_type.clone().unwrap_or_else(|| "none".to_string());
            return Ok(self.ignore(event, IgnoreReason::UnsupportedEvent(kind)));
        }

        let Some(tracked) = gate.tracked_branch(&event.project_id).await else {
            return Ok(self.ignore(event, IgnoreReason::UnknownProject));
        };

        let payload: PushPayload = match serde_json::from_slice(&event.payload) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(event_id = %event.id, "push payload did not parse: {}", e);
                return Ok(self.ignore(event, IgnoreReason::MalformedPayload));
            }
        };

        if payload.branch() != tracked {
            debug!(
                event_id = %event.id,
                branch = payload.branch(),
                tracked = %tracked,
                "push to untracked branch"
            );
            return Ok(self.ignore(event, IgnoreReason::BranchMismatch));
        }

        match gate.request_build(&event.project_id, &event.id).await {
            Ok(ticket) => {
                info!(
                    project_id = %event.project_id,
                    event_id = %event.id,
                    attempt = ticket.attempt(),
                    pusher = payload.pusher.as_ref().and_then(|p| p.name.as_deref()).unwrap_or("unknown"),
                    "push accepted, starting build"
                );
                Ok(DispatchDecision::StartBuild(ticket))
            }
            Err(OrchestratorError::BuildInProgress(_)) => {
                Ok(self.ignore(event, IgnoreReason::BuildInProgress))
            }
            Err(OrchestratorError::ProjectNotFound(_)) => {
                Ok(self.ignore(event, IgnoreReason::UnknownProject))
            }
            Err(e) => Err(e),
        }
    }

    fn ignore(&self, event: &WebhookEvent, reason: IgnoreReason) -> DispatchDecision {
        info!(
            project_id = %event.project_id,
            event_id = %event.id,
            reason = %reason,
            "webhook ignored"
        );
        DispatchDecision::Ignore(reason)
    }
}
