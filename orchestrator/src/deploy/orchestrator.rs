//! Deployment orchestrator
//!
//! Owns one state machine per project and wires the dispatcher, swap
//! controller, retention manager and rollback coordinator together. Every
//! attempt runs on its own task; the per-project state machine is the gate
//! that keeps at most one attempt in flight per project.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alert::{Alert, AlertSink};
use crate::build::reports::BuildReports;
use crate::build::BuildSystem;
use crate::deploy::audit::AuditLog;
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentState, ProjectStatus, TransitionRecord};
use crate::deploy::health::{HealthGate, HealthProbe};
use crate::deploy::retention::{RetentionManager, SnapshotStore};
use crate::deploy::rollback::RollbackCoordinator;
use crate::deploy::swap::{ArtifactSource, SwapController, SwapObserver, SwapSettings};
use crate::errors::{FailureKind, OrchestratorError};
use crate::models::attempt::{AttemptOutcome, DeploymentAttempt};
use crate::models::project::{NewProject, Project, ProjectUpdate};
use crate::models::snapshot::{Snapshot, VersionLabel};
use crate::models::webhook::{BuildReport, WebhookEvent};
use crate::proxy::ProxyProvisioner;
use crate::runtime::{ContainerRuntime, InstanceStats};
use crate::store::projects::ProjectStore;
use crate::webhook::dispatcher::{BuildGate, DispatchDecision, Dispatcher};
use crate::webhook::signature::SignatureVerifier;

/// External services the orchestrator coordinates
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<ProjectStore>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub builder: Arc<dyn BuildSystem>,
    pub probe: Arc<dyn HealthProbe>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub proxy: Arc<dyn ProxyProvisioner>,
    pub alerts: Arc<dyn AlertSink>,
}

/// Orchestrator options
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub swap: SwapSettings,

    /// Snapshots kept per project
    pub max_snapshots: usize,

    /// Transition records kept in memory
    pub audit_capacity: usize,

    /// Shared secret for source-control webhooks
    pub webhook_secret: Option<SecretString>,

    /// Shared secret for build-system webhooks
    pub build_webhook_secret: Option<SecretString>,

    /// Accept unsigned build reports when no build webhook secret is set
    pub allow_unsigned_build_reports: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            swap: SwapSettings::default(),
            max_snapshots: crate::deploy::retention::DEFAULT_MAX_SNAPSHOTS,
            audit_capacity: crate::deploy::audit::DEFAULT_AUDIT_CAPACITY,
            webhook_secret: None,
            build_webhook_secret: None,
            allow_unsigned_build_reports: false,
        }
    }
}

/// What an attempt does once it owns the project
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptKind {
    /// Build and swap in the tracked branch
    Deploy,

    /// Restore a specific snapshot
    Rollback { target: VersionLabel },
}

/// Proof that the state machine accepted a new attempt
#[derive(Debug, Clone)]
pub struct AttemptTicket {
    project_id: String,
    event_id: String,
    attempt: u64,
    kind: AttemptKind,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl AttemptTicket {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn kind(&self) -> &AttemptKind {
        &self.kind
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Result of an executed attempt
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub attempt: DeploymentAttempt,
    pub status: ProjectStatus,

    /// Snapshot taken after a successful deploy
    pub snapshot: Option<Snapshot>,
}

/// What happened to a build report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BuildReportOutcome {
    /// Handed to the in-flight attempt
    Delivered,

    /// A failure report for an idle project started a rollback
    RollbackStarted { attempt: u64 },

    Ignored { reason: String },
}

struct ProjectSlot {
    fsm: Mutex<DeploymentFsm>,

    /// Held by the executing attempt
    run_lock: Mutex<()>,

    /// Cancelled when the project is deleted or the process shuts down
    cancel: CancellationToken,
}

/// Deployment orchestrator
pub struct Orchestrator {
    store: Arc<ProjectStore>,
    slots: RwLock<HashMap<String, Arc<ProjectSlot>>>,
    dispatcher: Dispatcher,
    build_verifier: SignatureVerifier,
    allow_unsigned_build_reports: bool,
    swap: SwapController,
    retention: Arc<RetentionManager>,
    rollback: RollbackCoordinator,
    runtime: Arc<dyn ContainerRuntime>,
    proxy: Arc<dyn ProxyProvisioner>,
    alerts: Arc<dyn AlertSink>,
    reports: Arc<BuildReports>,
    audit: AuditLog,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build the orchestrator and resume every stored project.
    ///
    /// Projects persisted mid-attempt come back as `Failed` / `Interrupted`.
    pub async fn start(
        deps: Collaborators,
        options: OrchestratorOptions,
    ) -> Result<Arc<Self>, OrchestratorError> {
        let reports = Arc::new(BuildReports::new());
        let health = HealthGate::new(deps.probe.clone(), options.swap.health.clone());
        let swap = SwapController::new(
            deps.runtime.clone(),
            deps.builder.clone(),
            reports.clone(),
            health,
            options.swap.clone(),
        );
        let retention = Arc::new(
            RetentionManager::new(deps.snapshots.clone(), options.max_snapshots)
                .with_artifact_cleanup(deps.runtime.clone()),
        );
        let rollback = RollbackCoordinator::new(retention.clone(), swap.clone());

        let orchestrator = Arc::new(Self {
            store: deps.store,
            slots: RwLock::new(HashMap::new()),
            dispatcher: Dispatcher::new(SignatureVerifier::new(options.webhook_secret)),
            build_verifier: SignatureVerifier::new(options.build_webhook_secret),
            allow_unsigned_build_reports: options.allow_unsigned_build_reports,
            swap,
            retention,
            rollback,
            runtime: deps.runtime,
            proxy: deps.proxy,
            alerts: deps.alerts,
            reports,
            audit: AuditLog::new(options.audit_capacity),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        for project in orchestrator.store.list().await {
            let fsm = DeploymentFsm::resume(&project.id, &project.status, project.last_attempt);
            if fsm.status() != project.status {
                warn!(
                    project_id = %project.id,
                    attempt = project.last_attempt,
                    "attempt was interrupted by a restart"
                );
                let status = fsm.status();
                orchestrator
                    .store
                    .update(&project.id, |p| p.status = status)
                    .await?;
            }
            orchestrator.insert_slot(&project.id, fsm).await;
        }

        info!("orchestrator started");
        Ok(orchestrator)
    }

    async fn insert_slot(&self, project_id: &str, fsm: DeploymentFsm) {
        let slot = Arc::new(ProjectSlot {
            fsm: Mutex::new(fsm),
            run_lock: Mutex::new(()),
            cancel: self.shutdown.child_token(),
        });
        self.slots.write().await.insert(project_id.to_string(), slot);
    }

    async fn slot(&self, project_id: &str) -> Result<Arc<ProjectSlot>, OrchestratorError> {
        self.slots
            .read()
            .await
            .get(project_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::ProjectNotFound(project_id.to_string()))
    }

    /// Apply an event, persist the resulting status and append to the audit log
    async fn transition(
        &self,
        slot: &ProjectSlot,
        event: DeploymentEvent,
    ) -> Result<TransitionRecord, OrchestratorError> {
        let deployed = matches!(event, DeploymentEvent::ProbeSucceeded);
        let mut fsm = slot.fsm.lock().await;
        let record = fsm.process(event)?;

        let status = fsm.status();
        let attempt = fsm.attempt();
        let at = record.at;
        let persisted = self
            .store
            .update(&record.project_id, |p| {
                p.status = status;
                p.last_attempt = attempt;
                if deployed {
                    p.last_deployed_at = Some(at);
                }
            })
            .await;
        if let Err(e) = persisted {
            error!(project_id = %record.project_id, attempt, "could not persist status: {}", e);
        }

        self.audit.append(record.clone()).await;
        Ok(record)
    }

    fn ticket(&self, slot: &ProjectSlot, record: &TransitionRecord, event_id: &str, kind: AttemptKind) -> AttemptTicket {
        AttemptTicket {
            project_id: record.project_id.clone(),
            event_id: event_id.to_string(),
            attempt: record.attempt,
            kind,
            started_at: record.at,
            cancel: slot.cancel.child_token(),
        }
    }

    /// Verify, dispatch and, when accepted, start a source-control webhook
    pub async fn handle_source_webhook(
        self: &Arc<Self>,
        event: &WebhookEvent,
    ) -> Result<DispatchDecision, OrchestratorError> {
        let decision = self.dispatcher.dispatch(event, &**self).await?;
        if let DispatchDecision::StartBuild(ticket) = &decision {
            self.spawn_attempt(ticket.clone()).await;
        }
        Ok(decision)
    }

    /// Accept a build result from the CI webhook
    pub async fn handle_build_report(
        self: &Arc<Self>,
        project_id: &str,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<BuildReportOutcome, OrchestratorError> {
        let slot = self.slot(project_id).await?;

        if self.build_verifier.is_configured() {
            if !self.build_verifier.verify(payload, signature) {
                warn!(project_id, "rejected build report with invalid signature");
                return Err(OrchestratorError::VerificationFailed);
            }
        } else if self.allow_unsigned_build_reports {
            warn!(project_id, "accepting unsigned build report, no build webhook secret configured");
        } else {
            warn!(project_id, "rejected build report, no build webhook secret configured");
            return Err(OrchestratorError::VerificationFailed);
        }

        let report: BuildReport = serde_json::from_slice(payload)
            .map_err(|e| OrchestratorError::ValidationError(format!("malformed build report: {}", e)))?;

        let state = {
            let fsm = slot.fsm.lock().await;
            if fsm.state() == DeploymentState::Building {
                self.reports.record(project_id, report).await;
                return Ok(BuildReportOutcome::Delivered);
            }
            fsm.state()
        };
        if state.is_in_flight() {
            return Ok(BuildReportOutcome::Ignored {
                reason: "attempt is past its build".to_string(),
            });
        }
        if report.succeeded() {
            return Ok(BuildReportOutcome::Ignored {
                reason: "no attempt in flight".to_string(),
            });
        }

        match self.request_rollback(project_id, None).await {
            Ok(ticket) => Ok(BuildReportOutcome::RollbackStarted {
                attempt: ticket.attempt(),
            }),
            Err(OrchestratorError::NoSnapshotAvailable(_)) => Ok(BuildReportOutcome::Ignored {
                reason: "no snapshot available".to_string(),
            }),
            Err(OrchestratorError::BuildInProgress(_)) => Ok(BuildReportOutcome::Ignored {
                reason: "build in progress".to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Operator-triggered deploy of the tracked branch
    pub async fn request_deploy(self: &Arc<Self>, project_id: &str) -> Result<AttemptTicket, OrchestratorError> {
        let event_id = format!("manual-{}", uuid::Uuid::new_v4());
        let ticket = self.request_build(project_id, &event_id).await?;
        self.spawn_attempt(ticket.clone()).await;
        Ok(ticket)
    }

    /// Operator-triggered rollback.
    ///
    /// Without a target, restores the newest snapshot older than the serving
    /// version, so repeated rollbacks keep walking back. Fails before touching
    /// state when no snapshot qualifies.
    pub async fn request_rollback(
        self: &Arc<Self>,
        project_id: &str,
        target: Option<VersionLabel>,
    ) -> Result<AttemptTicket, OrchestratorError> {
        let slot = self.slot(project_id).await?;
        let project = self.project(project_id).await?;
        let before = project
            .serving_version
            .as_ref()
            .map(VersionLabel::timestamp)
            .or(project.last_deployed_at)
            .unwrap_or_else(Utc::now);
        let snapshot = self.rollback.select(project_id, target.as_ref(), before).await?;

        let record = self.transition(&slot, DeploymentEvent::RollbackRequested).await?;
        let event_id = format!("rollback-{}", uuid::Uuid::new_v4());
        let ticket = self.ticket(
            &slot,
            &record,
            &event_id,
            AttemptKind::Rollback {
                target: snapshot.version,
            },
        );
        self.spawn_attempt(ticket.clone()).await;
        Ok(ticket)
    }

    /// Operator clears a failure
    pub async fn reset(&self, project_id: &str) -> Result<ProjectStatus, OrchestratorError> {
        let slot = self.slot(project_id).await?;
        self.transition(&slot, DeploymentEvent::Reset).await?;
        let status = slot.fsm.lock().await.status();
        Ok(status)
    }

    async fn spawn_attempt(self: &Arc<Self>, ticket: AttemptTicket) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let project_id = ticket.project_id.clone();
            let attempt = ticket.attempt;
            if let Err(e) = this.execute(ticket).await {
                error!(project_id = %project_id, attempt, "attempt aborted: {}", e);
            }
        });

        let mut tasks = self.tasks.lock().await;
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Run an accepted attempt to completion
    pub async fn execute(&self, ticket: AttemptTicket) -> Result<AttemptReport, OrchestratorError> {
        let slot = self.slot(&ticket.project_id).await?;
        let _running = slot.run_lock.lock().await;
        let project = self.project(&ticket.project_id).await?;
        let attempt = DeploymentAttempt::new(&ticket.project_id, &ticket.event_id, ticket.attempt);

        info!(
            project_id = %ticket.project_id,
            attempt = ticket.attempt,
            event_id = %ticket.event_id,
            kind = ?ticket.kind,
            "attempt started"
        );

        let finished = match &ticket.kind {
            AttemptKind::Deploy => self.run_deploy(&slot, &project, &ticket).await,
            AttemptKind::Rollback { target } => self
                .run_rollback(&slot, &project, &ticket, target)
                .await
                .map(|outcome| (outcome, None)),
        };
        self.reports.clear_project(&ticket.project_id).await;
        let (outcome, snapshot) = finished?;

        let status = slot.fsm.lock().await.status();
        info!(
            project_id = %ticket.project_id,
            attempt = ticket.attempt,
            outcome = ?outcome,
            state = ?status.state,
            "attempt finished"
        );
        Ok(AttemptReport {
            attempt: attempt.resolve(outcome),
            status,
            snapshot,
        })
    }

    async fn run_deploy(
        &self,
        slot: &ProjectSlot,
        project: &Project,
        ticket: &AttemptTicket,
    ) -> Result<(AttemptOutcome, Option<Snapshot>), OrchestratorError> {
        let observer = AttemptObserver {
            orchestrator: self,
            slot,
        };

        let swapped = if ticket.cancel.is_cancelled() {
            Err(OrchestratorError::Cancelled)
        } else {
            self.swap
                .run_attempt(project, ticket.attempt, ArtifactSource::Build, &observer, &ticket.cancel)
                .await
        };

        match swapped {
            Ok(outcome) => {
                let record = self.transition(slot, DeploymentEvent::ProbeSucceeded).await?;
                let snapshot = match self.retention.snapshot(project, &outcome.artifact, record.at).await {
                    Ok(snapshot) => {
                        self.retention.prune(&project.id).await;
                        Some(snapshot)
                    }
                    Err(e) => {
                        error!(project_id = %project.id, attempt = ticket.attempt, "snapshot failed: {}", e);
                        None
                    }
                };
                self.record_serving(&project.id, snapshot.as_ref().map(|s| s.version.clone()))
                    .await;
                Ok((AttemptOutcome::Success, snapshot))
            }
            Err(err) => {
                let kind = err.failure_kind().unwrap_or(FailureKind::StartFailed);
                let reason = err.to_string();
                error!(project_id = %project.id, attempt = ticket.attempt, kind = ?kind, "attempt failed: {}", reason);
                self.transition(
                    slot,
                    DeploymentEvent::AttemptFailed {
                        kind,
                        reason: reason.clone(),
                    },
                )
                .await?;

                if kind.is_severe() {
                    self.escalate(project, ticket.attempt, kind, &reason).await;
                    return Ok((AttemptOutcome::Failure { kind, reason }, None));
                }
                if !kind.triggers_rollback() {
                    return Ok((AttemptOutcome::Failure { kind, reason }, None));
                }
                let outcome = self.recover(slot, project, ticket, kind, reason).await?;
                Ok((outcome, None))
            }
        }
    }

    /// Automatic rollback after a failed deploy
    async fn recover(
        &self,
        slot: &ProjectSlot,
        project: &Project,
        ticket: &AttemptTicket,
        kind: FailureKind,
        reason: String,
    ) -> Result<AttemptOutcome, OrchestratorError> {
        let snapshot = match self.retention.latest_before(&project.id, ticket.started_at).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                info!(project_id = %project.id, attempt = ticket.attempt, "no snapshot to roll back to");
                return Ok(AttemptOutcome::Failure { kind, reason });
            }
            Err(e) => {
                error!(project_id = %project.id, attempt = ticket.attempt, "could not list snapshots: {}", e);
                return Ok(AttemptOutcome::Failure { kind, reason });
            }
        };

        self.transition(slot, DeploymentEvent::RollbackStarted).await?;
        self.run_rollback(slot, project, ticket, &snapshot.version).await
    }

    /// Restore `target` while the state machine is `RollingBack`
    async fn run_rollback(
        &self,
        slot: &ProjectSlot,
        project: &Project,
        ticket: &AttemptTicket,
        target: &VersionLabel,
    ) -> Result<AttemptOutcome, OrchestratorError> {
        let restored = if ticket.cancel.is_cancelled() {
            Err(OrchestratorError::Cancelled)
        } else {
            self.rollback
                .rollback(project, ticket.attempt, Some(target), ticket.started_at, &ticket.cancel)
                .await
        };

        match restored {
            Ok(snapshot) => {
                self.transition(slot, DeploymentEvent::RollbackSucceeded).await?;
                self.record_serving(&project.id, Some(snapshot.version.clone())).await;
                Ok(AttemptOutcome::RolledBack {
                    version: snapshot.version.to_string(),
                })
            }
            Err(OrchestratorError::Cancelled) => {
                let reason = OrchestratorError::Cancelled.to_string();
                self.transition(
                    slot,
                    DeploymentEvent::AttemptFailed {
                        kind: FailureKind::Cancelled,
                        reason: reason.clone(),
                    },
                )
                .await?;
                Ok(AttemptOutcome::Failure {
                    kind: FailureKind::Cancelled,
                    reason,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                self.transition(slot, DeploymentEvent::RollbackFailed(reason.clone()))
                    .await?;
                self.escalate(project, ticket.attempt, FailureKind::RestoreFailed, &reason)
                    .await;
                Ok(AttemptOutcome::Failure {
                    kind: FailureKind::RestoreFailed,
                    reason,
                })
            }
        }
    }

    async fn record_serving(&self, project_id: &str, version: Option<VersionLabel>) {
        if let Err(e) = self.store.update(project_id, |p| p.serving_version = version).await {
            error!(project_id, "could not record serving version: {}", e);
        }
    }

    async fn escalate(&self, project: &Project, attempt: u64, kind: FailureKind, reason: &str) {
        let alert = Alert::new(
            &project.id,
            attempt,
            kind,
            format!("project {} needs attention: {}", project.name, reason),
        );
        self.alerts.alert(&alert).await;
    }

    /// Register a new project
    pub async fn register(&self, request: NewProject) -> Result<Project, OrchestratorError> {
        let pick_port = request.port.is_none();
        let project = request.into_project()?;
        let project = if pick_port {
            self.store.insert_with_free_port(project).await?
        } else {
            self.store.insert(project.clone()).await?;
            project
        };
        self.insert_slot(&project.id, DeploymentFsm::new(&project.id)).await;

        if let Some(domain) = &project.domain {
            if let Err(e) = self.proxy.provision(domain, project.port, project.tls).await {
                warn!(project_id = %project.id, domain = %domain, "could not provision route: {}", e);
            }
        }

        info!(project_id = %project.id, port = project.port, branch = %project.branch, "project registered");
        Ok(project)
    }

    /// Change or clear the public domain
    pub async fn update_domain(
        &self,
        project_id: &str,
        domain: Option<String>,
        tls: bool,
    ) -> Result<Project, OrchestratorError> {
        let project = self.project(project_id).await?;
        let domain = domain.filter(|d| !d.trim().is_empty());

        if project.domain == domain && project.tls == tls {
            return Ok(project);
        }
        if let Some(old) = &project.domain {
            self.proxy.deprovision(old).await?;
        }
        if let Some(new) = &domain {
            self.proxy.provision(new, project.port, tls).await?;
        }

        info!(project_id, domain = ?domain, tls, "domain updated");
        self.store
            .update(project_id, |p| {
                p.domain = domain;
                p.tls = tls;
            })
            .await
    }

    /// Change the settings the next attempt builds with. Rejected while an
    /// attempt is in flight.
    pub async fn update_project(
        &self,
        project_id: &str,
        update: ProjectUpdate,
    ) -> Result<Project, OrchestratorError> {
        update.validate()?;
        let slot = self.slot(project_id).await?;

        let fsm = slot.fsm.lock().await;
        if fsm.state().is_in_flight() {
            return Err(OrchestratorError::BuildInProgress(project_id.to_string()));
        }
        let project = self.store.update(project_id, move |p| update.apply(p)).await?;
        drop(fsm);

        info!(project_id, branch = %project.branch, "project updated");
        Ok(project)
    }

    /// Take the project's instances down and return it to `Idle`.
    ///
    /// Rejected while an attempt is in flight. Snapshots and routing are kept.
    pub async fn stop(&self, project_id: &str) -> Result<ProjectStatus, OrchestratorError> {
        let slot = self.slot(project_id).await?;
        let Ok(_running) = slot.run_lock.try_lock() else {
            return Err(OrchestratorError::BuildInProgress(project_id.to_string()));
        };
        self.transition(&slot, DeploymentEvent::Stopped).await?;

        for instance in self.runtime.list_instances(project_id).await? {
            if instance.running {
                self.runtime.stop(&instance.name).await?;
            }
            self.runtime.remove(&instance.name).await?;
            debug!(project_id, instance = %instance.name, "instance removed");
        }
        self.record_serving(project_id, None).await;

        info!(project_id, "project stopped");
        let status = slot.fsm.lock().await.status();
        Ok(status)
    }

    /// Delete a project: cancel its attempt, wait for it to unwind, then tear
    /// down instances, snapshots and routing
    pub async fn remove(&self, project_id: &str) -> Result<Project, OrchestratorError> {
        let slot = self
            .slots
            .write()
            .await
            .remove(project_id)
            .ok_or_else(|| OrchestratorError::ProjectNotFound(project_id.to_string()))?;

        slot.cancel.cancel();
        let _unwound = slot.run_lock.lock().await;
        debug!(project_id, "in-flight attempt unwound");

        match self.runtime.list_instances(project_id).await {
            Ok(instances) => {
                for instance in instances {
                    if let Err(e) = self.runtime.remove(&instance.name).await {
                        warn!(project_id, instance = %instance.name, "could not remove instance: {}", e);
                    }
                }
            }
            Err(e) => warn!(project_id, "could not list instances: {}", e),
        }

        if let Err(e) = self.retention.purge(project_id).await {
            warn!(project_id, "could not purge snapshots: {}", e);
        }

        let project = self.store.remove(project_id).await?;
        if let Some(domain) = &project.domain {
            if let Err(e) = self.proxy.deprovision(domain).await {
                warn!(project_id, domain = %domain, "could not remove route: {}", e);
            }
        }

        info!(project_id, "project removed");
        Ok(project)
    }

    pub async fn project(&self, project_id: &str) -> Result<Project, OrchestratorError> {
        self.store
            .get(project_id)
            .await
            .ok_or_else(|| OrchestratorError::ProjectNotFound(project_id.to_string()))
    }

    pub async fn projects(&self) -> Vec<Project> {
        self.store.list().await
    }

    pub async fn status(&self, project_id: &str) -> Result<ProjectStatus, OrchestratorError> {
        let slot = self.slot(project_id).await?;
        let status = slot.fsm.lock().await.status();
        Ok(status)
    }

    /// Deployment history, oldest first
    pub async fn snapshots(&self, project_id: &str) -> Result<Vec<Snapshot>, OrchestratorError> {
        self.slot(project_id).await?;
        self.retention.list(project_id).await
    }

    /// Audit trail of a project
    pub async fn events(&self, project_id: &str) -> Result<Vec<TransitionRecord>, OrchestratorError> {
        self.slot(project_id).await?;
        Ok(self.audit.for_project(project_id).await)
    }

    pub async fn logs(&self, project_id: &str, tail: usize) -> Result<String, OrchestratorError> {
        let project = self.project(project_id).await?;
        self.runtime.logs(&project.instance_name(), tail).await
    }

    pub async fn stats(&self, project_id: &str) -> Result<InstanceStats, OrchestratorError> {
        let project = self.project(project_id).await?;
        self.runtime.stats(&project.instance_name()).await
    }

    /// Cancel every attempt and wait for them to unwind, up to `max_delay`
    pub async fn shutdown(&self, max_delay: Duration) -> Result<(), OrchestratorError> {
        info!("Shutting down orchestrator...");
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        match tokio::time::timeout(max_delay, futures::future::join_all(tasks)).await {
            Ok(_) => {
                info!("Orchestrator shutdown complete");
                Ok(())
            }
            Err(_) => Err(OrchestratorError::ShutdownError(format!(
                "attempts still running after {:?}",
                max_delay
            ))),
        }
    }
}

#[async_trait]
impl BuildGate for Orchestrator {
    async fn tracked_branch(&self, project_id: &str) -> Option<String> {
        if !self.slots.read().await.contains_key(project_id) {
            return None;
        }
        self.store.get(project_id).await.map(|p| p.branch)
    }

    async fn request_build(
        &self,
        project_id: &str,
        event_id: &str,
    ) -> Result<AttemptTicket, OrchestratorError> {
        let slot = self.slot(project_id).await?;
        let record = self.transition(&slot, DeploymentEvent::BuildRequested).await?;
        Ok(self.ticket(&slot, &record, event_id, AttemptKind::Deploy))
    }
}

/// Moves the state machine to `HealthChecking` once the new instance runs
struct AttemptObserver<'a> {
    orchestrator: &'a Orchestrator,
    slot: &'a ProjectSlot,
}

#[async_trait]
impl<'a> SwapObserver for AttemptObserver<'a> {
    async fn instance_started(&self) -> Result<(), OrchestratorError> {
        self.orchestrator
            .transition(self.slot, DeploymentEvent::InstanceStarted)
            .await
            .map(|_| ())
    }
}
