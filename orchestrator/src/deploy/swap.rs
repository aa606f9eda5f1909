//! Blue/green swap controller
//!
//! One attempt tags the serving instance as previous, produces an artifact,
//! starts a new instance under the serving name and gates it on health. The
//! previous instance is retired only after the new one is confirmed healthy;
//! on any failure the new instance is removed and the previous one restored.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::build::reports::BuildReports;
use crate::build::{ArtifactRef, BuildId, BuildRequest, BuildStatus, BuildSystem};
use crate::deploy::health::{HealthGate, HealthGateOptions};
use crate::errors::OrchestratorError;
use crate::models::project::Project;
use crate::runtime::{ContainerRuntime, Instance, StartSpec};
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Swap controller settings
#[derive(Debug, Clone)]
pub struct SwapSettings {
    pub health: HealthGateOptions,

    /// Pause between build status polls
    pub build_poll_interval: Duration,

    /// Give up on a build after this long
    pub build_timeout: Duration,

    /// Upper bound for a single runtime or build-system call
    pub call_timeout: Duration,

    /// Restore tries before declaring `RestoreFailed`
    pub restore_attempts: u32,

    pub restore_backoff: CooldownOptions,
}

impl Default for SwapSettings {
    fn default() -> Self {
        Self {
            health: HealthGateOptions::default(),
            build_poll_interval: Duration::from_secs(5),
            build_timeout: Duration::from_secs(30 * 60),
            call_timeout: Duration::from_secs(60),
            restore_attempts: 3,
            restore_backoff: CooldownOptions {
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
            },
        }
    }
}

/// Where the attempt's artifact comes from
#[derive(Debug, Clone)]
pub enum ArtifactSource {
    /// Build the tracked branch
    Build,

    /// Reuse an artifact that already exists (rollback)
    Existing(ArtifactRef),
}

/// Hook called between the swap steps
#[async_trait]
pub trait SwapObserver: Send + Sync {
    /// The new instance is running and about to be probed
    async fn instance_started(&self) -> Result<(), OrchestratorError>;
}

/// Observer that does nothing
pub struct Unobserved;

#[async_trait]
impl SwapObserver for Unobserved {
    async fn instance_started(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

/// Result of a successful swap
#[derive(Debug, Clone)]
pub struct SwapOutcome {
    /// Artifact now serving
    pub artifact: ArtifactRef,

    /// Health probes it took
    pub probes: u32,
}

/// Blue/green swap controller
#[derive(Clone)]
pub struct SwapController {
    runtime: Arc<dyn ContainerRuntime>,
    builder: Arc<dyn BuildSystem>,
    reports: Arc<BuildReports>,
    health: HealthGate,
    settings: SwapSettings,
}

impl SwapController {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        builder: Arc<dyn BuildSystem>,
        reports: Arc<BuildReports>,
        health: HealthGate,
        settings: SwapSettings,
    ) -> Self {
        Self {
            runtime,
            builder,
            reports,
            health,
            settings,
        }
    }

    /// Run one swap attempt.
    ///
    /// Errors carry the failure classification: `BuildFailed`, `StartFailed`,
    /// `HealthCheckTimeout`, `Cancelled`, or `RestoreFailed` when the previous
    /// instance could not be brought back afterwards.
    pub async fn run_attempt(
        &self,
        project: &Project,
        attempt: u64,
        source: ArtifactSource,
        observer: &dyn SwapObserver,
        cancel: &CancellationToken,
    ) -> Result<SwapOutcome, OrchestratorError> {
        let previous = self
            .tag_previous(project, cancel)
            .await
            .map_err(|e| start_failure("could not tag the serving instance", e))?;

        let mut built = None;
        match self.swap_in(project, attempt, source, observer, cancel, &mut built).await {
            Ok(outcome) => {
                self.retire_previous(project, previous.as_ref()).await;
                info!(
                    project_id = %project.id,
                    attempt,
                    artifact = %outcome.artifact,
                    probes = outcome.probes,
                    "swap complete"
                );
                Ok(outcome)
            }
            Err(err) => {
                warn!(project_id = %project.id, attempt, "swap failed: {}", err);
                let restored = self.abort(project, attempt, previous.as_ref()).await;
                if let Some(artifact) = built {
                    self.discard_artifact(project, attempt, &artifact).await;
                }
                match restored {
                    Ok(()) => Err(err),
                    Err(OrchestratorError::RestoreFailed(reason)) => Err(
                        OrchestratorError::RestoreFailed(format!("{} (attempt failed: {})", reason, err)),
                    ),
                    Err(other) => Err(other),
                }
            }
        }
    }

    /// Steps 2 to 4: artifact, start, health gate.
    ///
    /// A freshly built artifact is left in `built` so a failed attempt can discard it.
    async fn swap_in(
        &self,
        project: &Project,
        attempt: u64,
        source: ArtifactSource,
        observer: &dyn SwapObserver,
        cancel: &CancellationToken,
        built: &mut Option<ArtifactRef>,
    ) -> Result<SwapOutcome, OrchestratorError> {
        let artifact = match source {
            ArtifactSource::Build => {
                let request = BuildRequest {
                    project_id: project.id.clone(),
                    repo_url: project.repo_url.clone(),
                    branch: project.branch.clone(),
                    image: project.image_repository(),
                    tag: format!("a{}-{}", attempt, Utc::now().format("%Y%m%d%H%M%S")),
                };
                let artifact = self.await_build(request, cancel).await?;
                *built = Some(artifact.clone());
                artifact
            }
            ArtifactSource::Existing(artifact) => artifact,
        };

        let spec = StartSpec {
            name: project.instance_name(),
            project_id: project.id.clone(),
            artifact: artifact.clone(),
            port: project.port,
            env: project.env.clone(),
        };
        self.call("start instance", self.runtime.start(&spec), cancel)
            .await
            .map_err(|e| start_failure("instance did not start", e))?;
        info!(project_id = %project.id, attempt, artifact = %artifact, "new instance started");

        observer.instance_started().await?;

        let probes = self.health.wait_healthy(project.port, cancel).await?;
        Ok(SwapOutcome { artifact, probes })
    }

    /// Submit a build and poll it to completion.
    ///
    /// A build that is abandoned (cancelled, timed out or reported failed) is
    /// cancelled in the build system as well.
    async fn await_build(
        &self,
        request: BuildRequest,
        cancel: &CancellationToken,
    ) -> Result<ArtifactRef, OrchestratorError> {
        let build_id = self
            .call("submit build", self.builder.submit(request.clone()), cancel)
            .await
            .map_err(build_failure)?;
        debug!(project_id = %request.project_id, build_id = %build_id, "waiting for build");

        let result = self.poll_build(&request, &build_id, cancel).await;
        if result.is_err() {
            if let Err(e) = self.cleanup("cancel build", self.builder.cancel(&build_id)).await {
                warn!(project_id = %request.project_id, build_id = %build_id, "could not cancel build: {}", e);
            }
        }
        result
    }

    async fn poll_build(
        &self,
        request: &BuildRequest,
        build_id: &BuildId,
        cancel: &CancellationToken,
    ) -> Result<ArtifactRef, OrchestratorError> {
        let deadline = Instant::now() + self.settings.build_timeout;
        loop {
            if let Some(report) = self.reports.take(&request.project_id, &build_id.0).await {
                return if report.succeeded() {
                    Ok(request.artifact())
                } else {
                    Err(OrchestratorError::BuildFailed(
                        report
                            .message
                            .unwrap_or_else(|| format!("build {} reported failure", build_id)),
                    ))
                };
            }

            match self
                .call("build status", self.builder.status(build_id), cancel)
                .await
                .map_err(build_failure)?
            {
                BuildStatus::Running => {}
                BuildStatus::Succeeded(artifact) => return Ok(artifact),
                BuildStatus::Failed(reason) => return Err(OrchestratorError::BuildFailed(reason)),
            }

            if Instant::now() >= deadline {
                return Err(OrchestratorError::BuildFailed(format!(
                    "build {} did not finish within {:?}",
                    build_id, self.settings.build_timeout
                )));
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                _ = tokio::time::sleep(self.settings.build_poll_interval) => {}
            }
        }
    }

    /// Step 1: rename the serving instance out of the way.
    ///
    /// A leftover previous instance from an interrupted swap is removed first.
    async fn tag_previous(
        &self,
        project: &Project,
        cancel: &CancellationToken,
    ) -> Result<Option<Instance>, OrchestratorError> {
        let serving = project.instance_name();
        let previous = project.previous_instance_name();
        let instances = self
            .call("list instances", self.runtime.list_instances(&project.id), cancel)
            .await?;

        if instances.iter().any(|i| i.name == previous) {
            if instances.iter().any(|i| i.name == serving) {
                warn!(project_id = %project.id, "removing stale previous instance");
                self.call("remove instance", self.runtime.remove(&previous), cancel)
                    .await?;
            } else {
                // interrupted before the new instance started: the stale one is the serving one
                self.call("rename instance", self.runtime.rename(&previous, &serving), cancel)
                    .await?;
            }
        }

        let Some(current) = self.call("find instance", self.runtime.find(&project.id, &serving), cancel).await? else {
            debug!(project_id = %project.id, "no serving instance to tag");
            return Ok(None);
        };

        self.call("rename instance", self.runtime.rename(&serving, &previous), cancel)
            .await?;
        debug!(project_id = %project.id, running = current.running, "serving instance tagged as previous");
        Ok(Some(Instance {
            name: previous,
            ..current
        }))
    }

    /// Step 5: stop and remove the previous instance. Failures are logged only.
    async fn retire_previous(&self, project: &Project, previous: Option<&Instance>) {
        let Some(previous) = previous else {
            return;
        };
        if let Err(e) = self.cleanup("stop instance", self.runtime.stop(&previous.name)).await {
            debug!(project_id = %project.id, "stop of previous instance failed: {}", e);
        }
        if let Err(e) = self.cleanup("remove instance", self.runtime.remove(&previous.name)).await {
            warn!(project_id = %project.id, "could not remove previous instance: {}", e);
        }
    }

    /// Step 6: remove the new instance and restore the previous one.
    ///
    /// Runs even when the attempt was cancelled, but never starts anything new.
    async fn abort(
        &self,
        project: &Project,
        attempt: u64,
        previous: Option<&Instance>,
    ) -> Result<(), OrchestratorError> {
        let serving = project.instance_name();
        match self.cleanup("find instance", self.runtime.find(&project.id, &serving)).await {
            Ok(Some(_)) => {
                let _ = self.cleanup("stop instance", self.runtime.stop(&serving)).await;
                if let Err(e) = self.cleanup("remove instance", self.runtime.remove(&serving)).await {
                    warn!(project_id = %project.id, attempt, "could not remove new instance: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(project_id = %project.id, attempt, "could not look up new instance: {}", e),
        }

        if previous.is_none() {
            return Ok(());
        }

        let attempts = self.settings.restore_attempts.max(1);
        let mut last_error = String::new();
        for n in 0..attempts {
            if n > 0 {
                tokio::time::sleep(calc_exp_backoff(&self.settings.restore_backoff, n - 1)).await;
            }
            match self.restore_previous(project).await {
                Ok(()) => {
                    info!(project_id = %project.id, attempt, "previous instance restored");
                    return Ok(());
                }
                Err(e) => {
                    warn!(project_id = %project.id, attempt, restore_try = n + 1, "restore failed: {}", e);
                    last_error = e.to_string();
                }
            }
        }

        error!(project_id = %project.id, attempt, "previous instance could not be restored");
        Err(OrchestratorError::RestoreFailed(format!(
            "previous instance not restored after {} tries: {}",
            attempts, last_error
        )))
    }

    /// Remove the image of an artifact that never went live. Failures are logged only.
    async fn discard_artifact(&self, project: &Project, attempt: u64, artifact: &ArtifactRef) {
        match self.cleanup("remove artifact", self.runtime.remove_artifact(artifact)).await {
            Ok(()) => debug!(project_id = %project.id, attempt, artifact = %artifact, "discarded built artifact"),
            Err(e) => warn!(project_id = %project.id, attempt, artifact = %artifact, "could not discard artifact: {}", e),
        }
    }

    /// Idempotent: rename back if still tagged, then make sure it runs
    async fn restore_previous(&self, project: &Project) -> Result<(), OrchestratorError> {
        let serving = project.instance_name();
        let previous = project.previous_instance_name();
        let instances = self
            .cleanup("list instances", self.runtime.list_instances(&project.id))
            .await?;

        if instances.iter().any(|i| i.name == previous) {
            if instances.iter().any(|i| i.name == serving) {
                self.cleanup("remove instance", self.runtime.remove(&serving)).await?;
            }
            self.cleanup("rename instance", self.runtime.rename(&previous, &serving))
                .await?;
        }

        match self.cleanup("find instance", self.runtime.find(&project.id, &serving)).await? {
            Some(instance) if instance.running => Ok(()),
            Some(_) => self.cleanup("resume instance", self.runtime.resume(&serving)).await,
            None => Err(OrchestratorError::RuntimeError(format!(
                "instance {} is gone",
                previous
            ))),
        }
    }

    /// Bound a main-path call by the call timeout and the attempt's cancellation
    async fn call<T, F>(
        &self,
        what: &str,
        fut: F,
        cancel: &CancellationToken,
    ) -> Result<T, OrchestratorError>
    where
        F: Future<Output = Result<T, OrchestratorError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
            res = tokio::time::timeout(self.settings.call_timeout, fut) => {
                res.unwrap_or_else(|_| Err(OrchestratorError::Timeout(what.to_string())))
            }
        }
    }

    /// Bound a cleanup call by the call timeout only
    async fn cleanup<T, F>(&self, what: &str, fut: F) -> Result<T, OrchestratorError>
    where
        F: Future<Output = Result<T, OrchestratorError>>,
    {
        tokio::time::timeout(self.settings.call_timeout, fut)
            .await
            .unwrap_or_else(|_| Err(OrchestratorError::Timeout(what.to_string())))
    }
}

fn start_failure(context: &str, err: OrchestratorError) -> OrchestratorError {
    match err {
        OrchestratorError::Cancelled | OrchestratorError::StartFailed(_) => err,
        other => OrchestratorError::StartFailed(format!("{}: {}", context, other)),
    }
}

fn build_failure(err: OrchestratorError) -> OrchestratorError {
    match err {
        OrchestratorError::Cancelled | OrchestratorError::BuildFailed(_) => err,
        other => OrchestratorError::BuildFailed(other.to_string()),
    }
}
