//! Rollback coordinator

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::deploy::retention::RetentionManager;
use crate::deploy::swap::{ArtifactSource, SwapController, Unobserved};
use crate::errors::OrchestratorError;
use crate::models::project::Project;
use crate::models::snapshot::{Snapshot, VersionLabel};

/// Restores a retained snapshot through the swap controller
#[derive(Clone)]
pub struct RollbackCoordinator {
    retention: Arc<RetentionManager>,
    swap: SwapController,
}

impl RollbackCoordinator {
    pub fn new(retention: Arc<RetentionManager>, swap: SwapController) -> Self {
        Self { retention, swap }
    }

    /// Pick the snapshot to restore.
    ///
    /// With a target, that exact snapshot. Without one, the newest snapshot
    /// strictly older than `before`.
    pub async fn select(
        &self,
        project_id: &str,
        target: Option<&VersionLabel>,
        before: DateTime<Utc>,
    ) -> Result<Snapshot, OrchestratorError> {
        match target {
            Some(version) => self.retention.find(project_id, version).await,
            None => self
                .retention
                .latest_before(project_id, before)
                .await?
                .ok_or_else(|| OrchestratorError::NoSnapshotAvailable(project_id.to_string())),
        }
    }

    /// Restore a snapshot and confirm it through the health gate.
    ///
    /// `NoSnapshotAvailable` and `SnapshotNotFound` are returned before anything
    /// is touched. Any failure after that is `RestoreFailed`, except cancellation.
    pub async fn rollback(
        &self,
        project: &Project,
        attempt: u64,
        target: Option<&VersionLabel>,
        before: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Snapshot, OrchestratorError> {
        let snapshot = self.select(&project.id, target, before).await?;
        info!(
            project_id = %project.id,
            attempt,
            version = %snapshot.version,
            artifact = %snapshot.artifact,
            "rolling back"
        );

        // snapshot carries the port and env it was serving with
        let restored = Project {
            port: snapshot.port,
            env: snapshot.env.clone(),
            ..project.clone()
        };
        let source = ArtifactSource::Existing(snapshot.artifact.clone());

        match self
            .swap
            .run_attempt(&restored, attempt, source, &Unobserved, cancel)
            .await
        {
            Ok(_) => {
                info!(project_id = %project.id, attempt, version = %snapshot.version, "rollback confirmed healthy");
                Ok(snapshot)
            }
            Err(OrchestratorError::Cancelled) => Err(OrchestratorError::Cancelled),
            Err(OrchestratorError::RestoreFailed(reason)) => {
                error!(project_id = %project.id, attempt, "rollback failed: {}", reason);
                Err(OrchestratorError::RestoreFailed(reason))
            }
            Err(e) => {
                error!(project_id = %project.id, attempt, "rollback failed: {}", e);
                Err(OrchestratorError::RestoreFailed(format!(
                    "snapshot {} did not come up: {}",
                    snapshot.version, e
                )))
            }
        }
    }
}
