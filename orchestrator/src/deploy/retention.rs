//! Version retention
//!
//! Snapshots are taken only after a confirmed healthy deploy and at most
//! `max_snapshots` per project are kept, newest first. All operations on one
//! project are serialized by a per-project lock. With a runtime attached, the
//! images of pruned snapshots are deleted once no kept snapshot refers to them.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::build::ArtifactRef;
use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::models::project::Project;
use crate::models::snapshot::{LabelClock, Snapshot, VersionLabel};
use crate::runtime::ContainerRuntime;

/// Default number of snapshots kept per project
pub const DEFAULT_MAX_SNAPSHOTS: usize = 5;

/// Where snapshot manifests live
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Location a snapshot with this label will be stored at
    fn location(&self, project_id: &str, version: &VersionLabel) -> PathBuf;

    async fn put(&self, snapshot: &Snapshot) -> Result<(), OrchestratorError>;

    /// All snapshots of a project, in no particular order
    async fn list(&self, project_id: &str) -> Result<Vec<Snapshot>, OrchestratorError>;

    async fn delete(&self, project_id: &str, version: &VersionLabel) -> Result<(), OrchestratorError>;

    /// Remove every snapshot of a project
    async fn purge(&self, project_id: &str) -> Result<(), OrchestratorError>;
}

/// JSON manifest per snapshot under `<root>/<project_id>/<label>.json`
#[derive(Debug, Clone)]
pub struct FsSnapshotStore {
    root: Dir,
}

impl FsSnapshotStore {
    pub fn new(root: Dir) -> Self {
        Self { root }
    }

    fn manifest_name(version: &VersionLabel) -> String {
        format!("{}.json", version)
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    fn location(&self, project_id: &str, version: &VersionLabel) -> PathBuf {
        self.root
            .subdir(project_id)
            .file(&Self::manifest_name(version))
            .path()
            .to_path_buf()
    }

    async fn put(&self, snapshot: &Snapshot) -> Result<(), OrchestratorError> {
        self.root
            .subdir(&snapshot.project_id)
            .file(&Self::manifest_name(&snapshot.version))
            .write_json(snapshot)
            .await
    }

    async fn list(&self, project_id: &str) -> Result<Vec<Snapshot>, OrchestratorError> {
        let dir = self.root.subdir(project_id);
        let mut snapshots = Vec::new();
        for path in dir.list_files().await? {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match crate::filesys::file::File::new(&path).read_json::<Snapshot>().await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!(project_id, path = %path.display(), "skipping unreadable snapshot: {}", e),
            }
        }
        Ok(snapshots)
    }

    async fn delete(&self, project_id: &str, version: &VersionLabel) -> Result<(), OrchestratorError> {
        self.root
            .subdir(project_id)
            .file(&Self::manifest_name(version))
            .delete()
            .await
    }

    async fn purge(&self, project_id: &str) -> Result<(), OrchestratorError> {
        self.root.subdir(project_id).delete().await
    }
}

/// Version retention manager
pub struct RetentionManager {
    store: Arc<dyn SnapshotStore>,
    max_snapshots: usize,
    clock: LabelClock,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    artifacts: Option<Arc<dyn ContainerRuntime>>,
}

impl RetentionManager {
    /// `max_snapshots` below one is raised to one
    pub fn new(store: Arc<dyn SnapshotStore>, max_snapshots: usize) -> Self {
        Self {
            store,
            max_snapshots: max_snapshots.max(1),
            clock: LabelClock::new(),
            locks: Mutex::new(HashMap::new()),
            artifacts: None,
        }
    }

    /// Delete the images of snapshots that are pruned or purged
    pub fn with_artifact_cleanup(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.artifacts = Some(runtime);
        self
    }

    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots
    }

    async fn lock_for(&self, project_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(project_id.to_string())
            .or_default()
            .clone()
    }

    /// Record the serving artifact of a confirmed deploy.
    ///
    /// The label is strictly later than `deployed_at` and than every label
    /// already stored for the project.
    pub async fn snapshot(
        &self,
        project: &Project,
        artifact: &ArtifactRef,
        deployed_at: DateTime<Utc>,
    ) -> Result<Snapshot, OrchestratorError> {
        let lock = self.lock_for(&project.id).await;
        let _guard = lock.lock().await;

        let newest = self
            .sorted(&project.id)
            .await?
            .last()
            .map(|s| s.version.timestamp());
        let floor = newest.map_or(deployed_at, |newest| newest.max(deployed_at));
        let version = self.clock.next_after(floor);
        let snapshot = Snapshot {
            project_id: project.id.clone(),
            location: self.store.location(&project.id, &version),
            version,
            artifact: artifact.clone(),
            port: project.port,
            env: project.env.clone(),
        };
        self.store.put(&snapshot).await?;
        info!(project_id = %project.id, version = %snapshot.version, artifact = %artifact, "snapshot taken");
        Ok(snapshot)
    }

    /// Delete the oldest snapshots beyond the limit. Returns how many were deleted.
    ///
    /// Deletion failures are logged and skipped; they never fail the caller.
    pub async fn prune(&self, project_id: &str) -> usize {
        let lock = self.lock_for(project_id).await;
        let _guard = lock.lock().await;

        let snapshots = match self.sorted(project_id).await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!(project_id, "could not list snapshots for pruning: {}", e);
                return 0;
            }
        };

        let excess = snapshots.len().saturating_sub(self.max_snapshots);
        let (pruned, kept) = snapshots.split_at(excess);
        let in_use: HashSet<&ArtifactRef> = kept.iter().map(|s| &s.artifact).collect();

        let mut deleted = 0;
        for snapshot in pruned {
            match self.store.delete(project_id, &snapshot.version).await {
                Ok(()) => {
                    debug!(project_id, version = %snapshot.version, "snapshot pruned");
                    deleted += 1;
                    if !in_use.contains(&snapshot.artifact) {
                        self.remove_artifact(project_id, &snapshot.artifact).await;
                    }
                }
                Err(e) => warn!(project_id, version = %snapshot.version, "could not prune snapshot: {}", e),
            }
        }
        deleted
    }

    async fn remove_artifact(&self, project_id: &str, artifact: &ArtifactRef) {
        let Some(runtime) = &self.artifacts else {
            return;
        };
        match runtime.remove_artifact(artifact).await {
            Ok(()) => debug!(project_id, artifact = %artifact, "artifact removed"),
            Err(e) => warn!(project_id, artifact = %artifact, "could not remove artifact: {}", e),
        }
    }

    /// Deployment history, oldest first
    pub async fn list(&self, project_id: &str) -> Result<Vec<Snapshot>, OrchestratorError> {
        let lock = self.lock_for(project_id).await;
        let _guard = lock.lock().await;
        self.sorted(project_id).await
    }

    pub async fn find(
        &self,
        project_id: &str,
        version: &VersionLabel,
    ) -> Result<Snapshot, OrchestratorError> {
        self.list(project_id)
            .await?
            .into_iter()
            .find(|s| &s.version == version)
            .ok_or_else(|| OrchestratorError::SnapshotNotFound {
                project_id: project_id.to_string(),
                version: version.to_string(),
            })
    }

    /// Newest snapshot taken strictly before `instant`
    pub async fn latest_before(
        &self,
        project_id: &str,
        instant: DateTime<Utc>,
    ) -> Result<Option<Snapshot>, OrchestratorError> {
        Ok(self
            .list(project_id)
            .await?
            .into_iter()
            .rev()
            .find(|s| s.version.timestamp() < instant))
    }

    /// Remove every snapshot of a deleted project
    pub async fn purge(&self, project_id: &str) -> Result<(), OrchestratorError> {
        let lock = self.lock_for(project_id).await;
        {
            let _guard = lock.lock().await;
            let artifacts: HashSet<ArtifactRef> = match self.sorted(project_id).await {
                Ok(snapshots) => snapshots.into_iter().map(|s| s.artifact).collect(),
                Err(e) => {
                    warn!(project_id, "could not list snapshots before purge: {}", e);
                    HashSet::new()
                }
            };
            self.store.purge(project_id).await?;
            for artifact in &artifacts {
                self.remove_artifact(project_id, artifact).await;
            }
        }
        self.locks.lock().await.remove(project_id);
        info!(project_id, "snapshots purged");
        Ok(())
    }

    async fn sorted(&self, project_id: &str) -> Result<Vec<Snapshot>, OrchestratorError> {
        let mut snapshots = self.store.list(project_id).await?;
        snapshots.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(snapshots)
    }
}
