//! Local build system: git checkout plus `docker build`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::build::{BuildId, BuildRequest, BuildStatus, BuildSystem};
use crate::errors::OrchestratorError;

#[derive(Debug)]
struct LocalBuild {
    status: BuildStatus,
    cancel: CancellationToken,
}

/// Builds images on this host
#[derive(Debug, Clone)]
pub struct LocalBuilder {
    /// Checkouts live under `<workspace>/<project_id>`
    workspace: PathBuf,
    builds: Arc<RwLock<HashMap<BuildId, LocalBuild>>>,

    /// One build at a time may touch a project's checkout
    checkouts: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl LocalBuilder {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            builds: Arc::new(RwLock::new(HashMap::new())),
            checkouts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn checkout_lock(&self, project_id: &str) -> Arc<Mutex<()>> {
        self.checkouts
            .lock()
            .await
            .entry(project_id.to_string())
            .or_default()
            .clone()
    }

    async fn run(workspace: PathBuf, request: BuildRequest) -> BuildStatus {
        let checkout = workspace.join(&request.project_id);
        if let Err(e) = sync_repository(&request.repo_url, &request.branch, &checkout).await {
            return BuildStatus::Failed(e.to_string());
        }
        let artifact = request.artifact();
        match docker_build(&checkout, &artifact.image).await {
            Ok(()) => BuildStatus::Succeeded(artifact),
            Err(e) => BuildStatus::Failed(e.to_string()),
        }
    }
}

#[async_trait]
impl BuildSystem for LocalBuilder {
    async fn submit(&self, request: BuildRequest) -> Result<BuildId, OrchestratorError> {
        let id = BuildId(format!("{}-{}", request.project_id, request.tag));
        let cancel = CancellationToken::new();
        self.builds.write().await.insert(
            id.clone(),
            LocalBuild {
                status: BuildStatus::Running,
                cancel: cancel.clone(),
            },
        );

        info!(project_id = %request.project_id, build_id = %id, "build submitted");

        let builds = self.builds.clone();
        let workspace = self.workspace.clone();
        let checkout = self.checkout_lock(&request.project_id).await;
        let build_id = id.clone();
        tokio::spawn(async move {
            // dropping the build future kills its child processes
            let status = tokio::select! {
                _ = cancel.cancelled() => BuildStatus::Failed("build cancelled".to_string()),
                status = async {
                    let _checkout = checkout.lock().await;
                    Self::run(workspace, request).await
                } => status,
            };
            match &status {
                BuildStatus::Failed(reason) => error!(build_id = %build_id, "build failed: {}", reason),
                _ => info!(build_id = %build_id, "build finished"),
            }
            if let Some(build) = builds.write().await.get_mut(&build_id) {
                build.status = status;
            }
        });

        Ok(id)
    }

    async fn status(&self, build: &BuildId) -> Result<BuildStatus, OrchestratorError> {
        let mut builds = self.builds.write().await;
        let status = builds
            .get(build)
            .map(|b| b.status.clone())
            .ok_or_else(|| OrchestratorError::BuildFailed(format!("unknown build {}", build)))?;
        if status != BuildStatus::Running {
            builds.remove(build);
        }
        Ok(status)
    }

    async fn cancel(&self, build: &BuildId) -> Result<(), OrchestratorError> {
        if let Some(entry) = self.builds.write().await.remove(build) {
            if entry.status == BuildStatus::Running {
                warn!(build_id = %build, "cancelling build");
            }
            entry.cancel.cancel();
        }
        Ok(())
    }
}

/// Clone the repository, or fetch and hard-reset an existing checkout
pub async fn sync_repository(
    repo_url: &str,
    branch: &str,
    target_dir: &Path,
) -> Result<(), OrchestratorError> {
    info!("Syncing Git repository: {} (branch: {}) to {}", repo_url, branch, target_dir.display());

    if target_dir.join(".git").exists() {
        debug!("Checkout exists, fetching updates...");
        git(Some(target_dir), &["fetch", "origin", branch]).await?;
        git(Some(target_dir), &["reset", "--hard", &format!("origin/{}", branch)]).await?;
    } else {
        if let Some(parent) = target_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let target = target_dir.to_string_lossy();
        git(None, &["clone", "--depth", "1", "-b", branch, repo_url, &target]).await?;
    }

    debug!("Repository synced");
    Ok(())
}

async fn git(cwd: Option<&Path>, args: &[&str]) -> Result<(), OrchestratorError> {
    let mut cmd = Command::new("git");
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| OrchestratorError::BuildFailed(format!("Failed to run git {}: {}", args[0], e)))?;

    if !output.status.success() {
        return Err(OrchestratorError::BuildFailed(format!(
            "git {} failed: {}",
            args[0],
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

async fn docker_build(context: &Path, image: &str) -> Result<(), OrchestratorError> {
    debug!("Building image {} from {}", image, context.display());
    let output = Command::new("docker")
        .current_dir(context)
        .args(["build", "-t", image, "."])
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| OrchestratorError::BuildFailed(format!("Failed to run docker build: {}", e)))?;

    if !output.status.success() {
        return Err(OrchestratorError::BuildFailed(format!(
            "docker build failed for {}: {}",
            image,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
