//! Project records, persisted as one JSON file

use std::collections::BTreeMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::models::project::{Project, AUTO_PORT_MAX, AUTO_PORT_MIN};

/// Project store. Every write is persisted before it returns.
#[derive(Debug)]
pub struct ProjectStore {
    file: Option<File>,
    projects: RwLock<BTreeMap<String, Project>>,
}

impl ProjectStore {
    /// Store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            file: None,
            projects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Load from `file`. A missing file is an empty store.
    pub async fn load(file: File) -> Result<Self, OrchestratorError> {
        let projects: Vec<Project> = if file.exists().await {
            file.read_json().await.map_err(|e| {
                OrchestratorError::StorageError(format!(
                    "could not read {}: {}",
                    file.path().display(),
                    e
                ))
            })?
        } else {
            Vec::new()
        };
        debug!("loaded {} projects from {}", projects.len(), file.path().display());

        Ok(Self {
            file: Some(file),
            projects: RwLock::new(projects.into_iter().map(|p| (p.id.clone(), p)).collect()),
        })
    }

    pub async fn list(&self) -> Vec<Project> {
        self.projects.read().await.values().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<Project> {
        self.projects.read().await.get(id).cloned()
    }

    /// Insert a project. Both its ID and its port must be unused.
    pub async fn insert(&self, project: Project) -> Result<(), OrchestratorError> {
        let mut projects = self.projects.write().await;
        if projects.contains_key(&project.id) {
            return Err(OrchestratorError::ProjectExists(project.id));
        }
        if let Some(owner) = port_owner(&projects, project.port) {
            return Err(OrchestratorError::PortInUse {
                port: project.port,
                project_id: owner.to_string(),
            });
        }
        projects.insert(project.id.clone(), project);
        self.persist(&projects).await
    }

    /// Insert a project whose port was picked automatically.
    ///
    /// Starting at the project's port, walks the automatic range (wrapping
    /// around) until a port no other project holds is found.
    pub async fn insert_with_free_port(&self, mut project: Project) -> Result<Project, OrchestratorError> {
        let mut projects = self.projects.write().await;
        if projects.contains_key(&project.id) {
            return Err(OrchestratorError::ProjectExists(project.id));
        }

        let start = project.port.clamp(AUTO_PORT_MIN, AUTO_PORT_MAX);
        let span = AUTO_PORT_MAX - AUTO_PORT_MIN + 1;
        let free = (0..span)
            .map(|offset| AUTO_PORT_MIN + (start - AUTO_PORT_MIN + offset) % span)
            .find(|port| port_owner(&projects, *port).is_none())
            .ok_or_else(|| {
                OrchestratorError::ValidationError(format!(
                    "no free port left in {}..={}",
                    AUTO_PORT_MIN, AUTO_PORT_MAX
                ))
            })?;
        if free != project.port {
            debug!(project_id = %project.id, wanted = project.port, port = free, "port taken, picked another");
        }
        project.port = free;

        projects.insert(project.id.clone(), project.clone());
        self.persist(&projects).await?;
        Ok(project)
    }

    /// Apply `f` to a project and persist. Returns the updated record.
    pub async fn update<F>(&self, id: &str, f: F) -> Result<Project, OrchestratorError>
    where
        F: FnOnce(&mut Project),
    {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::ProjectNotFound(id.to_string()))?;
        f(project);
        let updated = project.clone();
        self.persist(&projects).await?;
        Ok(updated)
    }

    pub async fn remove(&self, id: &str) -> Result<Project, OrchestratorError> {
        let mut projects = self.projects.write().await;
        let removed = projects
            .remove(id)
            .ok_or_else(|| OrchestratorError::ProjectNotFound(id.to_string()))?;
        self.persist(&projects).await?;
        Ok(removed)
    }

    async fn persist(&self, projects: &BTreeMap<String, Project>) -> Result<(), OrchestratorError> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let records: Vec<&Project> = projects.values().collect();
        file.write_json(&records).await.map_err(|e| {
            OrchestratorError::StorageError(format!("could not write {}: {}", file.path().display(), e))
        })
    }
}

fn port_owner(projects: &BTreeMap<String, Project>, port: u16) -> Option<&str> {
    projects.values().find(|p| p.port == port).map(|p| p.id.as_str())
}
