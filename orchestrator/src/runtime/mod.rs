//! Container runtime abstraction

pub mod docker;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::build::ArtifactRef;
use crate::errors::OrchestratorError;

/// Label every managed instance carries, valued with the project ID
pub const PROJECT_LABEL: &str = "dockyard.project";

/// A running or stopped instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
}

/// How to start a new instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartSpec {
    pub name: String,
    pub project_id: String,
    pub artifact: ArtifactRef,
    pub port: u16,
    pub env: BTreeMap<String, String>,
}

/// Resource usage of an instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceStats {
    pub cpu_percent: f64,
    pub memory_usage: String,
    pub memory_percent: f64,
    pub net_io: String,
    pub block_io: String,
}

/// Operations the orchestrator needs from a container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Instances labelled with the project
    async fn list_instances(&self, project_id: &str) -> Result<Vec<Instance>, OrchestratorError>;

    /// Look up an instance by name
    async fn find(&self, project_id: &str, name: &str) -> Result<Option<Instance>, OrchestratorError> {
        Ok(self
            .list_instances(project_id)
            .await?
            .into_iter()
            .find(|i| i.name == name))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), OrchestratorError>;

    /// Create and start a new instance
    async fn start(&self, spec: &StartSpec) -> Result<Instance, OrchestratorError>;

    /// Start an existing stopped instance
    async fn resume(&self, name: &str) -> Result<(), OrchestratorError>;

    async fn stop(&self, name: &str) -> Result<(), OrchestratorError>;

    async fn remove(&self, name: &str) -> Result<(), OrchestratorError>;

    /// Last `tail` lines of output
    async fn logs(&self, name: &str, tail: usize) -> Result<String, OrchestratorError>;

    async fn stats(&self, name: &str) -> Result<InstanceStats, OrchestratorError>;

    /// Delete an artifact's image from local storage
    async fn remove_artifact(&self, artifact: &ArtifactRef) -> Result<(), OrchestratorError>;
}
