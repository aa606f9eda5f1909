//! Build system abstraction
//!
//! A build turns a project's tracked branch into a runnable artifact. The
//! orchestrator only submits builds and polls them; how the artifact is
//! produced is up to the implementation.

pub mod local;
pub mod reports;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

/// Reference to a runnable artifact (a container image)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub image: String,
}

impl ArtifactRef {
    pub fn new(image: impl Into<String>) -> Self {
        Self { image: image.into() }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.image)
    }
}

/// Identifier handed back by the build system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(pub String);

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What to build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub project_id: String,
    pub repo_url: String,
    pub branch: String,

    /// Image repository, e.g. `dockyard/web`
    pub image: String,

    /// Image tag unique to the attempt
    pub tag: String,
}

impl BuildRequest {
    /// Artifact the build is expected to produce
    pub fn artifact(&self) -> ArtifactRef {
        ArtifactRef::new(format!("{}:{}", self.image, self.tag))
    }
}

/// Build progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    Running,
    Succeeded(ArtifactRef),
    Failed(String),
}

/// A system that builds artifacts
#[async_trait]
pub trait BuildSystem: Send + Sync {
    /// Start a build and return immediately
    async fn submit(&self, request: BuildRequest) -> Result<BuildId, OrchestratorError>;

    /// Current status of a submitted build. Once a final status has been
    /// read the build may be forgotten.
    async fn status(&self, build: &BuildId) -> Result<BuildStatus, OrchestratorError>;

    /// Stop a build nobody waits for anymore. Unknown builds are ignored.
    async fn cancel(&self, build: &BuildId) -> Result<(), OrchestratorError>;
}
