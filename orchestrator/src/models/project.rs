//! Project models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::ProjectStatus;
use crate::errors::OrchestratorError;
use crate::models::snapshot::VersionLabel;

/// Lowest port handed out when a project does not ask for one
pub const AUTO_PORT_MIN: u16 = 3000;

/// Highest port handed out when a project does not ask for one
pub const AUTO_PORT_MAX: u16 = 9000;

/// A deployable project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique project ID
    pub id: String,

    /// Display name
    pub name: String,

    /// Source repository URL
    pub repo_url: String,

    /// Tracked branch
    pub branch: String,

    /// Port the application listens on
    pub port: u16,

    /// Environment passed to every instance
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Public domain routed through the reverse proxy
    #[serde(default)]
    pub domain: Option<String>,

    /// Request a certificate for the domain
    #[serde(default)]
    pub tls: bool,

    /// Lifecycle status
    #[serde(default)]
    pub status: ProjectStatus,

    /// Last time an instance became healthy
    #[serde(default)]
    pub last_deployed_at: Option<DateTime<Utc>>,

    /// Snapshot label of the serving version, when it has one
    #[serde(default)]
    pub serving_version: Option<VersionLabel>,

    /// Last attempt sequence number handed out
    #[serde(default)]
    pub last_attempt: u64,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Name of the instance currently serving traffic
    pub fn instance_name(&self) -> String {
        format!("dockyard-{}", self.id)
    }

    /// Name the serving instance is tagged with during a swap
    pub fn previous_instance_name(&self) -> String {
        format!("dockyard-{}-previous", self.id)
    }

    /// Image repository used for this project's builds
    pub fn image_repository(&self) -> String {
        format!("dockyard/{}", self.id.to_lowercase())
    }
}

/// Registration request for a new project
#[derive(Debug, Clone, Deserialize)]
pub struct NewProject {
    /// Optional explicit ID; a UUID is generated otherwise
    #[serde(default)]
    pub id: Option<String>,

    pub name: String,

    pub repo_url: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Optional explicit port; one is picked in 3000..=9000 otherwise
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub tls: bool,
}

/// Partial update of a project's settings. Absent fields stay unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectUpdate {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub repo_url: Option<String>,

    #[serde(default)]
    pub branch: Option<String>,

    /// Replaces the whole environment
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
}

impl ProjectUpdate {
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let blank = |v: &Option<String>| v.as_deref().is_some_and(|v| v.trim().is_empty());
        if blank(&self.name) {
            return Err(OrchestratorError::ValidationError("name must not be empty".to_string()));
        }
        if blank(&self.repo_url) {
            return Err(OrchestratorError::ValidationError("repo_url must not be empty".to_string()));
        }
        if blank(&self.branch) {
            return Err(OrchestratorError::ValidationError("branch must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn apply(self, project: &mut Project) {
        if let Some(name) = self.name {
            project.name = name;
        }
        if let Some(repo_url) = self.repo_url {
            project.repo_url = repo_url;
        }
        if let Some(branch) = self.branch {
            project.branch = branch;
        }
        if let Some(env) = self.env {
            project.env = env;
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}

impl NewProject {
    /// Validate and turn the request into a project record
    pub fn into_project(self) -> Result<Project, OrchestratorError> {
        if self.name.trim().is_empty() {
            return Err(OrchestratorError::ValidationError("name is required".to_string()));
        }
        if self.repo_url.trim().is_empty() {
            return Err(OrchestratorError::ValidationError("repo_url is required".to_string()));
        }
        if self.branch.trim().is_empty() {
            return Err(OrchestratorError::ValidationError("branch must not be empty".to_string()));
        }
        if self.port == Some(0) {
            return Err(OrchestratorError::ValidationError("port must be non-zero".to_string()));
        }

        let id = self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(OrchestratorError::ValidationError(format!("invalid project id: {}", id)));
        }

        Ok(Project {
            port: self.port.unwrap_or_else(auto_port),
            id,
            name: self.name,
            repo_url: self.repo_url,
            branch: self.branch,
            env: self.env,
            domain: self.domain.filter(|d| !d.is_empty()),
            tls: self.tls,
            status: ProjectStatus::default(),
            last_deployed_at: None,
            serving_version: None,
            last_attempt: 0,
            created_at: Utc::now(),
        })
    }
}

fn auto_port() -> u16 {
    let span = u128::from(AUTO_PORT_MAX - AUTO_PORT_MIN) + 1;
    AUTO_PORT_MIN + (uuid::Uuid::new_v4().as_u128() % span) as u16
}
