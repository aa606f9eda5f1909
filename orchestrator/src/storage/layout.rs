//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for the orchestrator
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the project records file
    pub fn projects_file(&self) -> File {
        File::new(self.base_dir.join("projects.json"))
    }

    /// Get the snapshot manifests directory
    pub fn snapshots_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("snapshots"))
    }

    /// Get the build checkouts directory
    pub fn workspace_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("workspace"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), OrchestratorError> {
        self.snapshots_dir().create().await?;
        self.workspace_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("/var/lib/dockyard")
    }
}
