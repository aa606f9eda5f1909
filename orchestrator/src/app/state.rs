//! Application state management

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::alert::{AlertSink, LogAlert, WebhookAlert};
use crate::app::options::AppOptions;
use crate::build::local::LocalBuilder;
use crate::deploy::health::HttpHealthProbe;
use crate::deploy::orchestrator::{Collaborators, Orchestrator};
use crate::deploy::retention::FsSnapshotStore;
use crate::errors::OrchestratorError;
use crate::proxy::LoggingProxy;
use crate::runtime::docker::DockerCli;
use crate::store::projects::ProjectStore;

/// Main application state
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,

    pub started_at: Instant,
}

impl AppState {
    /// Prepare the data directory, wire the host adapters and start the orchestrator
    pub async fn init(options: &AppOptions) -> Result<Self, OrchestratorError> {
        let layout = &options.layout;
        layout.setup().await?;

        let store = ProjectStore::load(layout.projects_file()).await?;
        info!("Loaded {} project(s)", store.list().await.len());

        let deps = Collaborators {
            store: Arc::new(store),
            runtime: Arc::new(DockerCli::new(options.adapters.docker_binary.clone())),
            builder: Arc::new(LocalBuilder::new(layout.workspace_dir().path())),
            probe: Arc::new(HttpHealthProbe::new(
                options.adapters.probe_host.clone(),
                options.adapters.probe_path.clone(),
            )),
            snapshots: Arc::new(FsSnapshotStore::new(layout.snapshots_dir())),
            proxy: Arc::new(LoggingProxy),
            alerts: alert_sink(options.adapters.alert_webhook_url.as_deref()),
        };

        let orchestrator = Orchestrator::start(deps, options.orchestrator.clone()).await?;
        Ok(Self {
            orchestrator,
            started_at: Instant::now(),
        })
    }
}

fn alert_sink(url: Option<&str>) -> Arc<dyn AlertSink> {
    let Some(raw) = url else {
        return Arc::new(LogAlert);
    };
    match url::Url::parse(raw) {
        Ok(url) => Arc::new(WebhookAlert::new(reqwest::Client::new(), url)),
        Err(e) => {
            warn!("Ignoring invalid alert webhook url {}: {}", raw, e);
            Arc::new(LogAlert)
        }
    }
}
