//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::deploy::orchestrator::Orchestrator;
use crate::errors::OrchestratorError;
use crate::server::serve::serve;
use crate::server::state::ServerState;

/// Run the orchestrator until `shutdown_signal` resolves
pub async fn run(
    version: String,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), OrchestratorError> {
    info!("Initializing Dockyard {}...", version);

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(version, &options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start orchestrator: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    version: String,
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), OrchestratorError> {
    let app_state = AppState::init(options).await?;
    shutdown_manager.with_orchestrator(app_state.orchestrator.clone())?;

    init_server(version, options, &app_state, shutdown_manager, shutdown_tx.subscribe()).await
}

async fn init_server(
    version: String,
    options: &AppOptions,
    app_state: &AppState,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), OrchestratorError> {
    info!("Initializing HTTP server...");

    let server_state = ServerState::new(app_state.orchestrator.clone(), version, app_state.started_at);
    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    orchestrator: Option<Arc<Orchestrator>>,
    server_handle: Option<JoinHandle<Result<(), OrchestratorError>>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            orchestrator: None,
            server_handle: None,
        }
    }

    fn with_orchestrator(&mut self, orchestrator: Arc<Orchestrator>) -> Result<(), OrchestratorError> {
        if self.orchestrator.is_some() {
            return Err(OrchestratorError::ShutdownError("orchestrator already set".to_string()));
        }
        self.orchestrator = Some(orchestrator);
        Ok(())
    }

    fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), OrchestratorError>>,
    ) -> Result<(), OrchestratorError> {
        if self.server_handle.is_some() {
            return Err(OrchestratorError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), OrchestratorError> {
        let _ = self.shutdown_tx.send(());

        let max_delay = self.lifecycle_options.max_shutdown_delay;
        match tokio::time::timeout(max_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Shutdown timed out after {:?}, forcing shutdown...", max_delay);
                Err(OrchestratorError::ShutdownError(format!(
                    "shutdown timed out after {:?}",
                    max_delay
                )))
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), OrchestratorError> {
        info!("Shutting down Dockyard...");

        // 1. Stop accepting requests
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| OrchestratorError::ShutdownError(e.to_string()))??;
        }

        // 2. Cancel in-flight attempts and let them clean up
        if let Some(orchestrator) = self.orchestrator.take() {
            orchestrator.shutdown(self.lifecycle_options.max_shutdown_delay).await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
