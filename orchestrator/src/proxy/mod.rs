//! Reverse proxy and certificate provisioning boundary

use async_trait::async_trait;
use tracing::info;

use crate::errors::OrchestratorError;

/// Routes a public domain to a project port. Called only on domain changes
/// and project deletion, never during a deploy.
#[async_trait]
pub trait ProxyProvisioner: Send + Sync {
    async fn provision(&self, domain: &str, port: u16, tls: bool) -> Result<(), OrchestratorError>;

    async fn deprovision(&self, domain: &str) -> Result<(), OrchestratorError>;
}

/// Provisioner for hosts where routing is managed outside Dockyard
#[derive(Debug, Clone, Default)]
pub struct LoggingProxy;

#[async_trait]
impl ProxyProvisioner for LoggingProxy {
    async fn provision(&self, domain: &str, port: u16, tls: bool) -> Result<(), OrchestratorError> {
        info!(domain, port, tls, "route requested");
        Ok(())
    }

    async fn deprovision(&self, domain: &str) -> Result<(), OrchestratorError> {
        info!(domain, "route removal requested");
        Ok(())
    }
}
