//! Application configuration options

use std::time::Duration;

use crate::deploy::health::HealthGateOptions;
use crate::deploy::orchestrator::OrchestratorOptions;
use crate::deploy::swap::SwapSettings;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Server configuration
    pub server: ServerOptions,

    /// Adapter configuration
    pub adapters: AdapterOptions,

    /// Orchestrator configuration
    pub orchestrator: OrchestratorOptions,
}

impl AppOptions {
    /// Derive every component's options from the settings file
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let swap = SwapSettings {
            health: HealthGateOptions {
                interval: Duration::from_secs(settings.health.interval_secs),
                max_attempts: settings.health.max_attempts,
                probe_timeout: Duration::from_secs(settings.health.probe_timeout_secs),
            },
            build_poll_interval: Duration::from_secs(settings.build.poll_interval_secs),
            build_timeout: Duration::from_secs(settings.build.timeout_secs),
            call_timeout: Duration::from_secs(settings.call_timeout_secs),
            restore_attempts: settings.restore_attempts,
            ..Default::default()
        };

        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(settings.max_shutdown_delay_secs),
            },
            layout,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            adapters: AdapterOptions {
                docker_binary: settings.docker_binary.clone(),
                probe_host: settings.health.host.clone(),
                probe_path: settings.health.path.clone(),
                alert_webhook_url: settings.alert_webhook_url.clone(),
            },
            orchestrator: OrchestratorOptions {
                swap,
                max_snapshots: settings.max_snapshots,
                webhook_secret: settings.webhook_secret.clone(),
                build_webhook_secret: settings.build_webhook_secret.clone(),
                allow_unsigned_build_reports: settings.build.allow_unsigned_reports,
                ..Default::default()
            },
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8420,
        }
    }
}

/// Options for the host adapters behind the orchestrator's traits
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    pub docker_binary: String,

    /// Host the health probe connects to
    pub probe_host: String,

    pub probe_path: String,

    /// Alerts are only logged when unset
    pub alert_webhook_url: Option<String>,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
            probe_host: "127.0.0.1".to_string(),
            probe_path: "/health".to_string(),
            alert_webhook_url: None,
        }
    }
}
