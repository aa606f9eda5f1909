//! Settings file management

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info};

use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Environment variable overriding `webhook_secret`
pub const WEBHOOK_SECRET_ENV: &str = "DOCKYARD_WEBHOOK_SECRET";

/// Environment variable overriding `build_webhook_secret`
pub const BUILD_WEBHOOK_SECRET_ENV: &str = "DOCKYARD_BUILD_WEBHOOK_SECRET";

/// Orchestrator settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// JSON log lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily log files under the data directory
    #[serde(default = "default_true")]
    pub log_to_file: bool,

    /// HTTP server
    #[serde(default)]
    pub server: ServerSettings,

    /// Shared secret for source-control webhooks
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub webhook_secret: Option<SecretString>,

    /// Shared secret for build-system webhooks
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub build_webhook_secret: Option<SecretString>,

    /// Endpoint receiving JSON alerts for failures that need an operator
    #[serde(default)]
    pub alert_webhook_url: Option<String>,

    /// Snapshots kept per project
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,

    /// Health gate
    #[serde(default)]
    pub health: HealthSettings,

    /// Build polling
    #[serde(default)]
    pub build: BuildSettings,

    /// Upper bound for a single runtime or build call, in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Restore tries before an attempt is declared `RestoreFailed`
    #[serde(default = "default_restore_attempts")]
    pub restore_attempts: u32,

    /// Docker CLI binary
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,

    /// Maximum graceful shutdown delay, in seconds
    #[serde(default = "default_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_snapshots() -> usize {
    5
}

fn default_call_timeout() -> u64 {
    60
}

fn default_restore_attempts() -> u32 {
    3
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_shutdown_delay() -> u64 {
    30
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(SecretString::from))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: true,
            server: ServerSettings::default(),
            webhook_secret: None,
            build_webhook_secret: None,
            alert_webhook_url: None,
            max_snapshots: default_max_snapshots(),
            health: HealthSettings::default(),
            build: BuildSettings::default(),
            call_timeout_secs: default_call_timeout(),
            restore_attempts: default_restore_attempts(),
            docker_binary: default_docker_binary(),
            max_shutdown_delay_secs: default_shutdown_delay(),
        }
    }
}

impl Settings {
    /// Read settings from `file`, falling back to defaults when it is missing,
    /// then apply environment overrides
    pub async fn load(file: &File) -> Result<Self, OrchestratorError> {
        let mut settings = if file.exists().await {
            info!("Loading settings from {}", file.path().display());
            file.read_json::<Settings>().await.map_err(|e| {
                OrchestratorError::ConfigError(format!("invalid settings file {}: {}", file.path().display(), e))
            })?
        } else {
            debug!("No settings file at {}, using defaults", file.path().display());
            Settings::default()
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Override secrets from the environment
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup(WEBHOOK_SECRET_ENV).filter(|s| !s.is_empty()) {
            self.webhook_secret = Some(SecretString::from(secret));
        }
        if let Some(secret) = lookup(BUILD_WEBHOOK_SECRET_ENV).filter(|s| !s.is_empty()) {
            self.build_webhook_secret = Some(SecretString::from(secret));
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8420
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Health gate settings
#[derive(Debug, Clone, Deserialize)]
pub struct HealthSettings {
    /// Seconds between probes
    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,

    /// Probe ceiling
    #[serde(default = "default_probe_attempts")]
    pub max_attempts: u32,

    /// Timeout of a single probe, in seconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Host the instances are reachable on
    #[serde(default = "default_probe_host")]
    pub host: String,

    #[serde(default = "default_probe_path")]
    pub path: String,
}

fn default_probe_interval() -> u64 {
    2
}

fn default_probe_attempts() -> u32 {
    30
}

fn default_probe_timeout() -> u64 {
    2
}

fn default_probe_host() -> String {
    "127.0.0.1".to_string()
}

fn default_probe_path() -> String {
    "/health".to_string()
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_probe_interval(),
            max_attempts: default_probe_attempts(),
            probe_timeout_secs: default_probe_timeout(),
            host: default_probe_host(),
            path: default_probe_path(),
        }
    }
}

/// Build settings
#[derive(Debug, Clone, Deserialize)]
pub struct BuildSettings {
    /// Seconds between build status polls
    #[serde(default = "default_build_poll")]
    pub poll_interval_secs: u64,

    /// Seconds before a build is given up on
    #[serde(default = "default_build_timeout")]
    pub timeout_secs: u64,

    /// Accept unsigned build reports when `build_webhook_secret` is unset
    #[serde(default)]
    pub allow_unsigned_reports: bool,
}

fn default_build_poll() -> u64 {
    5
}

fn default_build_timeout() -> u64 {
    30 * 60
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_build_poll(),
            timeout_secs: default_build_timeout(),
            allow_unsigned_reports: false,
        }
    }
}
