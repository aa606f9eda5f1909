//! Health gate: sequential, bounded probing of a freshly started instance

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::OrchestratorError;

/// A single health probe against a port
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `Ok(())` when the instance answered healthy
    async fn probe(&self, port: u16) -> Result<(), String>;
}

/// HTTP GET probe; any 2xx is healthy
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    host: String,
    path: String,
}

impl HttpHealthProbe {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into(),
            path: path.into(),
        }
    }

    fn url(&self, port: u16) -> Result<url::Url, String> {
        let base = format!("http://{}:{}", self.host, port);
        url::Url::parse(&base)
            .and_then(|u| u.join(&self.path))
            .map_err(|e| format!("bad probe url {}{}: {}", base, self.path, e))
    }
}

impl Default for HttpHealthProbe {
    fn default() -> Self {
        Self::new("127.0.0.1", "/health")
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, port: u16) -> Result<(), String> {
        let url = self.url(port)?;
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("status {}", response.status()))
        }
    }
}

/// Health gate options
#[derive(Debug, Clone)]
pub struct HealthGateOptions {
    /// Pause between probes
    pub interval: Duration,

    /// Probe ceiling, counted in attempts
    pub max_attempts: u32,

    /// Timeout of a single probe
    pub probe_timeout: Duration,
}

impl Default for HealthGateOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 30,
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// Polls a probe until it succeeds, the ceiling is hit or the attempt is cancelled
#[derive(Clone)]
pub struct HealthGate {
    probe: Arc<dyn HealthProbe>,
    options: HealthGateOptions,
}

impl HealthGate {
    pub fn new(probe: Arc<dyn HealthProbe>, options: HealthGateOptions) -> Self {
        Self { probe, options }
    }

    /// Wait until the instance on `port` is healthy.
    ///
    /// Probes never overlap. A probe that times out consumes its slot. Returns
    /// the number of probes used.
    pub async fn wait_healthy(
        &self,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<u32, OrchestratorError> {
        let max_attempts = self.options.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                res = tokio::time::timeout(self.options.probe_timeout, self.probe.probe(port)) => res,
            };

            match outcome {
                Ok(Ok(())) => {
                    debug!(port, attempt, "health probe succeeded");
                    return Ok(attempt);
                }
                Ok(Err(reason)) => debug!(port, attempt, "health probe failed: {}", reason),
                Err(_) => debug!(port, attempt, "health probe timed out"),
            }

            if attempt < max_attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                    _ = tokio::time::sleep(self.options.interval) => {}
                }
            }
        }

        Err(OrchestratorError::HealthCheckTimeout {
            attempts: max_attempts,
        })
    }
}
