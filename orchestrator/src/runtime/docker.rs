//! Docker CLI runtime adapter

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::build::ArtifactRef;
use crate::errors::OrchestratorError;
use crate::runtime::{ContainerRuntime, Instance, InstanceStats, StartSpec, PROJECT_LABEL};

/// Talks to the local Docker daemon through the `docker` binary
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names")]
    names: String,
    #[serde(rename = "Image")]
    image: String,
    #[serde(rename = "State")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct StatsLine {
    #[serde(rename = "CPUPerc", default)]
    cpu: String,
    #[serde(rename = "MemUsage", default)]
    mem_usage: String,
    #[serde(rename = "MemPerc", default)]
    mem_perc: String,
    #[serde(rename = "NetIO", default)]
    net_io: String,
    #[serde(rename = "BlockIO", default)]
    block_io: String,
}

fn parse_percent(raw: &str) -> f64 {
    raw.trim().trim_end_matches('%').parse().unwrap_or(0.0)
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    async fn docker(&self, args: &[&str]) -> Result<String, OrchestratorError> {
        debug!("docker {}", args.join(" "));
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OrchestratorError::RuntimeError(format!("Failed to run docker {}: {}", args[0], e)))?;

        if !output.status.success() {
            return Err(OrchestratorError::RuntimeError(format!(
                "docker {} failed: {}",
                args[0],
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn list_instances(&self, project_id: &str) -> Result<Vec<Instance>, OrchestratorError> {
        let filter = format!("label={}={}", PROJECT_LABEL, project_id);
        let out = self
            .docker(&["ps", "-a", "--filter", &filter, "--format", "{{json .}}"])
            .await?;

        out.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| -> Result<Instance, OrchestratorError> {
                let ps: PsLine = serde_json::from_str(line)?;
                Ok(Instance {
                    id: ps.id,
                    name: ps.names,
                    image: ps.image,
                    running: ps.state == "running",
                })
            })
            .collect()
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), OrchestratorError> {
        self.docker(&["rename", from, to]).await.map(|_| ())
    }

    async fn start(&self, spec: &StartSpec) -> Result<Instance, OrchestratorError> {
        let label = format!("{}={}", PROJECT_LABEL, spec.project_id);
        let publish = format!("{}:{}", spec.port, spec.port);
        let port_env = format!("PORT={}", spec.port);
        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();

        let mut args: Vec<&str> = vec![
            "run",
            "-d",
            "--name",
            spec.name.as_str(),
            "--label",
            label.as_str(),
            "--restart",
            "unless-stopped",
            "-p",
            publish.as_str(),
            "-e",
            port_env.as_str(),
        ];
        for kv in &env {
            args.push("-e");
            args.push(kv.as_str());
        }
        args.push(spec.artifact.image.as_str());

        let id = self
            .docker(&args)
            .await
            .map_err(|e| OrchestratorError::StartFailed(e.to_string()))?;

        Ok(Instance {
            id: id.trim().to_string(),
            name: spec.name.clone(),
            image: spec.artifact.image.clone(),
            running: true,
        })
    }

    async fn resume(&self, name: &str) -> Result<(), OrchestratorError> {
        self.docker(&["start", name]).await.map(|_| ())
    }

    async fn stop(&self, name: &str) -> Result<(), OrchestratorError> {
        self.docker(&["stop", name]).await.map(|_| ())
    }

    async fn remove(&self, name: &str) -> Result<(), OrchestratorError> {
        self.docker(&["rm", "-f", name]).await.map(|_| ())
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<String, OrchestratorError> {
        let tail = tail.to_string();
        self.docker(&["logs", "--tail", &tail, name]).await
    }

    async fn stats(&self, name: &str) -> Result<InstanceStats, OrchestratorError> {
        let out = self
            .docker(&["stats", "--no-stream", "--format", "{{json .}}", name])
            .await?;
        let line = out
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| OrchestratorError::RuntimeError(format!("no stats for {}", name)))?;
        let stats: StatsLine = serde_json::from_str(line)?;

        Ok(InstanceStats {
            cpu_percent: parse_percent(&stats.cpu),
            memory_usage: stats.mem_usage,
            memory_percent: parse_percent(&stats.mem_perc),
            net_io: stats.net_io,
            block_io: stats.block_io,
        })
    }

    async fn remove_artifact(&self, artifact: &ArtifactRef) -> Result<(), OrchestratorError> {
        self.docker(&["rmi", artifact.image.as_str()]).await.map(|_| ())
    }
}
