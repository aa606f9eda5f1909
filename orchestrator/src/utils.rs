//! Utility functions

use std::path::Path;
use std::time::Duration;

use colored::Colorize;
use serde::{Deserialize, Serialize};

/// Version information for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Cooldown options for exponential backoff
#[derive(Debug, Clone)]
pub struct CooldownOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for CooldownOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
        }
    }
}

/// Calculate exponential backoff delay
pub fn calc_exp_backoff(options: &CooldownOptions, attempt: u32) -> Duration {
    let delay_secs = options.base_delay.as_secs_f64() * options.multiplier.powi(attempt as i32);
    let capped_delay = delay_secs.min(options.max_delay.as_secs_f64());
    Duration::from_secs_f64(capped_delay)
}

/// Check the host tools and data directory the orchestrator depends on
pub async fn run_diagnostic(docker_binary: &str, data_dir: &Path) {
    println!("{}", "Dockyard diagnostic".bold());

    let version = version_info();
    println!("  version      {} ({})", version.version, version.git_hash);

    for (label, binary) in [("docker", docker_binary), ("git", "git")] {
        match tool_version(binary).await {
            Some(found) => println!("  {:<12} {} {}", label, "ok".green(), found),
            None => println!("  {:<12} {} {} not found on PATH", label, "missing".red(), binary),
        }
    }

    match tokio::fs::metadata(data_dir).await {
        Ok(meta) if meta.is_dir() => {
            let writable = !meta.permissions().readonly();
            let state = if writable { "ok".green() } else { "read-only".yellow() };
            println!("  {:<12} {} {}", "data dir", state, data_dir.display());
        }
        Ok(_) => println!("  {:<12} {} {} is not a directory", "data dir", "invalid".red(), data_dir.display()),
        Err(_) => println!(
            "  {:<12} {} {} (created on first start)",
            "data dir",
            "absent".yellow(),
            data_dir.display()
        ),
    }
}

async fn tool_version(binary: &str) -> Option<String> {
    let output = tokio::process::Command::new(binary)
        .arg("--version")
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
