//! Inbound webhook models

use serde::{Deserialize, Serialize};

/// Who sent the webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Source control push notifications
    SourceControl,

    /// CI build results
    BuildSystem,
}

/// A webhook delivery, consumed synchronously and never stored
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    /// Delivery ID (provider header or generated)
    pub id: String,

    pub provider: Provider,

    /// Declared event type header, e.g. `push`
    pub event_type: Option<String>,

    /// Raw body, byte-exact as received
    pub payload: Vec<u8>,

    /// Signature header, e.g. `sha256=<hex>`
    pub signature: Option<String>,

    pub project_id: String,
}

impl WebhookEvent {
    /// Whether the declared type is a push / code-update class event
    pub fn is_push(&self) -> bool {
        self.event_type
            .as_deref()
            .map(|t| {
                let t = t.trim();
                t.eq_ignore_ascii_case("push") || t.eq_ignore_ascii_case("push hook")
            })
            .unwrap_or(false)
    }
}

/// The parts of a push payload the dispatcher reads
#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
    #[serde(rename = "ref")]
    pub git_ref: String,

    /// Head commit after the push
    #[serde(default)]
    pub after: Option<String>,

    #[serde(default)]
    pub pusher: Option<Pusher>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pusher {
    #[serde(default)]
    pub name: Option<String>,
}

impl PushPayload {
    /// Branch name with the `refs/heads/` prefix removed
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.git_ref)
    }
}

/// Build result reported by the CI webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub build_id: String,
    pub status: BuildReportStatus,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildReportStatus {
    #[serde(alias = "SUCCESS")]
    Success,

    #[serde(alias = "FAILURE")]
    Failure,
}
