//! Operator alerts for failures that need a human

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};

use crate::errors::FailureKind;

/// An escalated failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub project_id: String,
    pub attempt: u64,
    pub kind: FailureKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Alert {
    pub fn new(project_id: impl Into<String>, attempt: u64, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            attempt,
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Where alerts go. Delivery is best-effort and never fails the caller.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, alert: &Alert);
}

/// Alerts as error-level log lines
#[derive(Debug, Clone, Default)]
pub struct LogAlert;

#[async_trait]
impl AlertSink for LogAlert {
    async fn alert(&self, alert: &Alert) {
        error!(
            project_id = %alert.project_id,
            attempt = alert.attempt,
            kind = ?alert.kind,
            "ALERT: {}",
            alert.message
        );
    }
}

/// Logs the alert, then POSTs it as JSON to an operator endpoint
#[derive(Debug, Clone)]
pub struct WebhookAlert {
    client: reqwest::Client,
    url: url::Url,
}

impl WebhookAlert {
    pub fn new(client: reqwest::Client, url: url::Url) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl AlertSink for WebhookAlert {
    async fn alert(&self, alert: &Alert) {
        LogAlert.alert(alert).await;

        let result = self
            .client
            .post(self.url.clone())
            .json(alert)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        if let Err(e) = result {
            warn!(project_id = %alert.project_id, "alert delivery failed: {}", e);
        }
    }
}
