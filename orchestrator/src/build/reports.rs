//! Build results pushed by an external CI through the build webhook

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::models::webhook::{BuildReport, BuildReportStatus};

/// Most recent report per project and build ID. Reports are consumed by the
/// swap controller's build poll.
#[derive(Debug, Default)]
pub struct BuildReports {
    reports: RwLock<HashMap<(String, String), BuildReport>>,
}

impl BuildReports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a report. A later report for the same build replaces the earlier one.
    pub async fn record(&self, project_id: &str, report: BuildReport) {
        info!(
            project_id = %project_id,
            build_id = %report.build_id,
            status = ?report.status,
            "build report received"
        );
        self.reports
            .write()
            .await
            .insert((project_id.to_string(), report.build_id.clone()), report);
    }

    /// Take the report for a project's build, if one arrived
    pub async fn take(&self, project_id: &str, build_id: &str) -> Option<BuildReport> {
        self.reports
            .write()
            .await
            .remove(&(project_id.to_string(), build_id.to_string()))
    }

    /// Drop every report left over for a project
    pub async fn clear_project(&self, project_id: &str) {
        let mut reports = self.reports.write().await;
        let before = reports.len();
        reports.retain(|(project, _), _| project != project_id);
        if reports.len() < before {
            debug!(project_id, dropped = before - reports.len(), "dropped unclaimed build reports");
        }
    }

    pub async fn len(&self) -> usize {
        self.reports.read().await.len()
    }
}

impl BuildReport {
    pub fn succeeded(&self) -> bool {
        self.status == BuildReportStatus::Success
    }
}
