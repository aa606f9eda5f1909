//! Orchestrator lifecycle tests: build reports, operator actions, cancellation, restarts

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::SecretString;
use tokio_test::assert_ok;

use dockyard::deploy::fsm::{DeploymentState, ProjectStatus};
use dockyard::deploy::orchestrator::{AttemptKind, BuildReportOutcome, OrchestratorOptions};
use dockyard::errors::{FailureKind, OrchestratorError};
use dockyard::filesys::file::File;
use dockyard::models::attempt::AttemptOutcome;
use dockyard::models::project::{ProjectUpdate, AUTO_PORT_MAX, AUTO_PORT_MIN};
use dockyard::runtime::ContainerRuntime;
use dockyard::store::projects::ProjectStore;
use dockyard::webhook::dispatcher::{DispatchDecision, IgnoreReason};
use dockyard::webhook::signature::sign;

use crate::support::{fast_options, new_project, push_event, Harness};

async fn wait_for_build(h: &Harness, count: usize) -> String {
    for _ in 0..400 {
        if let Some((id, _)) = h.builder.submitted().get(count - 1) {
            return id.0.clone();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("build {} was never submitted", count);
}

fn report(build_id: &str, status: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "build_id": build_id,
        "status": status,
        "message": "integration tests failed",
    }))
    .unwrap()
}

#[tokio::test]
async fn test_build_report_fails_in_flight_attempt() {
    let h = Harness::new().await;
    h.register("web", 4401).await;
    h.builder.hold();

    h.orchestrator.request_deploy("web").await.unwrap();
    let build_id = wait_for_build(&h, 1).await;

    let outcome = h
        .orchestrator
        .handle_build_report("web", &report(&build_id, "failure"), None)
        .await
        .unwrap();
    assert_eq!(outcome, BuildReportOutcome::Delivered);

    let status = h.settled("web").await;
    assert_eq!(status.state, DeploymentState::Failed);
    assert_eq!(status.failure, Some(FailureKind::BuildFailed));
    assert_eq!(status.error.as_deref(), Some("Build failed: integration tests failed"));
    assert_eq!(h.runtime.starts(), 0);
}

#[tokio::test]
async fn test_failed_build_without_snapshot_stays_failed() {
    let h = Harness::new().await;
    h.register("web", 4402).await;
    h.builder.fail_builds(true);

    let report = h.deploy("web").await;
    assert_eq!(
        report.attempt.outcome,
        Some(AttemptOutcome::Failure {
            kind: FailureKind::BuildFailed,
            reason: "Build failed: compile error".to_string(),
        })
    );
    assert_eq!(h.runtime.starts(), 0);
    assert!(h.runtime.names().is_empty());
}

#[tokio::test]
async fn test_failure_report_for_idle_project_rolls_back() {
    let h = Harness::new().await;
    let project = h.register("web", 4403).await;

    let first = h.deploy("web").await.snapshot.unwrap();
    h.deploy("web").await;

    let outcome = h
        .orchestrator
        .handle_build_report("web", &report("external-17", "failure"), None)
        .await
        .unwrap();
    assert_eq!(outcome, BuildReportOutcome::RollbackStarted { attempt: 3 });

    let status = h.settled("web").await;
    assert_eq!(status.state, DeploymentState::Deployed);
    assert!(status.rolled_back);
    assert_eq!(h.serving_image(&project), Some(first.artifact.image));
}

#[tokio::test]
async fn test_failure_report_without_history_is_ignored() {
    let h = Harness::new().await;
    h.register("web", 4404).await;

    let outcome = h
        .orchestrator
        .handle_build_report("web", &report("external-1", "failure"), None)
        .await
        .unwrap();
    assert!(matches!(outcome, BuildReportOutcome::Ignored { .. }));
    assert_eq!(h.orchestrator.status("web").await.unwrap().state, DeploymentState::Idle);
}

#[tokio::test]
async fn test_signed_build_reports() {
    let mut options = fast_options();
    options.build_webhook_secret = Some(SecretString::from("ci-secret"));
    let h = Harness::with(options, 0).await;
    h.register("web", 4405).await;

    let body = report("b-1", "success");
    let result = h.orchestrator.handle_build_report("web", &body, Some("sha256=beef")).await;
    assert!(matches!(result, Err(OrchestratorError::VerificationFailed)));

    let signature = sign("ci-secret", &body).unwrap();
    let outcome = assert_ok!(
        h.orchestrator
            .handle_build_report("web", &body, Some(&signature))
            .await
    );
    assert!(matches!(outcome, BuildReportOutcome::Ignored { .. }));

    let malformed = b"{\"build_id\":".to_vec();
    let signature = sign("ci-secret", &malformed).unwrap();
    let result = h.orchestrator.handle_build_report("web", &malformed, Some(&signature)).await;
    assert!(matches!(result, Err(OrchestratorError::ValidationError(_))));
}

#[tokio::test]
async fn test_operator_rollback_to_version() {
    let h = Harness::new().await;
    let project = h.register("web", 4406).await;

    let first = h.deploy("web").await.snapshot.unwrap();
    h.deploy("web").await;
    h.deploy("web").await;

    let ticket = h
        .orchestrator
        .request_rollback("web", Some(first.version.clone()))
        .await
        .unwrap();
    assert_eq!(ticket.kind(), &AttemptKind::Rollback { target: first.version.clone() });

    let status = h.settled("web").await;
    assert!(status.rolled_back);
    assert_eq!(h.serving_image(&project), Some(first.artifact.image));
    assert_eq!(h.orchestrator.snapshots("web").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_operator_rollback_without_target_picks_previous() {
    let h = Harness::new().await;
    h.register("web", 4407).await;

    let first = h.deploy("web").await.snapshot.unwrap();
    h.deploy("web").await;

    let ticket = h.orchestrator.request_rollback("web", None).await.unwrap();
    assert_eq!(ticket.kind(), &AttemptKind::Rollback { target: first.version });
    h.settled("web").await;
}

#[tokio::test]
async fn test_rollback_rejected_before_touching_state() {
    let h = Harness::new().await;
    h.register("web", 4408).await;

    let result = h.orchestrator.request_rollback("web", None).await;
    assert!(matches!(result, Err(OrchestratorError::NoSnapshotAvailable(_))));

    h.deploy("web").await;
    let missing = dockyard::models::snapshot::VersionLabel::from_datetime(chrono::Utc::now());
    let result = h.orchestrator.request_rollback("web", Some(missing)).await;
    assert!(matches!(result, Err(OrchestratorError::SnapshotNotFound { .. })));

    assert_eq!(h.orchestrator.status("web").await.unwrap().state, DeploymentState::Deployed);
}

#[tokio::test]
async fn test_reset_clears_failure() {
    let h = Harness::new().await;
    h.register("web", 4409).await;
    h.builder.fail_builds(true);
    h.deploy("web").await;

    let status = h.orchestrator.reset("web").await.unwrap();
    assert_eq!(status, ProjectStatus::default());

    let result = h.orchestrator.reset("web").await;
    assert!(matches!(result, Err(OrchestratorError::InvalidTransition { .. })));
}

#[tokio::test]
async fn test_remove_cancels_attempt_and_cleans_up() {
    let h = Harness::new().await;
    h.register("web", 4410).await;
    h.deploy("web").await;
    h.builder.hold();

    h.orchestrator.request_deploy("web").await.unwrap();
    let build_id = wait_for_build(&h, 2).await;

    let removed = h.orchestrator.remove("web").await.unwrap();
    assert_eq!(removed.id, "web");
    assert!(h.builder.cancelled().iter().any(|id| id.0 == build_id));
    assert!(h.runtime.names().is_empty());
    assert!(matches!(
        h.orchestrator.project("web").await,
        Err(OrchestratorError::ProjectNotFound(_))
    ));
    assert!(h.orchestrator.snapshots("web").await.is_err());
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_attempts() {
    let h = Harness::new().await;
    h.register("web", 4411).await;
    h.builder.hold();

    h.orchestrator.request_deploy("web").await.unwrap();
    wait_for_build(&h, 1).await;

    assert_ok!(h.orchestrator.shutdown(Duration::from_secs(2)).await);
    let status = h.orchestrator.status("web").await.unwrap();
    assert_eq!(status.state, DeploymentState::Failed);
    assert_eq!(status.failure, Some(FailureKind::Cancelled));
    assert!(h.alerts.alerts().is_empty());
}

#[tokio::test]
async fn test_restart_marks_in_flight_projects_interrupted() {
    let dir = tempfile::tempdir().unwrap();
    let file = File::new(dir.path().join("projects.json"));

    let store = ProjectStore::load(file.clone()).await.unwrap();
    let mut project = new_project("web", 4412).into_project().unwrap();
    project.status.state = DeploymentState::HealthChecking;
    project.last_attempt = 4;
    store.insert(project).await.unwrap();

    let store = ProjectStore::load(file.clone()).await.unwrap();
    let h = Harness::with_store(fast_options(), 0, dir, store).await;

    let status = h.orchestrator.status("web").await.unwrap();
    assert_eq!(status.state, DeploymentState::Failed);
    assert_eq!(status.failure, Some(FailureKind::Interrupted));

    let reloaded = ProjectStore::load(file).await.unwrap();
    assert_eq!(reloaded.get("web").await.unwrap().status, status);

    // attempt numbers continue where they stopped
    assert_eq!(h.deploy("web").await.attempt.attempt, 5);
}

#[tokio::test]
async fn test_register_rejects_duplicates_and_persists() {
    let h = Harness::new().await;
    h.register("web", 4413).await;

    let result = h.orchestrator.register(new_project("web", 4414)).await;
    assert!(matches!(result, Err(OrchestratorError::ProjectExists(_))));

    let reloaded = ProjectStore::load(File::new(h.dir.path().join("projects.json"))).await.unwrap();
    assert_eq!(reloaded.list().await.len(), 1);
}

#[tokio::test]
async fn test_domain_update_persists() {
    let h = Harness::new().await;
    h.register("web", 4415).await;

    let project = h
        .orchestrator
        .update_domain("web", Some("shop.example.com".to_string()), true)
        .await
        .unwrap();
    assert_eq!(project.domain.as_deref(), Some("shop.example.com"));
    assert!(project.tls);

    let cleared = h.orchestrator.update_domain("web", Some("  ".to_string()), false).await.unwrap();
    assert!(cleared.domain.is_none());
}

#[tokio::test]
async fn test_logs_and_stats_of_serving_instance() {
    let h = Harness::new().await;
    h.register("web", 4416).await;

    assert!(h.orchestrator.logs("web", 10).await.is_err());
    h.deploy("web").await;

    let logs = h.orchestrator.logs("web", 10).await.unwrap();
    assert!(logs.contains("last 10 lines"));
    let stats = h.orchestrator.stats("web").await.unwrap();
    assert!(stats.cpu_percent > 0.0);
}

#[tokio::test]
async fn test_register_rejects_taken_port() {
    let h = Harness::new().await;
    h.register("web", 4420).await;

    match h.orchestrator.register(new_project("api", 4420)).await {
        Err(OrchestratorError::PortInUse { port, project_id }) => {
            assert_eq!(port, 4420);
            assert_eq!(project_id, "web");
        }
        other => panic!("expected PortInUse, got {:?}", other),
    }
    assert!(h.orchestrator.status("api").await.is_err());

    let mut request = new_project("worker", 4421);
    request.port = None;
    let worker = h.orchestrator.register(request).await.unwrap();
    assert!((AUTO_PORT_MIN..=AUTO_PORT_MAX).contains(&worker.port));
    assert_ne!(worker.port, 4420);
}

#[tokio::test]
async fn test_build_timeout_cancels_build() {
    let mut options = fast_options();
    options.swap.build_timeout = Duration::from_millis(50);
    let h = Harness::with(options, 0).await;
    h.register("web", 4422).await;
    h.builder.hold();

    let report = h.deploy("web").await;
    assert_eq!(report.status.state, DeploymentState::Failed);
    assert_eq!(report.status.failure, Some(FailureKind::BuildFailed));
    assert!(report.status.error.unwrap().contains("did not finish"));

    let (build_id, _) = h.builder.submitted().pop().unwrap();
    assert_eq!(h.builder.cancelled(), vec![build_id]);
    assert_eq!(h.runtime.starts(), 0);
}

#[tokio::test]
async fn test_build_report_only_reaches_its_own_project() {
    let h = Harness::new().await;
    h.register("web", 4423).await;
    h.register("api", 4424).await;
    h.builder.hold();

    h.orchestrator.request_deploy("web").await.unwrap();
    h.orchestrator.request_deploy("api").await.unwrap();
    wait_for_build(&h, 2).await;
    let (api_build, _) = h
        .builder
        .submitted()
        .into_iter()
        .find(|(_, request)| request.project_id == "api")
        .unwrap();

    // web is building, so the report is accepted, but under web's name
    let outcome = h
        .orchestrator
        .handle_build_report("web", &report(&api_build.0, "failure"), None)
        .await
        .unwrap();
    assert_eq!(outcome, BuildReportOutcome::Delivered);

    h.builder.release();
    assert_eq!(h.settled("api").await.state, DeploymentState::Deployed);
    assert_eq!(h.settled("web").await.state, DeploymentState::Deployed);
}

#[tokio::test]
async fn test_build_report_after_build_is_ignored() {
    let h = Harness::new().await;
    h.register("web", 4431).await;
    h.deploy("web").await;

    let outcome = h
        .orchestrator
        .handle_build_report("web", &report("web-late", "success"), None)
        .await
        .unwrap();
    assert!(matches!(outcome, BuildReportOutcome::Ignored { .. }));

    // a late report for the finished build does not leak into the next attempt
    let report = h.deploy("web").await;
    assert!(report.attempt.outcome.unwrap().is_success());
}

#[tokio::test]
async fn test_unsigned_build_reports_rejected_by_default() {
    assert!(!OrchestratorOptions::default().allow_unsigned_build_reports);

    let mut options = fast_options();
    options.allow_unsigned_build_reports = false;
    let h = Harness::with(options, 0).await;
    h.register("web", 4430).await;
    h.deploy("web").await;

    let result = h
        .orchestrator
        .handle_build_report("web", &report("external-3", "failure"), None)
        .await;
    assert!(matches!(result, Err(OrchestratorError::VerificationFailed)));
    assert_eq!(h.orchestrator.status("web").await.unwrap().state, DeploymentState::Deployed);
}

#[tokio::test]
async fn test_unrenamable_previous_instance_fails_restore() {
    let h = Harness::new().await;
    let project = h.register("web", 4425).await;
    h.deploy("web").await;

    h.builder.produce_broken(true);
    h.runtime.fail_rename_of(&project.previous_instance_name());
    let report = h.deploy("web").await;

    assert_eq!(
        report.attempt.outcome.as_ref().and_then(|o| o.failure_kind()),
        Some(FailureKind::RestoreFailed)
    );
    assert_eq!(report.status.state, DeploymentState::Failed);
    assert_eq!(report.status.failure, Some(FailureKind::RestoreFailed));
    assert_eq!(h.runtime.refused(), fast_options().swap.restore_attempts);

    let alerts = h.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, FailureKind::RestoreFailed);
    assert_eq!(alerts[0].attempt, 2);

    // escalated straight away, no snapshot restore attempted
    let events = h.orchestrator.events("web").await.unwrap();
    assert!(events
        .iter()
        .filter(|r| r.attempt == 2)
        .all(|r| r.to != DeploymentState::RollingBack));
    assert_eq!(h.runtime.starts(), 2);
}

#[tokio::test]
async fn test_stopped_previous_instance_that_will_not_resume_fails_restore() {
    let h = Harness::new().await;
    let project = h.register("web", 4426).await;
    h.deploy("web").await;
    h.runtime.stop(&project.instance_name()).await.unwrap();

    h.builder.produce_broken(true);
    h.runtime.fail_resume_of(&project.instance_name());
    let report = h.deploy("web").await;

    assert_eq!(report.status.failure, Some(FailureKind::RestoreFailed));
    assert_eq!(h.runtime.refused(), fast_options().swap.restore_attempts);
    assert_eq!(h.alerts.alerts().len(), 1);
    assert!(h.runtime.instance(&project.instance_name()).is_some());
}

#[tokio::test]
async fn test_update_project_changes_tracked_branch() {
    let h = Harness::new().await;
    h.register("web", 4427).await;

    let updated = h
        .orchestrator
        .update_project(
            "web",
            ProjectUpdate {
                branch: Some("develop".to_string()),
                env: Some(BTreeMap::from([("MODE".to_string(), "prod".to_string())])),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.branch, "develop");
    assert_eq!(updated.env.len(), 1);
    assert_eq!(updated.repo_url, "https://git.example.com/acme/web.git");

    let decision = h.orchestrator.handle_source_webhook(&push_event("web", "main")).await.unwrap();
    assert!(matches!(decision, DispatchDecision::Ignore(IgnoreReason::BranchMismatch)));

    h.builder.hold();
    let decision = h.orchestrator.handle_source_webhook(&push_event("web", "develop")).await.unwrap();
    assert!(decision.is_start());

    let blocked = ProjectUpdate {
        branch: Some("main".to_string()),
        ..Default::default()
    };
    let result = h.orchestrator.update_project("web", blocked).await;
    assert!(matches!(result, Err(OrchestratorError::BuildInProgress(_))));

    h.builder.release();
    h.settled("web").await;
    assert_eq!(h.builder.submitted()[0].1.branch, "develop");
}

#[tokio::test]
async fn test_stop_takes_instances_down() {
    let h = Harness::new().await;
    h.register("web", 4428).await;
    h.deploy("web").await;

    let status = h.orchestrator.stop("web").await.unwrap();
    assert_eq!(status, ProjectStatus::default());
    assert!(h.runtime.names().is_empty());
    assert_eq!(h.orchestrator.snapshots("web").await.unwrap().len(), 1);
    assert!(h.orchestrator.project("web").await.unwrap().serving_version.is_none());

    h.builder.hold();
    h.orchestrator.request_deploy("web").await.unwrap();
    let result = h.orchestrator.stop("web").await;
    assert!(matches!(result, Err(OrchestratorError::BuildInProgress(_))));

    h.builder.release();
    assert_eq!(h.settled("web").await.state, DeploymentState::Deployed);
    assert_eq!(h.runtime.names().len(), 1);
}

#[tokio::test]
async fn test_repeated_rollback_walks_back() {
    let h = Harness::new().await;
    let project = h.register("web", 4429).await;

    let first = h.deploy("web").await.snapshot.unwrap();
    let second = h.deploy("web").await.snapshot.unwrap();
    let third = h.deploy("web").await.snapshot.unwrap();
    assert_eq!(
        h.orchestrator.project("web").await.unwrap().serving_version,
        Some(third.version)
    );

    let ticket = h.orchestrator.request_rollback("web", None).await.unwrap();
    assert_eq!(ticket.kind(), &AttemptKind::Rollback { target: second.version.clone() });
    h.settled("web").await;
    assert_eq!(
        h.orchestrator.project("web").await.unwrap().serving_version,
        Some(second.version)
    );

    let ticket = h.orchestrator.request_rollback("web", None).await.unwrap();
    assert_eq!(ticket.kind(), &AttemptKind::Rollback { target: first.version.clone() });
    assert!(h.settled("web").await.rolled_back);
    assert_eq!(h.serving_image(&project), Some(first.artifact.image));

    let result = h.orchestrator.request_rollback("web", None).await;
    assert!(matches!(result, Err(OrchestratorError::NoSnapshotAvailable(_))));
}
