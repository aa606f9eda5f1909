//! End-to-end deployment scenarios against in-memory adapters

use dockyard::deploy::fsm::DeploymentState;
use dockyard::errors::FailureKind;
use dockyard::models::attempt::AttemptOutcome;
use dockyard::webhook::dispatcher::{DispatchDecision, IgnoreReason};

use crate::support::{fast_options, push_event, Harness};

/// Push to the tracked branch, healthy on the third probe: deployed, old
/// instance gone, snapshot taken and history pruned to the limit
#[tokio::test]
async fn test_scenario_a_push_deploys_and_prunes() {
    let h = Harness::with(fast_options(), 2).await;
    let project = h.register("shop", 4201).await;

    for _ in 0..5 {
        assert!(h.deploy("shop").await.attempt.outcome.unwrap().is_success());
    }
    let before = h.orchestrator.snapshots("shop").await.unwrap();
    assert_eq!(before.len(), 5);

    let decision = h.orchestrator.handle_source_webhook(&push_event("shop", "main")).await.unwrap();
    assert!(decision.is_start());
    let status = h.settled("shop").await;

    assert_eq!(status.state, DeploymentState::Deployed);
    assert!(!status.rolled_back);

    let (_, request) = h.builder.submitted().pop().unwrap();
    let image = request.artifact().image;
    assert_eq!(h.serving_image(&project), Some(image.clone()));
    assert_eq!(h.probe.probes_of(&image), 3);
    assert_eq!(h.runtime.names(), vec![project.instance_name()]);

    let after = h.orchestrator.snapshots("shop").await.unwrap();
    assert_eq!(after.len(), 5);
    assert_eq!(after.last().unwrap().artifact.image, image);
    assert!(after.iter().all(|s| s.version != before[0].version));
    assert_eq!(after[..4], before[1..]);
    assert_eq!(h.runtime.removed_artifacts(), vec![before[0].artifact.image.clone()]);

    // the Deployed transition precedes the snapshot it produced
    let deployed = h
        .orchestrator
        .events("shop")
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.attempt == 6 && r.to == DeploymentState::Deployed)
        .last()
        .unwrap();
    assert!(deployed.at < after.last().unwrap().version.timestamp());
}

/// Health gate exhausted with one prior snapshot: rolled back to it
#[tokio::test]
async fn test_scenario_b_health_timeout_rolls_back() {
    let h = Harness::new().await;
    let project = h.register("blog", 4202).await;

    let first = h.deploy("blog").await;
    let snapshot = first.snapshot.unwrap();

    h.builder.produce_broken(true);
    let report = h.deploy("blog").await;

    assert_eq!(
        report.attempt.outcome,
        Some(AttemptOutcome::RolledBack {
            version: snapshot.version.to_string()
        })
    );
    assert_eq!(report.status.state, DeploymentState::Deployed);
    assert!(report.status.rolled_back);
    assert!(report.snapshot.is_none());

    // the broken artifact is discarded
    assert_eq!(h.serving_image(&project), Some(snapshot.artifact.image.clone()));
    assert_eq!(h.runtime.names(), vec![project.instance_name()]);
    let (_, broken) = h.builder.submitted().pop().unwrap();
    assert_eq!(
        h.runtime.removed_artifacts(),
        vec![format!("{}-broken", broken.artifact())]
    );
    assert_eq!(h.orchestrator.snapshots("blog").await.unwrap(), vec![snapshot]);

    let path: Vec<(DeploymentState, DeploymentState)> = h
        .orchestrator
        .events("blog")
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.attempt == 2)
        .map(|r| (r.from, r.to))
        .collect();
    assert_eq!(
        path,
        vec![
            (DeploymentState::Deployed, DeploymentState::Building),
            (DeploymentState::Building, DeploymentState::HealthChecking),
            (DeploymentState::HealthChecking, DeploymentState::Failed),
            (DeploymentState::Failed, DeploymentState::RollingBack),
            (DeploymentState::RollingBack, DeploymentState::Deployed),
        ]
    );
    assert!(h.alerts.alerts().is_empty());
}

/// Same as B, but the restored snapshot will not start: RestoreFailed
#[tokio::test]
async fn test_scenario_c_restore_failure_escalates() {
    let h = Harness::new().await;
    let project = h.register("api", 4203).await;

    let snapshot = h.deploy("api").await.snapshot.unwrap();
    h.runtime.fail_start_of(&snapshot.artifact.image);
    h.builder.produce_broken(true);

    let report = h.deploy("api").await;

    assert_eq!(
        report.attempt.outcome.as_ref().and_then(|o| o.failure_kind()),
        Some(FailureKind::RestoreFailed)
    );
    assert_eq!(report.status.state, DeploymentState::Failed);
    assert_eq!(report.status.failure, Some(FailureKind::RestoreFailed));

    // no pruning and no new snapshot
    assert_eq!(h.orchestrator.snapshots("api").await.unwrap(), vec![snapshot.clone()]);

    let alerts = h.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, FailureKind::RestoreFailed);
    assert_eq!(alerts[0].attempt, 2);

    // the instance serving before the attempt is still there
    assert_eq!(h.serving_image(&project), Some(snapshot.artifact.image));
}

/// Push to an untracked branch: ignored without a transition or a build
#[tokio::test]
async fn test_scenario_d_branch_mismatch_ignored() {
    let h = Harness::new().await;
    h.register("docs", 4204).await;

    let decision = h
        .orchestrator
        .handle_source_webhook(&push_event("docs", "develop"))
        .await
        .unwrap();

    match decision {
        DispatchDecision::Ignore(reason) => {
            assert_eq!(reason, IgnoreReason::BranchMismatch);
            assert_eq!(reason.to_string(), "branch mismatch");
        }
        DispatchDecision::StartBuild(_) => panic!("develop is not tracked"),
    }
    assert_eq!(h.orchestrator.status("docs").await.unwrap().state, DeploymentState::Idle);
    assert!(h.orchestrator.events("docs").await.unwrap().is_empty());
    assert!(h.builder.submitted().is_empty());
}

/// Second push while building: ignored, first attempt unaffected
#[tokio::test]
async fn test_scenario_e_second_push_while_building() {
    let h = Harness::new().await;
    let project = h.register("crm", 4205).await;
    h.builder.hold();

    let first = h.orchestrator.handle_source_webhook(&push_event("crm", "main")).await.unwrap();
    assert!(first.is_start());
    assert_eq!(h.orchestrator.status("crm").await.unwrap().state, DeploymentState::Building);

    let second = h.orchestrator.handle_source_webhook(&push_event("crm", "main")).await.unwrap();
    match second {
        DispatchDecision::Ignore(reason) => {
            assert_eq!(reason, IgnoreReason::BuildInProgress);
            assert_eq!(reason.to_string(), "build in progress");
        }
        DispatchDecision::StartBuild(_) => panic!("only one attempt may be in flight"),
    }

    h.builder.release();
    let status = h.settled("crm").await;
    assert_eq!(status.state, DeploymentState::Deployed);
    assert_eq!(h.builder.submitted().len(), 1);
    assert!(h.serving_image(&project).is_some());
    assert!(h
        .orchestrator
        .events("crm")
        .await
        .unwrap()
        .iter()
        .all(|r| r.attempt == 1));
}
