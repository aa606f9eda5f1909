//! FSM unit tests

use dockyard::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentState, ProjectStatus};
use dockyard::errors::{FailureKind, OrchestratorError};

fn failed(kind: FailureKind) -> DeploymentEvent {
    DeploymentEvent::AttemptFailed {
        kind,
        reason: format!("{:?}", kind),
    }
}

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new("web");
    assert_eq!(fsm.state(), DeploymentState::Idle);
    assert!(fsm.error().is_none());
    assert_eq!(fsm.attempt(), 0);
}

#[test]
fn test_fsm_deploy_success_flow() {
    let mut fsm = DeploymentFsm::new("web");

    // Idle -> Building
    fsm.process(DeploymentEvent::BuildRequested).unwrap();
    assert_eq!(fsm.state(), DeploymentState::Building);

    // Building -> HealthChecking
    fsm.process(DeploymentEvent::InstanceStarted).unwrap();
    assert_eq!(fsm.state(), DeploymentState::HealthChecking);

    // HealthChecking -> Deployed
    let record = fsm.process(DeploymentEvent::ProbeSucceeded).unwrap();
    assert_eq!(record.from, DeploymentState::HealthChecking);
    assert_eq!(record.to, DeploymentState::Deployed);
    assert_eq!(record.project_id, "web");
    assert!(!fsm.status().rolled_back);
}

#[test]
fn test_fsm_build_failure_flow() {
    let mut fsm = DeploymentFsm::new("web");

    fsm.process(DeploymentEvent::BuildRequested).unwrap();
    fsm.process(failed(FailureKind::BuildFailed)).unwrap();

    assert_eq!(fsm.state(), DeploymentState::Failed);
    assert_eq!(fsm.failure(), Some(FailureKind::BuildFailed));
    assert_eq!(fsm.error(), Some("BuildFailed"));
}

#[test]
fn test_fsm_rollback_after_failure() {
    let mut fsm = DeploymentFsm::new("web");

    fsm.process(DeploymentEvent::BuildRequested).unwrap();
    fsm.process(DeploymentEvent::InstanceStarted).unwrap();
    fsm.process(failed(FailureKind::HealthCheckTimeout)).unwrap();

    // Failed -> RollingBack -> Deployed, flagged as rolled back
    fsm.process(DeploymentEvent::RollbackStarted).unwrap();
    assert_eq!(fsm.state(), DeploymentState::RollingBack);
    fsm.process(DeploymentEvent::RollbackSucceeded).unwrap();

    let status = fsm.status();
    assert_eq!(status.state, DeploymentState::Deployed);
    assert!(status.rolled_back);
    assert!(status.failure.is_none());
}

#[test]
fn test_fsm_restore_failure_is_terminal_until_reset() {
    let mut fsm = DeploymentFsm::new("web");

    fsm.process(DeploymentEvent::BuildRequested).unwrap();
    fsm.process(failed(FailureKind::StartFailed)).unwrap();
    fsm.process(DeploymentEvent::RollbackStarted).unwrap();
    fsm.process(DeploymentEvent::RollbackFailed("instance crashed".to_string()))
        .unwrap();

    assert_eq!(fsm.state(), DeploymentState::Failed);
    assert_eq!(fsm.failure(), Some(FailureKind::RestoreFailed));

    fsm.process(DeploymentEvent::Reset).unwrap();
    assert_eq!(fsm.state(), DeploymentState::Idle);
    assert!(fsm.failure().is_none());
}

#[test]
fn test_fsm_operator_rollback_from_deployed() {
    let mut fsm = DeploymentFsm::new("web");

    fsm.process(DeploymentEvent::BuildRequested).unwrap();
    fsm.process(DeploymentEvent::InstanceStarted).unwrap();
    fsm.process(DeploymentEvent::ProbeSucceeded).unwrap();

    let record = fsm.process(DeploymentEvent::RollbackRequested).unwrap();
    assert_eq!(record.to, DeploymentState::RollingBack);
    assert_eq!(record.attempt, 2);
}

#[test]
fn test_fsm_rejects_second_attempt_in_flight() {
    let mut fsm = DeploymentFsm::new("web");
    fsm.process(DeploymentEvent::BuildRequested).unwrap();

    for event in [DeploymentEvent::BuildRequested, DeploymentEvent::RollbackRequested] {
        let result = fsm.process(event);
        assert!(matches!(result, Err(OrchestratorError::BuildInProgress(_))));
    }

    // the first attempt is untouched
    assert_eq!(fsm.state(), DeploymentState::Building);
    assert_eq!(fsm.attempt(), 1);
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = DeploymentFsm::new("web");

    // Cannot go from Idle to HealthChecking
    let result = fsm.process(DeploymentEvent::InstanceStarted);
    assert!(matches!(
        result,
        Err(OrchestratorError::InvalidTransition {
            from: DeploymentState::Idle,
            ..
        })
    ));

    // Reset only clears failures
    assert!(fsm.process(DeploymentEvent::Reset).is_err());
    assert_eq!(fsm.state(), DeploymentState::Idle);
}

#[test]
fn test_fsm_attempt_numbers_increase() {
    let mut fsm = DeploymentFsm::new("web");

    for expected in 1..=3 {
        let record = fsm.process(DeploymentEvent::BuildRequested).unwrap();
        assert_eq!(record.attempt, expected);
        fsm.process(failed(FailureKind::BuildFailed)).unwrap();
    }
    assert_eq!(fsm.attempt(), 3);
}

#[test]
fn test_fsm_resume_keeps_settled_state() {
    let status = ProjectStatus {
        state: DeploymentState::Deployed,
        rolled_back: true,
        ..Default::default()
    };
    let fsm = DeploymentFsm::resume("web", &status, 4);
    assert_eq!(fsm.status(), status);
    assert_eq!(fsm.attempt(), 4);
}
