//! Build trigger dispatch tests

use secrecy::SecretString;

use dockyard::deploy::fsm::DeploymentState;
use dockyard::errors::OrchestratorError;
use dockyard::webhook::dispatcher::{DispatchDecision, Dispatcher, IgnoreReason};
use dockyard::webhook::signature::SignatureVerifier;

use crate::support::{push_event, Harness, SECRET};

fn dispatcher() -> Dispatcher {
    Dispatcher::new(SignatureVerifier::new(Some(SecretString::from(SECRET))))
}

fn ignored(decision: DispatchDecision) -> IgnoreReason {
    match decision {
        DispatchDecision::Ignore(reason) => reason,
        DispatchDecision::StartBuild(ticket) => panic!("unexpected build, attempt {}", ticket.attempt()),
    }
}

#[tokio::test]
async fn test_valid_push_starts_build() {
    let h = Harness::new().await;
    h.register("web", 4101).await;

    let event = push_event("web", "main");
    let decision = dispatcher().dispatch(&event, &*h.orchestrator).await.unwrap();

    let DispatchDecision::StartBuild(ticket) = decision else {
        panic!("push to the tracked branch should start a build");
    };
    assert_eq!(ticket.project_id(), "web");
    assert_eq!(ticket.event_id(), event.id);
    assert_eq!(ticket.attempt(), 1);
    assert_eq!(h.orchestrator.status("web").await.unwrap().state, DeploymentState::Building);
}

#[tokio::test]
async fn test_bad_signature_touches_nothing() {
    let h = Harness::new().await;
    h.register("web", 4102).await;

    let mut event = push_event("web", "main");
    event.signature = Some("sha256=00".to_string());
    let result = dispatcher().dispatch(&event, &*h.orchestrator).await;
    assert!(matches!(result, Err(OrchestratorError::VerificationFailed)));

    event.signature = None;
    let result = dispatcher().dispatch(&event, &*h.orchestrator).await;
    assert!(matches!(result, Err(OrchestratorError::VerificationFailed)));

    assert!(h.orchestrator.events("web").await.unwrap().is_empty());
    assert!(h.builder.submitted().is_empty());
}

#[tokio::test]
async fn test_unconfigured_secret_rejects_everything() {
    let h = Harness::new().await;
    h.register("web", 4103).await;

    let unsigned = Dispatcher::new(SignatureVerifier::new(None));
    let result = unsigned.dispatch(&push_event("web", "main"), &*h.orchestrator).await;
    assert!(matches!(result, Err(OrchestratorError::VerificationFailed)));
}

#[tokio::test]
async fn test_non_push_event_ignored() {
    let h = Harness::new().await;
    h.register("web", 4104).await;

    let mut event = push_event("web", "main");
    event.event_type = Some("issues".to_string());
    let reason = ignored(dispatcher().dispatch(&event, &*h.orchestrator).await.unwrap());
    assert_eq!(reason, IgnoreReason::UnsupportedEvent("issues".to_string()));
}

#[tokio::test]
async fn test_gitlab_push_hook_accepted() {
    let h = Harness::new().await;
    h.register("web", 4105).await;

    let mut event = push_event("web", "main");
    event.event_type = Some("Push Hook".to_string());
    let decision = dispatcher().dispatch(&event, &*h.orchestrator).await.unwrap();
    assert!(decision.is_start());
}

#[tokio::test]
async fn test_unknown_project_ignored() {
    let h = Harness::new().await;

    let reason = ignored(
        dispatcher()
            .dispatch(&push_event("ghost", "main"), &*h.orchestrator)
            .await
            .unwrap(),
    );
    assert_eq!(reason, IgnoreReason::UnknownProject);
}

#[tokio::test]
async fn test_malformed_payload_ignored() {
    let h = Harness::new().await;
    h.register("web", 4106).await;

    let mut event = push_event("web", "main");
    event.payload = b"not json".to_vec();
    event.signature = dockyard::webhook::signature::sign(SECRET, &event.payload);
    let reason = ignored(dispatcher().dispatch(&event, &*h.orchestrator).await.unwrap());
    assert_eq!(reason, IgnoreReason::MalformedPayload);
}
