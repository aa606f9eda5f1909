//! Retention and rollback selection tests

use std::sync::Arc;

use chrono::Utc;

use dockyard::build::ArtifactRef;
use dockyard::deploy::retention::{FsSnapshotStore, RetentionManager, DEFAULT_MAX_SNAPSHOTS};
use dockyard::errors::OrchestratorError;
use dockyard::filesys::dir::Dir;
use dockyard::models::project::Project;
use dockyard::models::snapshot::VersionLabel;

use crate::support::new_project;

fn manager(dir: &tempfile::TempDir, max: usize) -> RetentionManager {
    let store = FsSnapshotStore::new(Dir::new(dir.path().join("snapshots")));
    RetentionManager::new(Arc::new(store), max)
}

fn project(id: &str) -> Project {
    new_project(id, 4301).into_project().unwrap()
}

#[tokio::test]
async fn test_keeps_exactly_the_newest() {
    let dir = tempfile::tempdir().unwrap();
    let retention = manager(&dir, DEFAULT_MAX_SNAPSHOTS);
    let project = project("web");

    let mut taken = Vec::new();
    for n in 0..8 {
        let artifact = ArtifactRef::new(format!("dockyard/web:v{}", n));
        taken.push(retention.snapshot(&project, &artifact, Utc::now()).await.unwrap());
        retention.prune("web").await;

        let kept = retention.list("web").await.unwrap();
        assert!(kept.len() <= DEFAULT_MAX_SNAPSHOTS);
    }

    let kept = retention.list("web").await.unwrap();
    assert_eq!(kept, taken[3..].to_vec());
}

#[tokio::test]
async fn test_prune_reports_deleted_count() {
    let dir = tempfile::tempdir().unwrap();
    let retention = manager(&dir, 2);
    let project = project("web");

    for n in 0..4 {
        let artifact = ArtifactRef::new(format!("dockyard/web:v{}", n));
        retention.snapshot(&project, &artifact, Utc::now()).await.unwrap();
    }
    assert_eq!(retention.prune("web").await, 2);
    assert_eq!(retention.prune("web").await, 0);
}

#[tokio::test]
async fn test_limit_below_one_keeps_one() {
    let dir = tempfile::tempdir().unwrap();
    let retention = manager(&dir, 0);
    assert_eq!(retention.max_snapshots(), 1);
}

#[tokio::test]
async fn test_projects_are_pruned_independently() {
    let dir = tempfile::tempdir().unwrap();
    let retention = manager(&dir, 1);

    for id in ["web", "api"] {
        let project = project(id);
        for n in 0..3 {
            let artifact = ArtifactRef::new(format!("dockyard/{}:v{}", id, n));
            retention.snapshot(&project, &artifact, Utc::now()).await.unwrap();
        }
    }
    retention.prune("web").await;

    assert_eq!(retention.list("web").await.unwrap().len(), 1);
    assert_eq!(retention.list("api").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_latest_before_and_find() {
    let dir = tempfile::tempdir().unwrap();
    let retention = manager(&dir, 5);
    let project = project("web");

    let old = retention
        .snapshot(&project, &ArtifactRef::new("dockyard/web:old"), Utc::now())
        .await
        .unwrap();
    let cutoff = Utc::now() + chrono::Duration::milliseconds(1);
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let new = retention
        .snapshot(&project, &ArtifactRef::new("dockyard/web:new"), Utc::now())
        .await
        .unwrap();

    assert_eq!(retention.latest_before("web", cutoff).await.unwrap(), Some(old.clone()));
    assert_eq!(retention.latest_before("web", Utc::now()).await.unwrap(), Some(new.clone()));
    assert_eq!(retention.latest_before("web", old.version.timestamp()).await.unwrap(), None);

    assert_eq!(retention.find("web", &new.version).await.unwrap(), new);
    let missing = VersionLabel::from_datetime(Utc::now());
    assert!(matches!(
        retention.find("web", &missing).await,
        Err(OrchestratorError::SnapshotNotFound { .. })
    ));
}

#[tokio::test]
async fn test_purge_removes_history() {
    let dir = tempfile::tempdir().unwrap();
    let retention = manager(&dir, 5);
    let project = project("web");

    retention
        .snapshot(&project, &ArtifactRef::new("dockyard/web:v1"), Utc::now())
        .await
        .unwrap();
    retention.purge("web").await.unwrap();
    assert!(retention.list("web").await.unwrap().is_empty());
}
