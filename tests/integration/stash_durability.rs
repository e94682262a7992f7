//! Crash and outage recovery through the local snapshot stash.

use crate::integration::test_utils::{file, Network};
use foldsync::collective::CollectiveView;
use foldsync::error::StoreError;
use foldsync::snapshot::Snapshot;
use foldsync::store::memory::Operation;
use std::fs;

fn outage() -> StoreError {
    StoreError::Unavailable("connection reset".into())
}

#[tokio::test]
async fn test_failed_commit_resumes_after_restart_without_reupload() {
    let net = Network::new().await;
    let f = file("a.txt");

    {
        let alice = net.participant("alice").await;
        net.grid.inject_failure(Operation::PutDirectory, outage());

        let err = alice.on_local_change(&f, b"precious".to_vec()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(alice.local_head(&f), None);
        assert_eq!(net.grid.put_immutable_calls(), 1);
    }

    // Reopen over the same state directory, as after a restart.
    let alice = net.participant("alice").await;
    let resumed = alice.resume_pending().await.unwrap();
    assert_eq!(resumed.len(), 1);
    let head = resumed[0].1.as_ref().unwrap().clone();

    assert_eq!(net.grid.put_immutable_calls(), 1);
    assert_eq!(alice.local_head(&f), Some(head.clone()));
    let seen_by_bob = net.view("bob").await.read_head("alice", &f).await.unwrap();
    assert_eq!(seen_by_bob, Some(head.clone()));

    let snapshot = Snapshot::load(&*net.grid, &head).await.unwrap();
    assert!(snapshot.is_root());
    assert!(alice.resume_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_next_edit_builds_on_pending_snapshot() {
    let net = Network::new().await;
    let alice = net.participant("alice").await;
    let f = file("a.txt");

    net.grid.inject_failure(Operation::PutDirectory, outage());
    assert!(alice.on_local_change(&f, b"v1".to_vec()).await.is_err());

    let v2 = alice.on_local_change(&f, b"v2".to_vec()).await.unwrap();
    let tip = Snapshot::load(&*net.grid, v2.head()).await.unwrap();
    assert_eq!(tip.parents.len(), 1);

    let v1 = Snapshot::load(&*net.grid, &tip.parents[0]).await.unwrap();
    assert!(v1.is_root());
    assert_eq!(alice.local_head(&f).as_ref(), Some(v2.head()));
}

#[tokio::test]
async fn test_retry_policy_rides_out_short_outage() {
    use foldsync::identity::Identity;
    use foldsync::retry::RetryPolicy;
    use foldsync::sync::{SyncEngine, SyncOptions};
    use std::time::Duration;

    let net = Network::new().await;
    let root = net.folder_root("alice");
    fs::create_dir_all(&root).unwrap();
    let alice = SyncEngine::open(
        "docs",
        root,
        &net.state_dir("alice"),
        net.grid.clone(),
        Identity::from_secret_bytes("alice", &[7u8; 32]).unwrap(),
        net.view("alice").await,
        SyncOptions {
            retry: RetryPolicy::new(3, Duration::from_millis(1)),
            ..SyncOptions::default()
        },
    )
    .unwrap();

    net.grid.inject_failure(Operation::PutImmutable, outage());
    net.grid.inject_failure(Operation::PutDirectory, outage());
    net.grid.inject_failure(Operation::Mutate, outage());

    let outcome = alice
        .on_local_change(&file("a.txt"), b"eventually".to_vec())
        .await
        .unwrap();
    assert!(alice.local_head(&file("a.txt")).is_some());
    assert_eq!(alice.local_head(&file("a.txt")).as_ref(), Some(outcome.head()));
}

#[tokio::test]
async fn test_adoption_discards_pending_local_state() {
    let net = Network::new().await;
    let alice = net.participant("alice").await;
    let bob = net.participant("bob").await;
    let f = file("a.txt");

    let remote = alice.on_local_change(&f, b"alice".to_vec()).await.unwrap();

    net.grid.inject_failure(Operation::PutDirectory, outage());
    assert!(bob.on_local_change(&f, b"bob draft".to_vec()).await.is_err());

    let report = bob.sync_pass().await.unwrap();
    assert_eq!(report.adopted().count(), 1);
    assert_eq!(bob.local_head(&f).as_ref(), Some(remote.head()));
    assert!(bob.resume_pending().await.unwrap().is_empty());
    assert_eq!(fs::read(net.folder_root("bob").join("a.txt")).unwrap(), b"alice");
}
