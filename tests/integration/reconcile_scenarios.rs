//! Two-party and three-party reconciliation scenarios run end to end.

use crate::integration::test_utils::{commit_node, file, identity, Network};
use foldsync::collective::CollectiveView;
use foldsync::dag::AncestryWalker;
use foldsync::error::SyncError;
use foldsync::reconcile::{reconcile, Action, SyncState};
use foldsync::snapshot::{Snapshot, SnapshotMetadata};
use foldsync::store::{encode_linked_directory, LinkTarget, LinkedDirectory, ObjectStore};
use foldsync::types::Capability;
use std::fs;

#[tokio::test]
async fn test_divergent_edits_are_reported_not_merged() {
    let net = Network::new().await;
    let alice = net.participant("alice").await;
    let bob = net.participant("bob").await;
    let f = file("shared.txt");

    alice.on_local_change(&f, b"base".to_vec()).await.unwrap();
    bob.sync_pass().await.unwrap();

    let a = alice.on_local_change(&f, b"alice edit".to_vec()).await.unwrap();
    let b = bob.on_local_change(&f, b"bob edit".to_vec()).await.unwrap();
    fs::write(net.folder_root("bob").join("shared.txt"), b"bob edit").unwrap();

    let report = bob.sync_pass().await.unwrap();
    assert_eq!(report.state_of("alice", &f), Some(SyncState::Diverged));
    assert_eq!(report.conflicts().count(), 1);
    assert!(!report.is_clean());

    let decision = report.outcomes[0].result.as_ref().unwrap();
    assert_eq!(
        decision.action,
        Action::Conflict {
            local: b.head().clone(),
            remote: a.head().clone(),
        }
    );

    // Neither side moved.
    assert_eq!(bob.local_head(&f).as_ref(), Some(b.head()));
    assert_eq!(
        fs::read(net.folder_root("bob").join("shared.txt")).unwrap(),
        b"bob edit"
    );
    let alice_report = alice.sync_pass().await.unwrap();
    assert_eq!(alice_report.state_of("bob", &f), Some(SyncState::Diverged));
    assert_eq!(alice.local_head(&f).as_ref(), Some(a.head()));
}

#[tokio::test]
async fn test_local_ahead_then_fast_forward_back() {
    let net = Network::new().await;
    let alice = net.participant("alice").await;
    let bob = net.participant("bob").await;
    let f = file("a.txt");

    alice.on_local_change(&f, b"v1".to_vec()).await.unwrap();
    bob.sync_pass().await.unwrap();
    let v2 = bob.on_local_change(&f, b"v2".to_vec()).await.unwrap();

    let bob_report = bob.sync_pass().await.unwrap();
    assert_eq!(bob_report.state_of("alice", &f), Some(SyncState::LocalAhead));

    let alice_report = alice.sync_pass().await.unwrap();
    assert_eq!(alice_report.state_of("bob", &f), Some(SyncState::RemoteAhead));
    assert_eq!(alice.local_head(&f).as_ref(), Some(v2.head()));
    assert_eq!(fs::read(net.folder_root("alice").join("a.txt")).unwrap(), b"v2");
}

#[tokio::test]
async fn test_fast_forward_skips_intermediate_versions() {
    let net = Network::new().await;
    let alice = net.participant("alice").await;
    let bob = net.participant("bob").await;
    let f = file("a.txt");

    alice.on_local_change(&f, b"v1".to_vec()).await.unwrap();
    bob.sync_pass().await.unwrap();
    alice.on_local_change(&f, b"v2".to_vec()).await.unwrap();
    let v3 = alice.on_local_change(&f, b"v3".to_vec()).await.unwrap();

    let report = bob.sync_pass().await.unwrap();
    assert_eq!(report.adopted().count(), 1);
    assert_eq!(bob.local_head(&f).as_ref(), Some(v3.head()));
    assert_eq!(fs::read(net.folder_root("bob").join("a.txt")).unwrap(), b"v3");
}

#[tokio::test]
async fn test_peers_for_one_file_apply_in_turn() {
    let net = Network::new().await;
    let alice = net.participant("alice").await;
    let bob = net.participant("bob").await;
    let carol = net.participant("carol").await;
    let f = file("a.txt");

    alice.on_local_change(&f, b"v1".to_vec()).await.unwrap();
    bob.sync_pass().await.unwrap();
    let v2 = bob.on_local_change(&f, b"v2".to_vec()).await.unwrap();

    let report = carol.sync_pass().await.unwrap();
    assert_eq!(report.state_of("alice", &f), Some(SyncState::RemoteAhead));
    assert_eq!(report.state_of("bob", &f), Some(SyncState::RemoteAhead));
    assert_eq!(carol.local_head(&f).as_ref(), Some(v2.head()));

    let again = carol.sync_pass().await.unwrap();
    assert_eq!(again.state_of("alice", &f), Some(SyncState::LocalAhead));
    assert_eq!(again.state_of("bob", &f), Some(SyncState::InSync));
}

#[tokio::test]
async fn test_corrupt_peer_history_fails_only_that_pair() {
    let net = Network::new().await;
    let bob = net.participant("bob").await;
    let clean = file("clean.txt");
    let corrupt = file("corrupt.txt");

    bob.on_local_change(&corrupt, b"mine".to_vec()).await.unwrap();

    // Two nodes naming each other as parent.
    let content = net.grid.put_immutable(b"x").await.unwrap();
    let x = Capability::new("URI:DIR2-CHK:cycle-x");
    let y = Capability::new("URI:DIR2-CHK:cycle-y");
    let node = |parent: &Capability| {
        let mut entries = LinkedDirectory::new();
        entries.insert("content".into(), LinkTarget::File(content.clone()));
        entries.insert("version".into(), LinkTarget::Literal("1".into()));
        entries.insert("parent0".into(), LinkTarget::Directory(parent.clone()));
        encode_linked_directory(&entries, 1).unwrap()
    };
    net.grid.insert_raw(x.clone(), node(&y));
    net.grid.insert_raw(y.clone(), node(&x));

    let good = commit_node(&net.grid, "mallory", b"fine", vec![], 5).await;
    let mallory = net.view("mallory").await;
    mallory.publish_head(&corrupt, &x).await.unwrap();
    mallory.publish_head(&clean, &good).await.unwrap();

    let report = bob.sync_pass().await.unwrap();
    let failed: Vec<_> = report.failures().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].file, corrupt);
    assert!(matches!(
        failed[0].result,
        Err(SyncError::CycleDetected { .. })
    ));
    assert_eq!(report.state_of("mallory", &clean), Some(SyncState::RemoteAhead));
    assert_eq!(bob.local_head(&clean).as_ref(), Some(&good));
}

#[tokio::test]
async fn test_tampered_snapshot_is_not_adopted() {
    let net = Network::new().await;
    let bob = net.participant("bob").await;
    let f = file("forged.txt");

    let content = net.grid.put_immutable(b"forged").await.unwrap();
    let mut forged = Snapshot::sign(&identity("mallory"), content, vec![], 5, SnapshotMetadata::new());
    forged.timestamp = 6;
    assert!(!forged.verify_author());
    let head = forged.commit(&*net.grid).await.unwrap();
    net.view("mallory").await.publish_head(&f, &head).await.unwrap();

    let report = bob.sync_pass().await.unwrap();
    let failed: Vec<_> = report.failures().collect();
    assert_eq!(failed.len(), 1);
    assert!(matches!(failed[0].result, Err(SyncError::InvalidSnapshot(_))));
    assert_eq!(report.adopted().count(), 0);
    assert_eq!(bob.local_head(&f), None);
    assert!(!net.folder_root("bob").join("forged.txt").exists());
}

#[tokio::test]
async fn test_decision_table_is_total() {
    let net = Network::new().await;
    let a = commit_node(&net.grid, "alice", b"a", vec![], 1).await;
    let b = commit_node(&net.grid, "alice", b"b", vec![a.clone()], 2).await;
    let walker = AncestryWalker::new(net.grid.clone());

    let cases = [
        (None, None, SyncState::InSync),
        (Some(&a), None, SyncState::LocalAhead),
        (None, Some(&a), SyncState::RemoteAhead),
        (Some(&a), Some(&a), SyncState::InSync),
        (Some(&b), Some(&a), SyncState::LocalAhead),
        (Some(&a), Some(&b), SyncState::RemoteAhead),
    ];
    for (local, remote, expected) in cases {
        let decision = reconcile(&walker, local, remote).await.unwrap();
        assert_eq!(decision.state, expected, "local={:?} remote={:?}", local, remote);
    }
}
