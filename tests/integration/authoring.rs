//! Authoring pipeline through the sync engine: scans, chains, policies.

use crate::integration::test_utils::{file, Network};
use foldsync::identity::Identity;
use foldsync::snapshot::{AuthorOutcome, NoChangePolicy, Snapshot};
use foldsync::store::ObjectStore;
use std::fs;
use tempfile::TempDir;

#[tokio::test]
async fn test_scan_authors_every_file_once() {
    let net = Network::new().await;
    let alice = net.participant("alice").await;
    let root = net.folder_root("alice");
    fs::create_dir_all(root.join("notes")).unwrap();
    fs::write(root.join("a.txt"), b"a").unwrap();
    fs::write(root.join("notes/b.txt"), b"b").unwrap();
    fs::write(root.join("partial.tmp"), b"ignored").unwrap();
    fs::create_dir_all(root.join(".git")).unwrap();
    fs::write(root.join(".git/HEAD"), b"ignored").unwrap();

    let outcomes = alice.scan().await.unwrap();
    let files: Vec<&str> = outcomes.iter().map(|o| o.file.as_str()).collect();
    assert_eq!(files, vec!["a.txt", "notes/b.txt"]);
    assert!(outcomes
        .iter()
        .all(|o| o.result.as_ref().unwrap().is_created()));
    assert_eq!(alice.heads().len(), 2);

    let again = alice.scan().await.unwrap();
    assert!(again
        .iter()
        .all(|o| !o.result.as_ref().unwrap().is_created()));
}

#[tokio::test]
async fn test_edits_form_a_signed_chain() {
    let net = Network::new().await;
    let alice = net.participant("alice").await;
    let f = file("a.txt");

    let first = alice.on_local_change(&f, b"one".to_vec()).await.unwrap();
    let second = alice.on_local_change(&f, b"two".to_vec()).await.unwrap();

    let root = Snapshot::load(&*net.grid, first.head()).await.unwrap();
    let tip = Snapshot::load(&*net.grid, second.head()).await.unwrap();

    assert!(root.is_root());
    assert_eq!(tip.parents, vec![first.head().clone()]);
    assert!(tip.timestamp >= root.timestamp);
    assert!(root.verify_author());
    assert!(tip.verify_author());
    assert_eq!(tip.author.name, "alice");
    assert_eq!(net.grid.get(&tip.content).await.unwrap(), b"two");
}

#[tokio::test]
async fn test_always_create_chains_identical_content() {
    let net = Network::new().await;
    let alice = net.participant_with("alice", NoChangePolicy::AlwaysCreate).await;
    let f = file("a.txt");

    let first = alice.on_local_change(&f, b"same".to_vec()).await.unwrap();
    let second = alice.on_local_change(&f, b"same".to_vec()).await.unwrap();

    assert!(second.is_created());
    assert_ne!(first.head(), second.head());
    let tip = Snapshot::load(&*net.grid, second.head()).await.unwrap();
    assert_eq!(tip.parents, vec![first.head().clone()]);
}

#[tokio::test]
async fn test_unchanged_content_returns_existing_head() {
    let net = Network::new().await;
    let alice = net.participant("alice").await;
    let f = file("a.txt");

    let first = alice.on_local_change(&f, b"same".to_vec()).await.unwrap();
    let directories = net.grid.put_directory_calls();
    let second = alice.on_local_change(&f, b"same".to_vec()).await.unwrap();

    assert_eq!(
        second,
        AuthorOutcome::Unchanged {
            head: first.head().clone()
        }
    );
    assert_eq!(net.grid.put_directory_calls(), directories);
}

#[tokio::test]
async fn test_tampered_snapshot_fails_verification() {
    let net = Network::new().await;
    let alice = net.participant("alice").await;
    let outcome = alice
        .on_local_change(&file("a.txt"), b"signed".to_vec())
        .await
        .unwrap();

    let mut snapshot = Snapshot::load(&*net.grid, outcome.head()).await.unwrap();
    snapshot.timestamp += 1;
    assert!(!snapshot.verify_author());
}

#[test]
fn test_identity_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("identity.json");

    let created = Identity::load_or_create(&path, "alice").unwrap();
    let loaded = Identity::load_or_create(&path, "alice").unwrap();
    assert_eq!(created.public_key_hex(), loaded.public_key_hex());

    assert!(Identity::load_or_create(&path, "bob").is_err());
}
