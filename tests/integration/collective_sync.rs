//! Collective view sharing and multi-participant convergence.

use crate::integration::test_utils::{commit_node, file, Network, FOLDER};
use foldsync::collective::{self, CollectiveView, GridCollective};
use foldsync::registry::FolderRegistry;
use std::fs;

#[tokio::test]
async fn test_three_participants_converge() {
    let net = Network::new().await;
    let names = ["alice", "bob", "carol"];
    let mut engines = Vec::new();
    for name in names {
        engines.push(net.participant(name).await);
    }

    for (engine, name) in engines.iter().zip(names) {
        let f = file(&format!("{}.txt", name));
        engine
            .on_local_change(&f, format!("written by {}", name).into_bytes())
            .await
            .unwrap();
    }

    // Two rounds: the first spreads every file, the second confirms.
    for _ in 0..2 {
        for engine in &engines {
            engine.sync_pass().await.unwrap();
        }
    }

    let expected = engines[0].heads();
    assert_eq!(expected.len(), 3);
    for (engine, name) in engines.iter().zip(names) {
        assert_eq!(engine.heads(), expected, "{} disagrees", name);
        let report = engine.sync_pass().await.unwrap();
        assert!(report.is_clean());
        assert!(report.adopted().next().is_none());
        for other in names {
            let content = fs::read(net.folder_root(name).join(format!("{}.txt", other))).unwrap();
            assert_eq!(content, format!("written by {}", other).into_bytes());
        }
    }
}

#[tokio::test]
async fn test_peers_with_separate_registries_see_each_other() {
    let net = Network::new().await;
    let alice = net.participant("alice").await;
    let bob = net.participant("bob").await;
    let f = file("a.txt");

    let alice_registry = FolderRegistry::open(net.registry_path("alice")).unwrap();
    let bob_registry = FolderRegistry::open(net.registry_path("bob")).unwrap();
    let alice_membership = alice_registry.membership(FOLDER).unwrap().unwrap();
    let bob_membership = bob_registry.membership(FOLDER).unwrap().unwrap();
    assert_eq!(alice_membership.collective, bob_membership.collective);
    assert_ne!(alice_membership.personal, bob_membership.personal);

    let outcome = alice.on_local_change(&f, b"from alice".to_vec()).await.unwrap();
    let report = bob.sync_pass().await.unwrap();

    assert_eq!(report.adopted().count(), 1);
    assert_eq!(bob.local_head(&f).as_ref(), Some(outcome.head()));
    let content = fs::read(net.folder_root("bob").join("a.txt")).unwrap();
    assert_eq!(content, b"from alice");
}

#[tokio::test]
async fn test_collective_pointer_survives_registry_reopen() {
    let net = Network::new().await;
    let alice = net.participant("alice").await;
    let f = file("notes/today.md");
    let outcome = alice.on_local_change(&f, b"# today".to_vec()).await.unwrap();

    let registry = FolderRegistry::open(net.registry_path("alice")).unwrap();
    let membership = registry.membership(FOLDER).unwrap().unwrap();

    let reopened = GridCollective::new(net.grid.clone(), FOLDER, membership);
    assert_eq!(reopened.participants().await.unwrap(), vec!["alice"]);
    assert_eq!(
        reopened.read_head("alice", &f).await.unwrap().as_ref(),
        Some(outcome.head())
    );
}

#[tokio::test]
async fn test_publishers_keep_each_others_heads() {
    let net = Network::new().await;
    let alice = net.view("alice").await;
    let bob = net.view("bob").await;
    let a = file("a.txt");
    let b = file("b.txt");
    let ha = commit_node(&net.grid, "alice", b"a", vec![], 1).await;
    let hb = commit_node(&net.grid, "bob", b"b", vec![], 2).await;

    bob.publish_head(&b, &hb).await.unwrap();
    alice.publish_head(&a, &ha).await.unwrap();

    let registry = FolderRegistry::open(net.registry_path("alice")).unwrap();
    let fresh = GridCollective::new(
        net.grid.clone(),
        FOLDER,
        registry.membership(FOLDER).unwrap().unwrap(),
    );
    assert_eq!(fresh.participants().await.unwrap(), vec!["alice", "bob"]);
    assert_eq!(fresh.read_head("alice", &a).await.unwrap(), Some(ha));
    assert_eq!(fresh.read_head("bob", &b).await.unwrap(), Some(hb));
    assert_eq!(fresh.read_head("alice", &b).await.unwrap(), None);
}

#[tokio::test]
async fn test_folders_do_not_share_heads() {
    let net = Network::new().await;
    let registry = FolderRegistry::open(net.registry_path("alice")).unwrap();
    let photos_membership = collective::create(&*net.grid, "alice").await.unwrap();
    let docs_membership = collective::create(&*net.grid, "alice").await.unwrap();
    registry.set_membership("photos", &photos_membership).unwrap();
    registry.set_membership(FOLDER, &docs_membership).unwrap();

    let photos = GridCollective::new(net.grid.clone(), "photos", photos_membership);
    let docs = GridCollective::new(net.grid.clone(), FOLDER, docs_membership);

    let head = commit_node(&net.grid, "alice", b"img", vec![], 1).await;
    photos.publish_head(&file("cat.jpg"), &head).await.unwrap();

    assert!(docs.read_heads("alice").await.unwrap().is_empty());
    assert_eq!(photos.read_heads("alice").await.unwrap().len(), 1);
    let folders: Vec<String> = registry
        .list()
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(folders, vec!["docs", "photos"]);
}

#[tokio::test]
async fn test_republishing_replaces_only_that_file() {
    let net = Network::new().await;
    let alice = net.view("alice").await;
    let a = file("a.txt");
    let b = file("b.txt");
    let h1 = commit_node(&net.grid, "alice", b"1", vec![], 1).await;
    let h2 = commit_node(&net.grid, "alice", b"2", vec![], 2).await;
    let h3 = commit_node(&net.grid, "alice", b"3", vec![h1.clone()], 3).await;

    alice.publish_head(&a, &h1).await.unwrap();
    alice.publish_head(&b, &h2).await.unwrap();
    alice.publish_head(&a, &h3).await.unwrap();

    let heads = alice.read_heads("alice").await.unwrap();
    assert_eq!(heads.len(), 2);
    assert_eq!(heads.get(&a), Some(&h3));
    assert_eq!(heads.get(&b), Some(&h2));
}
