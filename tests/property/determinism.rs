//! Property-based tests for determinism guarantees

use foldsync::address::{address, address_directory};
use foldsync::dag::AncestryWalker;
use foldsync::identity::Identity;
use foldsync::path::{escape_entry_name, unescape_entry_name};
use foldsync::reconcile::{reconcile, SyncState};
use foldsync::snapshot::{Snapshot, SnapshotMetadata};
use foldsync::store::{encode_linked_directory, LinkTarget, LinkedDirectory, MemoryGrid, ObjectStore};
use foldsync::types::Capability;
use proptest::prelude::*;
use std::sync::Arc;

/// Test that content capabilities are deterministic
#[test]
fn test_content_address_determinism_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(any::<Vec<u8>>(), any::<Vec<u8>>()),
            |(content1, content2)| {
                prop_assert_eq!(address(&content1), address(&content1.clone()));
                if content1 != content2 {
                    prop_assert_ne!(address(&content1), address(&content2));
                }
                // Blobs and directories never share a capability.
                prop_assert_ne!(address(&content1), address_directory(&content1));
                Ok(())
            },
        )
        .unwrap();
}

/// Test that directory encoding does not depend on insertion order
#[test]
fn test_directory_encoding_order_independent() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &proptest::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,16}", 0..12),
            |entries| {
                let forward: LinkedDirectory = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), LinkTarget::Literal(v.clone())))
                    .collect();
                let mut reverse = LinkedDirectory::new();
                for (k, v) in entries.iter().rev() {
                    reverse.insert(k.clone(), LinkTarget::Literal(v.clone()));
                }
                prop_assert_eq!(
                    encode_linked_directory(&forward, 42).unwrap(),
                    encode_linked_directory(&reverse, 42).unwrap()
                );
                Ok(())
            },
        )
        .unwrap();
}

proptest! {
    /// Escaping is reversible and never produces a slash
    #[test]
    fn test_entry_name_escape_roundtrip(name in "[a-zA-Z0-9@/._ -]{1,24}") {
        let escaped = escape_entry_name(&name);
        prop_assert!(!escaped.contains('/'));
        prop_assert_eq!(unescape_entry_name(&escaped).unwrap(), name);
    }

    /// Every version of a linear history is an ancestor of every later one,
    /// and never of itself or an earlier one
    #[test]
    fn test_chain_ancestry_property(length in 1usize..12, i in 0usize..12, j in 0usize..12) {
        prop_assume!(i < length && j < length);

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let (expected, state) = rt.block_on(async {
            let grid = Arc::new(MemoryGrid::new());
            let identity = Identity::from_secret_bytes("prop", &[5u8; 32]).unwrap();
            let mut chain: Vec<Capability> = Vec::with_capacity(length);
            for n in 0..length {
                let content = grid.put_immutable(format!("v{}", n).as_bytes()).await.unwrap();
                let parents = chain.last().cloned().into_iter().collect();
                let snapshot = Snapshot::sign(&identity, content, parents, n as i64, SnapshotMetadata::new());
                chain.push(snapshot.commit(&*grid).await.unwrap());
            }

            let walker = AncestryWalker::new(grid.clone());
            let expected = i < j;
            assert_eq!(walker.is_ancestor(&chain[i], &chain[j]).await.unwrap(), expected);
            let decision = reconcile(&walker, Some(&chain[i]), Some(&chain[j])).await.unwrap();
            (expected, decision.state)
        });

        let wanted = if i == j {
            SyncState::InSync
        } else if expected {
            SyncState::RemoteAhead
        } else {
            SyncState::LocalAhead
        };
        prop_assert_eq!(state, wanted);
    }
}
