//! Ancestor determination over the snapshot DAG.
//!
//! Snapshots live in the store, keyed by capability; parent links are
//! capability values resolved through an [`AncestryWalker`]. A walker
//! memoizes every node it resolves and is meant to live for one
//! synchronization pass.

use crate::error::SyncError;
use crate::snapshot::Snapshot;
use crate::store::ObjectStore;
use crate::types::Capability;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// On the current path from the head.
    Open,
    /// Fully explored; `candidate` is not among its ancestors.
    Done,
}

pub struct AncestryWalker {
    store: Arc<dyn ObjectStore>,
    cache: RwLock<HashMap<Capability, Arc<Snapshot>>>,
}

impl AncestryWalker {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Number of snapshots resolved so far.
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }

    /// Resolve a snapshot, from the cache when possible.
    ///
    /// Entries are only ever inserted, never replaced: a capability names
    /// immutable content, so two concurrent fetches produce equal values.
    pub async fn snapshot(&self, capability: &Capability) -> Result<Arc<Snapshot>, SyncError> {
        let hit = self.cache.read().get(capability).cloned();
        if let Some(hit) = hit {
            debug!(capability = %capability, "Snapshot cache hit");
            return Ok(hit);
        }

        let snapshot = Arc::new(Snapshot::load(self.store.as_ref(), capability).await?);
        Ok(self
            .cache
            .write()
            .entry(capability.clone())
            .or_insert(snapshot)
            .clone())
    }

    /// Whether `candidate` is a strict ancestor of `head`.
    ///
    /// Depth-first over parent links starting at `head`'s parents, so a
    /// snapshot is never its own ancestor. Shared ancestors reached along
    /// several paths are explored once. Reaching a snapshot that is still on
    /// the current path means the history loops back on itself, which is
    /// reported as [`SyncError::CycleDetected`].
    pub async fn is_ancestor(&self, candidate: &Capability, head: &Capability) -> Result<bool, SyncError> {
        let mut marks: HashMap<Capability, Mark> = HashMap::new();
        let root = self.snapshot(head).await?;
        marks.insert(head.clone(), Mark::Open);
        let mut stack = vec![(head.clone(), root.parents.clone().into_iter())];

        while let Some((node, parents)) = stack.last_mut() {
            let Some(parent) = parents.next() else {
                marks.insert(node.clone(), Mark::Done);
                stack.pop();
                continue;
            };

            match marks.get(&parent) {
                Some(Mark::Open) => {
                    error!(capability = %parent, head = %head, "Cycle in snapshot history");
                    return Err(SyncError::CycleDetected { capability: parent });
                }
                Some(Mark::Done) => continue,
                None => {}
            }
            if &parent == candidate {
                return Ok(true);
            }

            let snapshot = self.snapshot(&parent).await?;
            marks.insert(parent.clone(), Mark::Open);
            stack.push((parent, snapshot.parents.clone().into_iter()));
        }

        Ok(false)
    }
}
