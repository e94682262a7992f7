//! Shared test utilities for integration tests
//!
//! Every participant gets its own folder, state directory and folder
//! registry under one temp dir. They share only the in-memory grid, the way
//! peers share a grid node, and find each other through the collective the
//! network hosts and invites them into.

use foldsync::collective::{self, GridCollective, Invite};
use foldsync::identity::Identity;
use foldsync::registry::{FolderRegistry, Membership};
use foldsync::retry::RetryPolicy;
use foldsync::snapshot::{NoChangePolicy, Snapshot, SnapshotMetadata};
use foldsync::store::{MemoryGrid, ObjectStore};
use foldsync::sync::{SyncEngine, SyncOptions};
use foldsync::types::{Capability, FileId};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub const FOLDER: &str = "docs";

/// Name the hosting administrator is created under and then unlinked as.
const HOST: &str = "host";

/// One grid, one collective, any number of participants.
pub struct Network {
    pub dir: TempDir,
    pub grid: Arc<MemoryGrid>,
    host: Membership,
}

impl Network {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let grid = Arc::new(MemoryGrid::new());
        let host = collective::create(&*grid, HOST).await.unwrap();
        let admin = host.admin.clone().unwrap();
        grid.remove_link(&admin, HOST).await.unwrap();
        Self { dir, grid, host }
    }

    pub fn folder_root(&self, name: &str) -> PathBuf {
        self.dir.path().join(name).join("folder")
    }

    pub fn state_dir(&self, name: &str) -> PathBuf {
        self.dir.path().join(name).join("state")
    }

    pub fn registry_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name).join("folders.json")
    }

    /// `name`'s membership, inviting and joining on first use. Later calls
    /// read it back from `name`'s own registry.
    pub async fn membership(&self, name: &str) -> Membership {
        let registry = FolderRegistry::open(self.registry_path(name)).unwrap();
        if let Some(membership) = registry.membership(FOLDER).unwrap() {
            return membership;
        }
        let code = collective::invite(&*self.grid, &self.host, name)
            .await
            .unwrap()
            .to_string();
        let membership = collective::join(&*self.grid, &Invite::parse(&code).unwrap(), name)
            .await
            .unwrap();
        registry.set_membership(FOLDER, &membership).unwrap();
        membership
    }

    /// `name`'s own view of the collective.
    pub async fn view(&self, name: &str) -> Arc<GridCollective> {
        let membership = self.membership(name).await;
        Arc::new(GridCollective::new(self.grid.clone(), FOLDER, membership))
    }

    pub async fn participant(&self, name: &str) -> SyncEngine {
        self.participant_with(name, NoChangePolicy::SkipUnchanged).await
    }

    pub async fn participant_with(&self, name: &str, policy: NoChangePolicy) -> SyncEngine {
        let root = self.folder_root(name);
        std::fs::create_dir_all(&root).unwrap();
        SyncEngine::open(
            FOLDER,
            root,
            &self.state_dir(name),
            self.grid.clone(),
            identity(name),
            self.view(name).await,
            SyncOptions {
                no_change_policy: policy,
                retry: RetryPolicy::none(),
                ..SyncOptions::default()
            },
        )
        .unwrap()
    }
}

/// Deterministic identity per participant name.
pub fn identity(name: &str) -> Identity {
    let mut secret = [0u8; 32];
    for (slot, byte) in secret.iter_mut().zip(name.bytes().cycle()) {
        *slot = byte;
    }
    Identity::from_secret_bytes(name, &secret).unwrap()
}

pub fn file(relpath: &str) -> FileId {
    FileId::new(relpath).unwrap()
}

/// Commit a snapshot directly to the grid, bypassing the authoring pipeline.
pub async fn commit_node(
    grid: &MemoryGrid,
    author: &str,
    content: &[u8],
    parents: Vec<Capability>,
    timestamp: i64,
) -> Capability {
    let content = grid.put_immutable(content).await.unwrap();
    Snapshot::sign(&identity(author), content, parents, timestamp, SnapshotMetadata::new())
        .commit(grid)
        .await
        .unwrap()
}
