//! Snapshot authoring pipeline
//!
//! stash → upload content → publish node → record. Content is stashed under
//! its address before any store call, and each completed step is recorded in
//! the stash, so a pipeline interrupted anywhere can be resumed without
//! repeating an upload that already succeeded.

use crate::address::address;
use crate::error::SyncError;
use crate::identity::Identity;
use crate::snapshot::{Snapshot, SnapshotMetadata};
use crate::stash::{CommittedRecord, LocalSnapshotStash, StashEntry};
use crate::store::ObjectStore;
use crate::types::{Capability, FileId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument};

/// What to do when new content is byte-identical to the parent's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoChangePolicy {
    /// Report [`AuthorOutcome::Unchanged`] and publish nothing.
    #[default]
    SkipUnchanged,
    /// Always publish a new snapshot node.
    AlwaysCreate,
}

/// Input to one authoring run.
#[derive(Debug, Clone)]
pub struct AuthorRequest {
    pub file: FileId,
    pub content: Vec<u8>,
    /// Current head(s) of the file, empty for a new file.
    pub parents: Vec<Capability>,
    pub metadata: SnapshotMetadata,
}

impl AuthorRequest {
    pub fn new(file: FileId, content: Vec<u8>, parents: Vec<Capability>) -> Self {
        Self {
            file,
            content,
            parents,
            metadata: SnapshotMetadata::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorOutcome {
    Created {
        head: Capability,
        snapshot: Snapshot,
        content_address: Capability,
    },
    /// Content matched the parent; `head` is the unchanged parent.
    Unchanged { head: Capability },
}

impl AuthorOutcome {
    pub fn head(&self) -> &Capability {
        match self {
            AuthorOutcome::Created { head, .. } | AuthorOutcome::Unchanged { head } => head,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, AuthorOutcome::Created { .. })
    }
}

/// Per-file async locks.
///
/// At most one authoring or adoption runs for a file at a time. Lock entries
/// are created on demand and live for the process.
#[derive(Default)]
pub struct FileLocks {
    locks: parking_lot::Mutex<HashMap<FileId, Arc<Mutex<()>>>>,
}

/// Exclusive hold on one file, released on drop.
pub struct FileLease {
    file: FileId,
    _guard: OwnedMutexGuard<()>,
}

impl FileLease {
    pub fn file(&self) -> &FileId {
        &self.file
    }
}

impl FileLocks {
    pub async fn acquire(&self, file: &FileId) -> FileLease {
        let lock = self
            .locks
            .lock()
            .entry(file.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        FileLease {
            file: file.clone(),
            _guard: lock.lock_owned().await,
        }
    }
}

/// Content address and timestamp of a parent snapshot.
struct ParentFacts {
    content_address: Capability,
    timestamp: Timestamp,
}

pub struct SnapshotAuthor {
    store: Arc<dyn ObjectStore>,
    stash: Arc<LocalSnapshotStash>,
    identity: Identity,
    policy: NoChangePolicy,
    locks: FileLocks,
}

impl SnapshotAuthor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        stash: Arc<LocalSnapshotStash>,
        identity: Identity,
        policy: NoChangePolicy,
    ) -> Self {
        Self {
            store,
            stash,
            identity,
            policy,
            locks: FileLocks::default(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn stash(&self) -> &Arc<LocalSnapshotStash> {
        &self.stash
    }

    pub fn policy(&self) -> NoChangePolicy {
        self.policy
    }

    /// Take the per-file lock shared with authoring.
    pub async fn lease(&self, file: &FileId) -> FileLease {
        self.locks.acquire(file).await
    }

    /// Author a new version of `request.file`.
    ///
    /// A pending entry left by an interrupted run is committed first and its
    /// head replaces the requested parents.
    pub async fn author(&self, request: AuthorRequest) -> Result<AuthorOutcome, SyncError> {
        let lease = self.locks.acquire(&request.file).await;
        self.author_leased(&lease, request).await
    }

    /// [`Self::author`] for a caller already holding the file's lease.
    #[instrument(skip(self, lease, request), fields(file = %request.file))]
    pub async fn author_leased(
        &self,
        lease: &FileLease,
        request: AuthorRequest,
    ) -> Result<AuthorOutcome, SyncError> {
        debug_assert_eq!(lease.file(), &request.file);

        let mut parents = request.parents;
        if let Some(pending) = self.stash.pending(&request.file)? {
            info!("Committing pending snapshot before authoring");
            let head = self.commit_entry(pending).await?;
            parents = vec![head];
        }

        let content_address = address(&request.content);
        let mut parent_facts = Vec::with_capacity(parents.len());
        for parent in &parents {
            parent_facts.push(self.parent_facts(parent).await?);
        }

        if self.policy == NoChangePolicy::SkipUnchanged {
            if let ([head], [facts]) = (parents.as_slice(), parent_facts.as_slice()) {
                if facts.content_address == content_address {
                    debug!(head = %head, "Content unchanged; no snapshot created");
                    return Ok(AuthorOutcome::Unchanged { head: head.clone() });
                }
            }
        }

        // Timestamps never go backwards along a parent chain.
        let now = chrono::Utc::now().timestamp();
        let timestamp = parent_facts
            .iter()
            .map(|facts| facts.timestamp)
            .fold(now, Timestamp::max);

        let entry = StashEntry {
            file: request.file.clone(),
            content_address: content_address.clone(),
            parents,
            timestamp,
            metadata: request.metadata,
            content_cap: None,
        };
        self.stash.stage(&entry, &request.content)?;

        let (head, snapshot) = self.commit_staged(entry).await?;
        Ok(AuthorOutcome::Created {
            head,
            snapshot,
            content_address,
        })
    }

    /// Commit the pending entry for `file`, if any.
    pub async fn resume(&self, file: &FileId) -> Result<Option<AuthorOutcome>, SyncError> {
        let lease = self.locks.acquire(file).await;
        self.resume_leased(&lease).await
    }

    pub async fn resume_leased(&self, lease: &FileLease) -> Result<Option<AuthorOutcome>, SyncError> {
        let Some(entry) = self.stash.pending(lease.file())? else {
            return Ok(None);
        };
        let content_address = entry.content_address.clone();
        let (head, snapshot) = self.commit_staged(entry).await?;
        Ok(Some(AuthorOutcome::Created {
            head,
            snapshot,
            content_address,
        }))
    }

    async fn commit_entry(&self, entry: StashEntry) -> Result<Capability, SyncError> {
        Ok(self.commit_staged(entry).await?.0)
    }

    /// Upload content unless already uploaded, then publish the node.
    async fn commit_staged(&self, entry: StashEntry) -> Result<(Capability, Snapshot), SyncError> {
        let content_cap = match entry.content_cap.clone() {
            Some(cap) => cap,
            None => match self.stash.uploaded(&entry.content_address)? {
                Some(cap) => {
                    debug!(content = %cap, "Content already uploaded");
                    self.stash.record_content_cap(&entry.file, &cap)?;
                    cap
                }
                None => {
                    let bytes = self.stash.content(&entry)?;
                    let cap = self.store.put_immutable(&bytes).await?;
                    self.stash.record_content_cap(&entry.file, &cap)?;
                    cap
                }
            },
        };

        let snapshot = Snapshot::sign(
            &self.identity,
            content_cap.clone(),
            entry.parents.clone(),
            entry.timestamp,
            entry.metadata.clone(),
        );
        let head = snapshot.commit(self.store.as_ref()).await?;

        self.stash.complete(
            &entry.file,
            &head,
            &CommittedRecord {
                content: content_cap,
                content_address: entry.content_address.clone(),
                timestamp: entry.timestamp,
            },
        )?;
        info!(file = %entry.file, head = %head, "Snapshot committed");
        Ok((head, snapshot))
    }

    /// Look up a parent in the stash, falling back to the store.
    async fn parent_facts(&self, parent: &Capability) -> Result<ParentFacts, SyncError> {
        if let Some(record) = self.stash.committed(parent)? {
            return Ok(ParentFacts {
                content_address: record.content_address,
                timestamp: record.timestamp,
            });
        }

        let snapshot = Snapshot::load(self.store.as_ref(), parent).await?;
        let bytes = self.store.get(&snapshot.content).await?;
        let record = CommittedRecord {
            content: snapshot.content,
            content_address: address(&bytes),
            timestamp: snapshot.timestamp,
        };
        self.stash.remember(parent, &record)?;
        Ok(ParentFacts {
            content_address: record.content_address,
            timestamp: record.timestamp,
        })
    }
}
