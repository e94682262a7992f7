//! Sync engine
//!
//! Ties one folder together: local changes go through the authoring pipeline
//! and are published to the collective view; synchronization passes read
//! every peer's heads, run the reconciler per (peer, file), fast-forward
//! where possible and report conflicts.

use crate::address::address;
use crate::collective::CollectiveView;
use crate::dag::AncestryWalker;
use crate::error::{StorageError, SyncError};
use crate::heads::{HeadEntry, LocalHeads};
use crate::identity::Identity;
use crate::path::local_path;
use crate::reconcile::{reconcile, Action, Decision, SyncState};
use crate::retry::{with_backoff, RetryPolicy};
use crate::snapshot::{AuthorOutcome, AuthorRequest, FileLease, NoChangePolicy, Snapshot, SnapshotAuthor};
use crate::stash::{CommittedRecord, LocalSnapshotStash};
use crate::store::ObjectStore;
use crate::types::{Capability, FileId};
use crate::walker::{Walker, TEMP_SUFFIX};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tunables for a [`SyncEngine`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub no_change_policy: NoChangePolicy,
    /// Files reconciled at the same time during a pass.
    pub max_concurrent_reconciles: usize,
    pub retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            no_change_policy: NoChangePolicy::default(),
            max_concurrent_reconciles: 8,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of reconciling one file against one peer.
#[derive(Debug)]
pub struct PairOutcome {
    pub peer: String,
    pub file: FileId,
    pub result: Result<Decision, SyncError>,
}

/// Everything one synchronization pass did.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub outcomes: Vec<PairOutcome>,
    /// Peers whose heads could not be read at all.
    pub peer_failures: Vec<(String, SyncError)>,
}

impl SyncReport {
    /// Remote heads adopted during the pass.
    pub fn adopted(&self) -> impl Iterator<Item = &PairOutcome> {
        self.outcomes.iter().filter(|o| {
            matches!(
                &o.result,
                Ok(Decision {
                    action: Action::Adopt(_),
                    ..
                })
            )
        })
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &PairOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(&o.result, Ok(d) if d.state == SyncState::Diverged))
    }

    pub fn failures(&self) -> impl Iterator<Item = &PairOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn state_of(&self, peer: &str, file: &FileId) -> Option<SyncState> {
        self.outcomes
            .iter()
            .find(|o| o.peer == peer && &o.file == file)
            .and_then(|o| o.result.as_ref().ok())
            .map(|d| d.state)
    }

    /// No conflicts and no failures.
    pub fn is_clean(&self) -> bool {
        self.peer_failures.is_empty()
            && self.conflicts().next().is_none()
            && self.failures().next().is_none()
    }
}

/// Result of authoring one file during a scan.
#[derive(Debug)]
pub struct ScanOutcome {
    pub file: FileId,
    pub result: Result<AuthorOutcome, SyncError>,
}

/// Engine for one synchronized folder.
pub struct SyncEngine {
    folder: String,
    root: PathBuf,
    store: Arc<dyn ObjectStore>,
    author: SnapshotAuthor,
    heads: Mutex<LocalHeads>,
    collective: Arc<dyn CollectiveView>,
    options: SyncOptions,
}

impl SyncEngine {
    /// Open the engine for `folder`, rooted at `root`, with local state
    /// (stash and head index) under `state_dir`.
    pub fn open(
        folder: &str,
        root: PathBuf,
        state_dir: &Path,
        store: Arc<dyn ObjectStore>,
        identity: Identity,
        collective: Arc<dyn CollectiveView>,
        options: SyncOptions,
    ) -> Result<Self, SyncError> {
        let stash = Arc::new(LocalSnapshotStash::open(state_dir.join("stash"))?);
        let heads = LocalHeads::load(state_dir.join("heads.bin"))?;
        let author = SnapshotAuthor::new(store.clone(), stash, identity, options.no_change_policy);

        info!(folder, root = %root.display(), participant = author.identity().name(), "Opened sync engine");
        Ok(Self {
            folder: folder.to_string(),
            root,
            store,
            author,
            heads: Mutex::new(heads),
            collective,
            options,
        })
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn participant(&self) -> &str {
        self.author.identity().name()
    }

    pub fn stash(&self) -> &LocalSnapshotStash {
        self.author.stash()
    }

    pub fn local_head(&self, file: &FileId) -> Option<Capability> {
        self.heads.lock().head(file).cloned()
    }

    /// Current local heads, in file order.
    pub fn heads(&self) -> Vec<(FileId, HeadEntry)> {
        self.heads
            .lock()
            .iter()
            .map(|(file, entry)| (file.clone(), entry.clone()))
            .collect()
    }

    /// Author `content` as the next version of `file` and publish it.
    pub async fn on_local_change(&self, file: &FileId, content: Vec<u8>) -> Result<AuthorOutcome, SyncError> {
        let lease = self.author.lease(file).await;
        let parents: Vec<Capability> = self.local_head(file).into_iter().collect();

        let author = &self.author;
        let (lease_ref, content_ref, parents_ref) = (&lease, &content, &parents);
        let outcome = with_backoff(self.options.retry, move || {
            author.author_leased(
                lease_ref,
                AuthorRequest::new(file.clone(), content_ref.clone(), parents_ref.clone()),
            )
        })
        .await?;

        // A resumed pending entry can move the head even when the new
        // content itself was unchanged.
        if parents.first() != Some(outcome.head()) {
            self.record_and_publish(&lease, outcome.head()).await?;
        }
        Ok(outcome)
    }

    /// Author every file in the folder.
    pub async fn scan(&self) -> Result<Vec<ScanOutcome>, SyncError> {
        let files = Walker::new(self.root.clone()).walk()?;
        debug!(folder = %self.folder, files = files.len(), "Scanning folder");

        let mut outcomes: Vec<ScanOutcome> = stream::iter(files)
            .map(|local| async move {
                let result = match fs::read(&local.path) {
                    Ok(content) => self.on_local_change(&local.file, content).await,
                    Err(e) => Err(StorageError::io(format!("Failed to read {:?}", local.path), e).into()),
                };
                ScanOutcome {
                    file: local.file,
                    result,
                }
            })
            .buffer_unordered(self.options.max_concurrent_reconciles.max(1))
            .collect()
            .await;
        outcomes.sort_by(|a, b| a.file.cmp(&b.file));
        Ok(outcomes)
    }

    /// Commit every stashed-but-uncommitted snapshot.
    pub async fn resume_pending(&self) -> Result<Vec<(FileId, Result<Capability, SyncError>)>, SyncError> {
        let pending = self.author.stash().pending_all()?;
        let mut results = Vec::with_capacity(pending.len());
        for entry in pending {
            let result = self.resume_file(&entry.file).await;
            if let Err(e) = &result {
                warn!(file = %entry.file, error = %e, "Failed to resume pending snapshot");
            }
            results.push((entry.file, result));
        }
        Ok(results)
    }

    async fn resume_file(&self, file: &FileId) -> Result<Capability, SyncError> {
        let lease = self.author.lease(file).await;
        let author = &self.author;
        let lease_ref = &lease;
        let outcome = with_backoff(self.options.retry, move || author.resume_leased(lease_ref)).await?;
        match outcome {
            Some(outcome) => {
                self.record_and_publish(&lease, outcome.head()).await?;
                Ok(outcome.head().clone())
            }
            None => self
                .local_head(file)
                .ok_or_else(|| SyncError::InvalidSnapshot(format!("nothing pending for {}", file))),
        }
    }

    /// Reconcile every file against every peer.
    pub async fn sync_pass(&self) -> Result<SyncReport, SyncError> {
        let walker = AncestryWalker::new(self.store.clone());
        let mut report = SyncReport::default();

        let mut peers: Vec<(String, BTreeMap<FileId, Capability>)> = Vec::new();
        for peer in self.collective.participants().await? {
            if peer == self.participant() {
                continue;
            }
            match self.collective.read_heads(&peer).await {
                Ok(heads) => peers.push((peer, heads)),
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Failed to read peer heads");
                    report.peer_failures.push((peer, e));
                }
            }
        }

        let mut files: BTreeSet<FileId> = self.heads.lock().iter().map(|(f, _)| f.clone()).collect();
        for (_, heads) in &peers {
            files.extend(heads.keys().cloned());
        }
        debug!(folder = %self.folder, peers = peers.len(), files = files.len(), "Starting sync pass");

        let walker_ref = &walker;
        let peers_ref = &peers;
        let per_file: Vec<Vec<PairOutcome>> = stream::iter(files)
            .map(|file| async move { self.reconcile_file(walker_ref, peers_ref, file).await })
            .buffer_unordered(self.options.max_concurrent_reconciles.max(1))
            .collect()
            .await;

        report.outcomes = per_file.into_iter().flatten().collect();
        report
            .outcomes
            .sort_by(|a, b| (&a.file, &a.peer).cmp(&(&b.file, &b.peer)));
        info!(
            folder = %self.folder,
            pairs = report.outcomes.len(),
            adopted = report.adopted().count(),
            conflicts = report.conflicts().count(),
            failures = report.failures().count(),
            "Sync pass finished"
        );
        Ok(report)
    }

    /// Peers for one file run one after another, so each sees the head the
    /// previous one may have adopted.
    async fn reconcile_file(
        &self,
        walker: &AncestryWalker,
        peers: &[(String, BTreeMap<FileId, Capability>)],
        file: FileId,
    ) -> Vec<PairOutcome> {
        let mut outcomes = Vec::with_capacity(peers.len());
        for (peer, heads) in peers {
            let remote = heads.get(&file);
            let result = self.reconcile_pair(walker, peer, &file, remote).await;
            if let Err(e) = &result {
                warn!(peer = %peer, file = %file, error = %e, "Reconciliation failed");
            }
            outcomes.push(PairOutcome {
                peer: peer.clone(),
                file: file.clone(),
                result,
            });
        }
        outcomes
    }

    async fn reconcile_pair(
        &self,
        walker: &AncestryWalker,
        peer: &str,
        file: &FileId,
        remote: Option<&Capability>,
    ) -> Result<Decision, SyncError> {
        let lease = self.author.lease(file).await;
        let local = self.local_head(file);
        let local_ref = local.as_ref();

        let decision = with_backoff(self.options.retry, move || reconcile(walker, local_ref, remote)).await?;
        match &decision.action {
            Action::Nothing => {
                debug!(peer, file = %file, state = %decision.state, "No action");
            }
            Action::Adopt(head) => {
                self.adopt(&lease, walker, head).await?;
                info!(peer, file = %file, head = %head, "Adopted remote head");
            }
            Action::Conflict { local, remote } => {
                warn!(peer, file = %file, local = %local, remote = %remote, "Conflict: heads have diverged");
            }
        }
        Ok(decision)
    }

    /// Fast-forward to `head`: write its content into the folder, drop any
    /// pending local state, record and publish the new head.
    async fn adopt(&self, lease: &FileLease, walker: &AncestryWalker, head: &Capability) -> Result<(), SyncError> {
        let file = lease.file();
        let snapshot = walker.snapshot(head).await?;
        if !snapshot.verify_author() {
            return Err(SyncError::InvalidSnapshot(format!(
                "{}: author signature does not verify",
                head
            )));
        }
        let store = self.store.as_ref();
        let content_cap = &snapshot.content;
        let content = with_backoff(self.options.retry, move || async move {
            store.get(content_cap).await.map_err(SyncError::from)
        })
        .await?;

        self.write_local(file, &content)?;

        let record = CommittedRecord {
            content: snapshot.content.clone(),
            content_address: address(&content),
            timestamp: snapshot.timestamp,
        };
        let stash = self.author.stash();
        stash.discard(file)?;
        stash.remember(head, &record)?;
        self.move_head(
            file,
            HeadEntry {
                snapshot: head.clone(),
                content: record.content,
                content_address: record.content_address,
            },
        )?;
        self.publish(file, head).await
    }

    /// Make `head` the local head of the leased file and publish it.
    async fn record_and_publish(&self, lease: &FileLease, head: &Capability) -> Result<(), SyncError> {
        let file = lease.file();
        let record = match self.author.stash().committed(head)? {
            Some(record) => record,
            None => {
                let snapshot = Snapshot::load(self.store.as_ref(), head).await?;
                let content = self.store.get(&snapshot.content).await?;
                CommittedRecord {
                    content_address: address(&content),
                    content: snapshot.content,
                    timestamp: snapshot.timestamp,
                }
            }
        };
        self.move_head(
            file,
            HeadEntry {
                snapshot: head.clone(),
                content: record.content,
                content_address: record.content_address,
            },
        )?;
        self.publish(file, head).await
    }

    /// Point `file` at `entry` and let the stash forget the snapshot it
    /// replaced, unless another file still has it as head.
    fn move_head(&self, file: &FileId, entry: HeadEntry) -> Result<(), SyncError> {
        let mut heads = self.heads.lock();
        let previous = heads.head(file).cloned();
        let head = entry.snapshot.clone();
        heads.update(file.clone(), entry)?;

        if let Some(previous) = previous.filter(|previous| previous != &head) {
            if !heads.iter().any(|(_, other)| other.snapshot == previous) {
                self.author.stash().forget(&previous)?;
            }
        }
        Ok(())
    }

    async fn publish(&self, file: &FileId, head: &Capability) -> Result<(), SyncError> {
        let collective = self.collective.as_ref();
        with_backoff(self.options.retry, move || collective.publish_head(file, head)).await
    }

    /// Replace the local file with `content` via a temporary sibling.
    fn write_local(&self, file: &FileId, content: &[u8]) -> Result<(), StorageError> {
        let path = local_path(&self.root, file.as_str());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StorageError::io(format!("Failed to create parent directory {:?}", parent), e)
            })?;
        }

        let mut temp_name = path.as_os_str().to_os_string();
        temp_name.push(format!(".foldsync{}", TEMP_SUFFIX));
        let temp_path = PathBuf::from(temp_name);

        fs::write(&temp_path, content)
            .map_err(|e| StorageError::io(format!("Failed to write {:?}", temp_path), e))?;
        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            StorageError::io(format!("Failed to rename temp file to {:?}", path), e)
        })?;
        Ok(())
    }
}
