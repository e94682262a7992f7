//! Local Snapshot Stash
//!
//! Durable staging area for snapshots that have been authored but not yet
//! committed to the store. A pending entry is a sled record plus the raw
//! content as a blob file; the blob is written first and the record second,
//! so a record that can be read always has its content next to it.
//!
//! The stash also remembers facts about committed snapshots (content
//! capability, content address, timestamp) so the authoring pipeline can
//! check for unchanged content and pick timestamps without refetching
//! parents from the store. Those facts are forgotten once a snapshot stops
//! being a head, so the committed and uploaded trees stay proportional to
//! the number of tracked files.

pub mod blobs;

use crate::error::StorageError;
use crate::snapshot::SnapshotMetadata;
use crate::types::{Capability, FileId, Timestamp};
use blobs::BlobStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const PENDING_TREE: &str = "pending";
const COMMITTED_TREE: &str = "committed";
const UPLOADED_TREE: &str = "uploaded";

/// An authored snapshot waiting for commit.
///
/// Holds everything needed to rebuild the snapshot node bit-for-bit on
/// resume: the timestamp is fixed at stage time and signing is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashEntry {
    pub file: FileId,
    pub content_address: Capability,
    pub parents: Vec<Capability>,
    pub timestamp: Timestamp,
    pub metadata: SnapshotMetadata,
    /// Set once `put_immutable` has succeeded for this content.
    pub content_cap: Option<Capability>,
}

/// What the stash knows about a committed snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedRecord {
    pub content: Capability,
    pub content_address: Capability,
    pub timestamp: Timestamp,
}

pub struct LocalSnapshotStash {
    root: PathBuf,
    db: sled::Db,
    pending: sled::Tree,
    committed: sled::Tree,
    uploaded: sled::Tree,
    blobs: BlobStore,
}

impl LocalSnapshotStash {
    /// Open (or create) the stash under `root`, removing blobs left behind
    /// by writes that never got a record.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        let db = sled::open(root.join("db"))
            .map_err(|e| StorageError::io("Failed to open stash database", e))?;
        let open_tree = |name: &str| {
            db.open_tree(name)
                .map_err(|e| StorageError::io(format!("Failed to open stash tree {}", name), e))
        };
        let pending = open_tree(PENDING_TREE)?;
        let committed = open_tree(COMMITTED_TREE)?;
        let uploaded = open_tree(UPLOADED_TREE)?;
        let blobs = BlobStore::new(&root)?;

        let stash = Self {
            root,
            db,
            pending,
            committed,
            uploaded,
            blobs,
        };

        let referenced: Vec<Capability> = stash
            .pending_all()?
            .into_iter()
            .map(|entry| entry.content_address)
            .collect();
        let removed = stash.blobs.sweep(&referenced)?;
        if removed > 0 {
            info!(removed, "Swept orphaned stash blobs");
        }
        debug!(root = %stash.root.display(), pending = referenced.len(), "Opened snapshot stash");
        Ok(stash)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stage an authored snapshot and its content.
    ///
    /// Either both the blob and the record end up durable, or neither is
    /// observable: if the record write fails the staged blob is removed.
    pub fn stage(&self, entry: &StashEntry, content: &[u8]) -> Result<(), StorageError> {
        let staged = self.blobs.write(&entry.content_address, content)?;
        self.put_pending(entry)?;
        self.flush()?;
        staged.keep();
        debug!(file = %entry.file, content_address = %entry.content_address, "Stashed snapshot");
        Ok(())
    }

    pub fn pending(&self, file: &FileId) -> Result<Option<StashEntry>, StorageError> {
        match self
            .pending
            .get(file.as_str().as_bytes())
            .map_err(|e| StorageError::io("Failed to read stash entry", e))?
        {
            Some(bytes) => Ok(Some(decode(&bytes, "stash entry")?)),
            None => Ok(None),
        }
    }

    /// Every pending entry, in file order.
    pub fn pending_all(&self) -> Result<Vec<StashEntry>, StorageError> {
        let mut entries = Vec::new();
        for item in self.pending.iter() {
            let (_, bytes) = item.map_err(|e| StorageError::io("Failed to scan stash", e))?;
            entries.push(decode(&bytes, "stash entry")?);
        }
        Ok(entries)
    }

    /// Content of a pending entry, verified against its address.
    pub fn content(&self, entry: &StashEntry) -> Result<Vec<u8>, StorageError> {
        self.blobs.read(&entry.content_address)?.ok_or_else(|| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Stashed content missing for {}", entry.file),
            ))
        })
    }

    /// Remember that the entry's content is in the store under `content_cap`.
    pub fn record_content_cap(&self, file: &FileId, content_cap: &Capability) -> Result<(), StorageError> {
        let Some(mut entry) = self.pending(file)? else {
            return Ok(());
        };
        entry.content_cap = Some(content_cap.clone());
        self.put_pending(&entry)?;
        self.remember_upload(&entry.content_address, content_cap)?;
        self.flush()
    }

    /// The entry for `file` was committed as `head`: record what is known
    /// about it and drop the pending state.
    pub fn complete(
        &self,
        file: &FileId,
        head: &Capability,
        record: &CommittedRecord,
    ) -> Result<(), StorageError> {
        self.remember(head, record)?;
        self.remember_upload(&record.content_address, &record.content)?;
        self.discard(file)
    }

    /// Drop pending state for `file`, including its blob unless another
    /// pending entry still needs it.
    pub fn discard(&self, file: &FileId) -> Result<(), StorageError> {
        let Some(entry) = self.pending(file)? else {
            return Ok(());
        };
        self.pending
            .remove(file.as_str().as_bytes())
            .map_err(|e| StorageError::io("Failed to remove stash entry", e))?;
        self.flush()?;

        let still_needed = self
            .pending_all()?
            .iter()
            .any(|other| other.content_address == entry.content_address);
        if !still_needed {
            self.blobs.remove(&entry.content_address)?;
        }
        Ok(())
    }

    /// Facts about a committed snapshot, if this stash has seen it.
    pub fn committed(&self, snapshot: &Capability) -> Result<Option<CommittedRecord>, StorageError> {
        match self
            .committed
            .get(snapshot.as_str().as_bytes())
            .map_err(|e| StorageError::io("Failed to read committed record", e))?
        {
            Some(bytes) => Ok(Some(decode(&bytes, "committed record")?)),
            None => Ok(None),
        }
    }

    pub fn remember(&self, snapshot: &Capability, record: &CommittedRecord) -> Result<(), StorageError> {
        let value = encode(record, "committed record")?;
        self.committed
            .insert(snapshot.as_str().as_bytes(), value)
            .map_err(|e| StorageError::io("Failed to write committed record", e))?;
        Ok(())
    }

    /// Forget a superseded snapshot and, unless something else still refers
    /// to its content, the upload record for that content. A snapshot that a
    /// pending entry names as parent is kept. Returns whether anything was
    /// removed.
    pub fn forget(&self, snapshot: &Capability) -> Result<bool, StorageError> {
        let pending = self.pending_all()?;
        if pending.iter().any(|entry| entry.parents.contains(snapshot)) {
            debug!(snapshot = %snapshot, "Keeping snapshot named by a pending entry");
            return Ok(false);
        }
        let Some(record) = self.committed(snapshot)? else {
            return Ok(false);
        };
        self.committed
            .remove(snapshot.as_str().as_bytes())
            .map_err(|e| StorageError::io("Failed to remove committed record", e))?;

        let mut content_in_use = pending
            .iter()
            .any(|entry| entry.content_address == record.content_address);
        for item in self.committed.iter() {
            if content_in_use {
                break;
            }
            let (_, bytes) = item.map_err(|e| StorageError::io("Failed to scan committed records", e))?;
            let other: CommittedRecord = decode(&bytes, "committed record")?;
            content_in_use = other.content_address == record.content_address;
        }
        if !content_in_use {
            self.uploaded
                .remove(record.content_address.as_str().as_bytes())
                .map_err(|e| StorageError::io("Failed to remove upload record", e))?;
        }
        self.flush()?;
        debug!(snapshot = %snapshot, "Forgot superseded snapshot");
        Ok(true)
    }

    /// Number of committed snapshots the stash remembers.
    pub fn committed_len(&self) -> usize {
        self.committed.len()
    }

    /// Number of content upload records.
    pub fn uploaded_len(&self) -> usize {
        self.uploaded.len()
    }

    /// Store capability of already-uploaded content with this address.
    pub fn uploaded(&self, content_address: &Capability) -> Result<Option<Capability>, StorageError> {
        Ok(self
            .uploaded
            .get(content_address.as_str().as_bytes())
            .map_err(|e| StorageError::io("Failed to read upload record", e))?
            .map(|bytes| Capability::new(String::from_utf8_lossy(&bytes).into_owned())))
    }

    fn remember_upload(&self, content_address: &Capability, content_cap: &Capability) -> Result<(), StorageError> {
        self.uploaded
            .insert(
                content_address.as_str().as_bytes(),
                content_cap.as_str().as_bytes(),
            )
            .map_err(|e| StorageError::io("Failed to write upload record", e))?;
        Ok(())
    }

    fn put_pending(&self, entry: &StashEntry) -> Result<(), StorageError> {
        let value = encode(entry, "stash entry")?;
        self.pending
            .insert(entry.file.as_str().as_bytes(), value)
            .map_err(|e| StorageError::io("Failed to write stash entry", e))?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db
            .flush()
            .map_err(|e| StorageError::io("Failed to flush stash", e))?;
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value)
        .map_err(|e| StorageError::Encoding(format!("Failed to serialize {}: {}", what, e)))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T, StorageError> {
    bincode::deserialize(bytes)
        .map_err(|e| StorageError::Encoding(format!("Failed to deserialize {}: {}", what, e)))
}
