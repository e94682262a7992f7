//! Snapshots
//!
//! Immutable nodes of the per-file version DAG. A snapshot names its content
//! by capability and its predecessors by their snapshot capabilities, so the
//! graph is an arena keyed by capability with non-owning parent links.

pub mod author;

pub use author::{AuthorOutcome, AuthorRequest, FileLease, FileLocks, NoChangePolicy, SnapshotAuthor};

use crate::error::SyncError;
use crate::identity::{self, Identity};
use crate::store::{directory_timestamp, LinkTarget, LinkedDirectory, ObjectStore};
use crate::types::{Capability, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot node scheme.
pub const SNAPSHOT_VERSION: u32 = 1;

const CONTENT_ENTRY: &str = "content";
const VERSION_ENTRY: &str = "version";
const AUTHOR_ENTRY: &str = "author";
const METADATA_ENTRY: &str = "metadata";
const PARENT_ENTRY_PREFIX: &str = "parent";

/// Free-form snapshot metadata, ordered for a stable encoding.
pub type SnapshotMetadata = BTreeMap<String, String>;

/// Attribution of a snapshot to a participant.
///
/// Snapshots read from older grid data may carry no author; those decode to
/// the default (empty) author, which never verifies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub public_key: String,
    pub signature: String,
}

/// One version of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub content: Capability,
    /// Parent snapshot capabilities in stable order. Empty for a first version.
    pub parents: Vec<Capability>,
    pub author: Author,
    pub timestamp: Timestamp,
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    /// Build a snapshot signed by `identity`.
    ///
    /// Ed25519 signatures are deterministic, so signing the same fields twice
    /// yields the same snapshot and therefore the same node encoding.
    pub fn sign(
        identity: &Identity,
        content: Capability,
        parents: Vec<Capability>,
        timestamp: Timestamp,
        metadata: SnapshotMetadata,
    ) -> Self {
        let message = signable_bytes(&content, &parents, timestamp, identity.name(), &metadata);
        let signature = hex::encode(identity.sign(&message));
        Snapshot {
            content,
            parents,
            author: Author {
                name: identity.name().to_string(),
                public_key: identity.public_key_hex(),
                signature,
            },
            timestamp,
            metadata,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Check the author's signature over this snapshot's fields.
    pub fn verify_author(&self) -> bool {
        let message = signable_bytes(
            &self.content,
            &self.parents,
            self.timestamp,
            &self.author.name,
            &self.metadata,
        );
        identity::verify_signature(&self.author.public_key, &message, &self.author.signature)
    }

    /// Linked-directory entries for this snapshot. The store adds `timestamp`.
    pub fn to_entries(&self) -> Result<LinkedDirectory, SyncError> {
        let mut entries = LinkedDirectory::new();
        entries.insert(
            CONTENT_ENTRY.to_string(),
            LinkTarget::File(self.content.clone()),
        );
        entries.insert(
            VERSION_ENTRY.to_string(),
            LinkTarget::Literal(SNAPSHOT_VERSION.to_string()),
        );
        for (i, parent) in self.parents.iter().enumerate() {
            entries.insert(
                format!("{}{}", PARENT_ENTRY_PREFIX, i),
                LinkTarget::Directory(parent.clone()),
            );
        }
        let encode_error =
            |what: &str, e: serde_json::Error| SyncError::InvalidSnapshot(format!("cannot encode {}: {}", what, e));
        entries.insert(
            AUTHOR_ENTRY.to_string(),
            LinkTarget::Literal(serde_json::to_string(&self.author).map_err(|e| encode_error("author", e))?),
        );
        if !self.metadata.is_empty() {
            entries.insert(
                METADATA_ENTRY.to_string(),
                LinkTarget::Literal(
                    serde_json::to_string(&self.metadata).map_err(|e| encode_error("metadata", e))?,
                ),
            );
        }
        Ok(entries)
    }

    /// Decode a snapshot node read from the store.
    pub fn from_entries(capability: &Capability, entries: &LinkedDirectory) -> Result<Self, SyncError> {
        let invalid = |reason: String| SyncError::InvalidSnapshot(format!("{}: {}", capability, reason));

        match entries.get(VERSION_ENTRY) {
            Some(LinkTarget::Literal(v)) if v == &SNAPSHOT_VERSION.to_string() => {}
            Some(other) => return Err(invalid(format!("unsupported version {:?}", other))),
            None => return Err(invalid("missing version".to_string())),
        }

        let content = match entries.get(CONTENT_ENTRY) {
            Some(LinkTarget::File(cap)) => cap.clone(),
            _ => return Err(invalid("missing content capability".to_string())),
        };

        let timestamp =
            directory_timestamp(entries).ok_or_else(|| invalid("missing timestamp".to_string()))?;

        let mut indexed = Vec::new();
        for (name, target) in entries {
            let Some(index) = name.strip_prefix(PARENT_ENTRY_PREFIX) else {
                continue;
            };
            let index: usize = index
                .parse()
                .map_err(|_| invalid(format!("bad parent entry {:?}", name)))?;
            match target {
                LinkTarget::Directory(cap) => indexed.push((index, cap.clone())),
                _ => return Err(invalid(format!("{} is not a directory link", name))),
            }
        }
        indexed.sort_by_key(|(index, _)| *index);
        let parents = indexed.into_iter().map(|(_, cap)| cap).collect();

        let author = match entries.get(AUTHOR_ENTRY) {
            Some(LinkTarget::Literal(text)) => serde_json::from_str(text)
                .map_err(|e| invalid(format!("bad author record: {}", e)))?,
            _ => Author::default(),
        };

        let metadata = match entries.get(METADATA_ENTRY) {
            Some(LinkTarget::Literal(text)) => serde_json::from_str(text)
                .map_err(|e| invalid(format!("bad metadata: {}", e)))?,
            _ => SnapshotMetadata::new(),
        };

        Ok(Snapshot {
            content,
            parents,
            author,
            timestamp,
            metadata,
        })
    }

    /// Fetch and decode the snapshot node at `capability`.
    pub async fn load(store: &dyn ObjectStore, capability: &Capability) -> Result<Self, SyncError> {
        let entries = store.get_directory(capability).await?;
        Self::from_entries(capability, &entries)
    }

    /// Publish this snapshot as a linked-directory node, yielding its capability.
    pub async fn commit(&self, store: &dyn ObjectStore) -> Result<Capability, SyncError> {
        Ok(store
            .put_linked_directory(&self.to_entries()?, self.timestamp)
            .await?)
    }
}

/// Bytes covered by the author's signature.
fn signable_bytes(
    content: &Capability,
    parents: &[Capability],
    timestamp: Timestamp,
    author: &str,
    metadata: &SnapshotMetadata,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"foldsync-snapshot-v1\n");
    out.extend_from_slice(b"content:");
    out.extend_from_slice(content.as_str().as_bytes());
    out.push(b'\n');
    for parent in parents {
        out.extend_from_slice(b"parent:");
        out.extend_from_slice(parent.as_str().as_bytes());
        out.push(b'\n');
    }
    out.extend_from_slice(format!("timestamp:{}\n", timestamp).as_bytes());
    out.extend_from_slice(b"author:");
    out.extend_from_slice(author.as_bytes());
    out.push(b'\n');
    for (key, value) in metadata {
        out.extend_from_slice(format!("meta:{}={}\n", key.len(), key).as_bytes());
        out.extend_from_slice(value.as_bytes());
        out.push(b'\n');
    }
    out
}
