//! Object Store boundary
//!
//! Content and snapshot nodes are append-only: content goes in, a capability
//! comes out, and capabilities are later resolved back to bytes. The only
//! mutable objects are the small directories that make up a collective view,
//! where one name is repointed at a time.
//!
//! Everything above this module talks to an [`ObjectStore`] handle passed in
//! explicitly, so the engine runs unchanged against the HTTP grid client or
//! the in-memory grid.

pub mod http;
pub mod memory;

pub use http::GridClient;
pub use memory::MemoryGrid;

use crate::error::StoreError;
use crate::types::{Capability, Timestamp};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Name of the entry the store adds to every linked directory.
pub const TIMESTAMP_ENTRY: &str = "timestamp";

/// Target of one entry in a linked directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// Immutable content blob.
    File(Capability),
    /// Another linked directory.
    Directory(Capability),
    /// Inline text stored as a file node.
    Literal(String),
}

impl LinkTarget {
    pub fn capability(&self) -> Option<&Capability> {
        match self {
            LinkTarget::File(cap) | LinkTarget::Directory(cap) => Some(cap),
            LinkTarget::Literal(_) => None,
        }
    }
}

/// Directory-of-links, ordered by entry name.
pub type LinkedDirectory = BTreeMap<String, LinkTarget>;

/// The two capabilities of a freshly created mutable directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutableDirectory {
    /// Grants `set_link` and `remove_link`.
    pub write: Capability,
    /// Grants listing only. Safe to hand to peers.
    pub read: Capability,
}

/// Object store client contract.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an immutable blob. Idempotent: identical bytes yield the
    /// identical capability.
    async fn put_immutable(&self, content: &[u8]) -> Result<Capability, StoreError>;

    /// Store an immutable directory-of-links. The store records `timestamp`
    /// as the directory's `timestamp` entry.
    async fn put_linked_directory(
        &self,
        entries: &LinkedDirectory,
        timestamp: Timestamp,
    ) -> Result<Capability, StoreError>;

    /// Fetch the bytes an object was stored with.
    async fn get(&self, capability: &Capability) -> Result<Vec<u8>, StoreError>;

    /// Create an empty mutable directory.
    async fn create_mutable_directory(&self) -> Result<MutableDirectory, StoreError>;

    /// Point `name` in the mutable directory behind `directory` (a write
    /// capability) at `target`, replacing any earlier link of that name.
    async fn set_link(
        &self,
        directory: &Capability,
        name: &str,
        target: &Capability,
    ) -> Result<(), StoreError>;

    /// Remove `name` from a mutable directory. Removing a missing name succeeds.
    async fn remove_link(&self, directory: &Capability, name: &str) -> Result<(), StoreError>;

    /// Fetch and decode a linked directory, immutable or mutable.
    async fn get_directory(&self, capability: &Capability) -> Result<LinkedDirectory, StoreError> {
        let bytes = self.get(capability).await?;
        decode_linked_directory(capability, &bytes)
    }
}

/// Encode a linked directory as the canonical JSON request body.
///
/// Keys are sorted, so equal entry sets always produce equal bytes. A
/// caller-supplied `timestamp` entry is replaced by `timestamp`.
pub fn encode_linked_directory(
    entries: &LinkedDirectory,
    timestamp: Timestamp,
) -> Result<Vec<u8>, StoreError> {
    let mut body: BTreeMap<&str, Value> = BTreeMap::new();
    for (name, target) in entries {
        body.insert(name.as_str(), encode_target(target));
    }
    body.insert(
        TIMESTAMP_ENTRY,
        encode_target(&LinkTarget::Literal(timestamp.to_string())),
    );
    serde_json::to_vec(&body)
        .map_err(|e| StoreError::Encoding(format!("linked directory: {}", e)))
}

/// Encode a directory listing the way the grid answers `?t=json` for a
/// mutable directory: `["dirnode", {"ro_uri": ..., "children": {...}}]`.
pub fn encode_listing(read: &Capability, entries: &LinkedDirectory) -> Result<Vec<u8>, StoreError> {
    let children: BTreeMap<&str, Value> = entries
        .iter()
        .map(|(name, target)| (name.as_str(), encode_target(target)))
        .collect();
    serde_json::to_vec(&json!(["dirnode", { "ro_uri": read.as_str(), "children": children }]))
        .map_err(|e| StoreError::Encoding(format!("directory listing: {}", e)))
}

/// Read-only capability named by a directory listing.
pub fn listing_read_cap(capability: &Capability, bytes: &[u8]) -> Result<Capability, StoreError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| StoreError::Malformed {
        capability: capability.clone(),
        reason: format!("not JSON: {}", e),
    })?;
    value
        .get(1)
        .and_then(|node| node.get("ro_uri"))
        .and_then(Value::as_str)
        .map(Capability::new)
        .ok_or_else(|| StoreError::Malformed {
            capability: capability.clone(),
            reason: "listing without ro_uri".to_string(),
        })
}

fn encode_target(target: &LinkTarget) -> Value {
    match target {
        LinkTarget::File(cap) => json!(["filenode", { "ro_uri": cap.as_str(), "metadata": {} }]),
        LinkTarget::Literal(text) => json!(["filenode", { "ro_uri": text, "metadata": {} }]),
        LinkTarget::Directory(cap) => json!(["dirnode", { "ro_uri": cap.as_str() }]),
    }
}

/// Decode a linked directory from the bytes a store returned.
///
/// Accepts both the request-body shape produced by
/// [`encode_linked_directory`] and the grid's listing shape
/// `["dirnode", {"children": {...}}]`.
pub fn decode_linked_directory(
    capability: &Capability,
    bytes: &[u8],
) -> Result<LinkedDirectory, StoreError> {
    let malformed = |reason: String| StoreError::Malformed {
        capability: capability.clone(),
        reason,
    };

    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| malformed(format!("not JSON: {}", e)))?;

    let children = match &value {
        Value::Object(map) => map,
        Value::Array(items) => match (items.first(), items.get(1)) {
            (Some(Value::String(kind)), Some(Value::Object(node))) if kind == "dirnode" => node
                .get("children")
                .and_then(Value::as_object)
                .ok_or_else(|| malformed("dirnode listing without children".to_string()))?,
            _ => return Err(malformed("unexpected top-level array".to_string())),
        },
        _ => return Err(malformed("expected a JSON object".to_string())),
    };

    let mut entries = LinkedDirectory::new();
    for (name, child) in children {
        entries.insert(name.clone(), decode_target(child).map_err(|reason| {
            malformed(format!("entry {:?}: {}", name, reason))
        })?);
    }
    Ok(entries)
}

fn decode_target(value: &Value) -> Result<LinkTarget, String> {
    let items = value.as_array().ok_or("expected [kind, node]")?;
    let kind = items
        .first()
        .and_then(Value::as_str)
        .ok_or("missing node kind")?;
    let ro_uri = items
        .get(1)
        .and_then(|node| node.get("ro_uri"))
        .and_then(Value::as_str)
        .ok_or("missing ro_uri")?;

    match kind {
        "dirnode" => Ok(LinkTarget::Directory(Capability::new(ro_uri))),
        "filenode" => {
            let cap = Capability::new(ro_uri);
            if ro_uri.starts_with("URI:") && !cap.is_directory() {
                Ok(LinkTarget::File(cap))
            } else {
                Ok(LinkTarget::Literal(ro_uri.to_string()))
            }
        }
        other => Err(format!("unknown node kind {:?}", other)),
    }
}

/// Read the store-assigned timestamp of a decoded directory.
///
/// Integer and fractional POSIX times are both accepted; fractions are
/// truncated.
pub fn directory_timestamp(entries: &LinkedDirectory) -> Option<Timestamp> {
    match entries.get(TIMESTAMP_ENTRY)? {
        LinkTarget::Literal(text) => text
            .parse::<Timestamp>()
            .ok()
            .or_else(|| text.parse::<f64>().ok().map(|t| t as Timestamp)),
        _ => None,
    }
}
