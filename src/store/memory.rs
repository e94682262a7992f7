//! In-memory grid
//!
//! A content-addressed fake of the grid web API for tests and offline use.
//! Capabilities are exactly [`crate::address::address`] for blobs and
//! [`crate::address::address_directory`] of the canonical body for
//! directories, so identical puts return identical capabilities. Mutable
//! directories get a random write capability; their read capability is the
//! hash of it.

use crate::address::{address, address_directory};
use crate::error::StoreError;
use crate::store::{
    encode_linked_directory, encode_listing, LinkTarget, LinkedDirectory, MutableDirectory,
    ObjectStore,
};
use crate::types::{
    Capability, CapabilityKind, Timestamp, MUTABLE_DIRECTORY_CAP_PREFIX,
    READONLY_DIRECTORY_CAP_PREFIX,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Store operation, for call accounting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    PutImmutable,
    PutDirectory,
    Get,
    /// Creating or changing a mutable directory.
    Mutate,
}

#[derive(Default)]
pub struct MemoryGrid {
    objects: RwLock<HashMap<Capability, Vec<u8>>>,
    /// Mutable directories by read key.
    mutable: RwLock<HashMap<String, LinkedDirectory>>,
    faults: Mutex<HashMap<Operation, VecDeque<StoreError>>>,
    put_immutable_calls: AtomicUsize,
    put_directory_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl MemoryGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error to be returned by the next call of `operation`.
    /// Queued errors are consumed in order, one per call.
    pub fn inject_failure(&self, operation: Operation, error: StoreError) {
        self.faults
            .lock()
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Store raw bytes under an arbitrary capability, bypassing content
    /// addressing. Only useful for building corrupt histories in tests.
    pub fn insert_raw(&self, capability: Capability, bytes: Vec<u8>) {
        self.objects.write().insert(capability, bytes);
    }

    pub fn contains(&self, capability: &Capability) -> bool {
        self.objects.read().contains_key(capability)
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    pub fn put_immutable_calls(&self) -> usize {
        self.put_immutable_calls.load(Ordering::SeqCst)
    }

    pub fn put_directory_calls(&self) -> usize {
        self.put_directory_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Key of the mutable directory a write or read capability refers to.
    fn read_key(capability: &Capability) -> Option<String> {
        let text = capability.as_str();
        if let Some(key) = text.strip_prefix(READONLY_DIRECTORY_CAP_PREFIX) {
            Some(key.to_string())
        } else {
            text.strip_prefix(MUTABLE_DIRECTORY_CAP_PREFIX)
                .map(|secret| blake3::hash(secret.as_bytes()).to_hex().to_string())
        }
    }

    fn mutate(
        &self,
        directory: &Capability,
        change: impl FnOnce(&mut LinkedDirectory),
    ) -> Result<(), StoreError> {
        if let Some(err) = self.take_fault(Operation::Mutate) {
            return Err(err);
        }
        if !directory.is_writable() {
            return Err(StoreError::Rejected {
                status: 403,
                detail: format!("{} is not a write capability", directory),
            });
        }
        let key = Self::read_key(directory).ok_or_else(|| StoreError::NotFound(directory.clone()))?;
        let mut mutable = self.mutable.write();
        let entries = mutable
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(directory.clone()))?;
        change(entries);
        Ok(())
    }

    fn take_fault(&self, operation: Operation) -> Option<StoreError> {
        self.faults
            .lock()
            .get_mut(&operation)
            .and_then(|queue| queue.pop_front())
    }
}

#[async_trait]
impl ObjectStore for MemoryGrid {
    async fn put_immutable(&self, content: &[u8]) -> Result<Capability, StoreError> {
        self.put_immutable_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_fault(Operation::PutImmutable) {
            return Err(err);
        }

        let cap = address(content);
        self.objects
            .write()
            .entry(cap.clone())
            .or_insert_with(|| content.to_vec());
        debug!(capability = %cap, size = content.len(), "memory grid stored blob");
        Ok(cap)
    }

    async fn put_linked_directory(
        &self,
        entries: &LinkedDirectory,
        timestamp: Timestamp,
    ) -> Result<Capability, StoreError> {
        self.put_directory_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_fault(Operation::PutDirectory) {
            return Err(err);
        }

        let body = encode_linked_directory(entries, timestamp)?;
        let cap = address_directory(&body);
        self.objects.write().entry(cap.clone()).or_insert(body);
        debug!(capability = %cap, entries = entries.len(), "memory grid stored directory");
        Ok(cap)
    }

    async fn get(&self, capability: &Capability) -> Result<Vec<u8>, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_fault(Operation::Get) {
            return Err(err);
        }

        if capability.kind() == CapabilityKind::MutableDirectory {
            let key = Self::read_key(capability)
                .ok_or_else(|| StoreError::NotFound(capability.clone()))?;
            let mutable = self.mutable.read();
            let entries = mutable
                .get(&key)
                .ok_or_else(|| StoreError::NotFound(capability.clone()))?;
            let read = Capability::new(format!("{}{}", READONLY_DIRECTORY_CAP_PREFIX, key));
            return encode_listing(&read, entries);
        }

        self.objects
            .read()
            .get(capability)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(capability.clone()))
    }

    async fn create_mutable_directory(&self) -> Result<MutableDirectory, StoreError> {
        if let Some(err) = self.take_fault(Operation::Mutate) {
            return Err(err);
        }
        let secret = hex::encode(rand::random::<[u8; 16]>());
        let write = Capability::new(format!("{}{}", MUTABLE_DIRECTORY_CAP_PREFIX, secret));
        let key = Self::read_key(&write).ok_or_else(|| StoreError::NotFound(write.clone()))?;
        let read = Capability::new(format!("{}{}", READONLY_DIRECTORY_CAP_PREFIX, key));
        self.mutable.write().insert(key, LinkedDirectory::new());
        debug!(directory = %read, "memory grid created mutable directory");
        Ok(MutableDirectory { write, read })
    }

    async fn set_link(
        &self,
        directory: &Capability,
        name: &str,
        target: &Capability,
    ) -> Result<(), StoreError> {
        let link = if target.is_directory() {
            LinkTarget::Directory(target.clone())
        } else {
            LinkTarget::File(target.clone())
        };
        self.mutate(directory, |entries| {
            entries.insert(name.to_string(), link);
        })
    }

    async fn remove_link(&self, directory: &Capability, name: &str) -> Result<(), StoreError> {
        self.mutate(directory, |entries| {
            entries.remove(name);
        })
    }
}
