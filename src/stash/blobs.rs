//! Stashed content blobs
//!
//! Raw file content waiting for upload, stored at paths derived from its
//! content address:
//! `{root}/content/{hex[0..2]}/{hex[2..4]}/{hex}.blob`

use crate::address::address;
use crate::error::StorageError;
use crate::types::Capability;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const BLOB_EXTENSION: &str = "blob";
const TEMP_EXTENSION: &str = "blob.tmp";

/// Content-addressed blob files under the stash directory.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().join("content");
        fs::create_dir_all(&root).map_err(|e| {
            StorageError::io(format!("Failed to create blob directory at {:?}", root), e)
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `content` under its address.
    ///
    /// Writes go to a `.tmp` sibling and are renamed into place, so a blob
    /// that exists is always complete. The returned guard removes the blob
    /// again unless [`StagedBlob::keep`] is called; a blob that was already
    /// present before this call is never removed by the guard.
    pub fn write(&self, content_address: &Capability, content: &[u8]) -> Result<StagedBlob, StorageError> {
        let path = self.blob_path(content_address)?;
        if path.exists() {
            return Ok(StagedBlob { path: None });
        }

        let computed = address(content);
        if &computed != content_address {
            return Err(StorageError::HashMismatch {
                expected: content_address.clone(),
                actual: computed,
            });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StorageError::io(format!("Failed to create parent directory {:?}", parent), e)
            })?;
        }

        let temp_path = path.with_extension(TEMP_EXTENSION);
        fs::write(&temp_path, content).map_err(|e| {
            StorageError::io(format!("Failed to write blob to {:?}", temp_path), e)
        })?;
        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            StorageError::io(format!("Failed to rename temp file to {:?}", path), e)
        })?;

        Ok(StagedBlob { path: Some(path) })
    }

    /// Read a blob and check it still hashes to its address.
    pub fn read(&self, content_address: &Capability) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.blob_path(content_address)?;
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)
            .map_err(|e| StorageError::io(format!("Failed to read blob from {:?}", path), e))?;

        let computed = address(&bytes);
        if &computed != content_address {
            return Err(StorageError::HashMismatch {
                expected: content_address.clone(),
                actual: computed,
            });
        }
        Ok(Some(bytes))
    }

    pub fn exists(&self, content_address: &Capability) -> Result<bool, StorageError> {
        Ok(self.blob_path(content_address)?.exists())
    }

    pub fn remove(&self, content_address: &Capability) -> Result<(), StorageError> {
        let path = self.blob_path(content_address)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(format!("Failed to remove blob {:?}", path), e)),
        }
    }

    /// Remove leftover temp files and every blob whose address is not in
    /// `referenced`. Returns the number of files removed.
    pub fn sweep(&self, referenced: &[Capability]) -> Result<usize, StorageError> {
        let mut removed = 0;
        for entry in walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy();

            let orphan = if name.ends_with(".tmp") {
                true
            } else if let Some(hex) = name.strip_suffix(".blob") {
                !referenced
                    .iter()
                    .any(|cap| address_hex(cap).map_or(false, |h| h == hex))
            } else {
                false
            };

            if orphan {
                warn!(path = %path.display(), "Removing orphaned stash file");
                fs::remove_file(path).map_err(|e| {
                    StorageError::io(format!("Failed to remove orphan {:?}", path), e)
                })?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn blob_path(&self, content_address: &Capability) -> Result<PathBuf, StorageError> {
        let hex = address_hex(content_address).ok_or_else(|| {
            StorageError::InvalidPath(format!("not a content address: {}", content_address))
        })?;
        Ok(self
            .root
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(format!("{}.{}", hex, BLOB_EXTENSION)))
    }
}

/// Hex digest part of a content address, if it has one.
fn address_hex(content_address: &Capability) -> Option<&str> {
    let hex = content_address
        .as_str()
        .strip_prefix(crate::types::CONTENT_CAP_PREFIX)?;
    if hex.len() >= 4 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(hex)
    } else {
        None
    }
}

/// A freshly written blob that is removed on drop unless kept.
#[must_use]
#[derive(Debug)]
pub struct StagedBlob {
    path: Option<PathBuf>,
}

impl StagedBlob {
    /// The record referencing this blob is durable; leave the blob in place.
    pub fn keep(mut self) {
        self.path = None;
    }
}

impl Drop for StagedBlob {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = fs::remove_file(path);
        }
    }
}
