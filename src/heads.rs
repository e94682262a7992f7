//! Local Heads
//!
//! O(1) access to this participant's current head for each file, plus the
//! content address of that head so callers can compare local bytes without
//! touching the store.

use crate::error::StorageError;
use crate::types::{Capability, FileId};
use bincode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const HEAD_INDEX_VERSION: u32 = 1;

/// Current head of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadEntry {
    pub snapshot: Capability,
    pub content: Capability,
    pub content_address: Capability,
}

/// Head index: file -> HeadEntry, persisted to a single file.
pub struct LocalHeads {
    path: PathBuf,
    heads: BTreeMap<FileId, HeadEntry>,
}

impl LocalHeads {
    /// Load the index at `path`; a missing file is an empty index.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Self {
                path,
                heads: BTreeMap::new(),
            });
        }

        let bytes = fs::read(&path).map_err(|e| {
            StorageError::io(format!("Failed to read head index from {:?}", path), e)
        })?;

        // 4-byte version then bincode(entries).
        if bytes.len() < 4 {
            return Err(StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Head index file too short".to_string(),
            )));
        }
        let version = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if version != HEAD_INDEX_VERSION {
            return Err(StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Unsupported head index version: {}", version),
            )));
        }
        let entries: Vec<(FileId, HeadEntry)> = bincode::deserialize(&bytes[4..]).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Failed to deserialize head index entries: {}", e),
            ))
        })?;

        Ok(Self {
            path,
            heads: entries.into_iter().collect(),
        })
    }

    pub fn get(&self, file: &FileId) -> Option<&HeadEntry> {
        self.heads.get(file)
    }

    pub fn head(&self, file: &FileId) -> Option<&Capability> {
        self.heads.get(file).map(|entry| &entry.snapshot)
    }

    /// Record a new head and persist the index.
    pub fn update(&mut self, file: FileId, entry: HeadEntry) -> Result<(), StorageError> {
        self.heads.insert(file, entry);
        self.save()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FileId, &HeadEntry)> {
        self.heads.iter()
    }

    pub fn len(&self) -> usize {
        self.heads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    /// Save the index atomically (temporary file + rename).
    fn save(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StorageError::io(format!("Failed to create parent directory {:?}", parent), e)
            })?;
        }

        let entries: Vec<(&FileId, &HeadEntry)> = self.heads.iter().collect();
        let payload = bincode::serialize(&entries)
            .map_err(|e| StorageError::io("Failed to serialize head index entries", e))?;
        let mut serialized = Vec::with_capacity(4 + payload.len());
        serialized.extend_from_slice(&HEAD_INDEX_VERSION.to_le_bytes());
        serialized.extend_from_slice(&payload);

        let temp_path = self.path.with_extension("bin.tmp");
        fs::write(&temp_path, &serialized).map_err(|e| {
            StorageError::io(format!("Failed to write head index to {:?}", temp_path), e)
        })?;
        fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            StorageError::io(format!("Failed to rename temp file to {:?}", self.path), e)
        })?;
        Ok(())
    }
}
