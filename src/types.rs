//! Core value types shared across the crate.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// POSIX time in whole seconds.
pub type Timestamp = i64;

/// Prefix of capabilities naming an immutable content blob.
pub const CONTENT_CAP_PREFIX: &str = "URI:CHK:";

/// Prefix of capabilities naming an immutable directory-of-links.
pub const DIRECTORY_CAP_PREFIX: &str = "URI:DIR2-CHK:";

/// Prefix of write capabilities for a mutable directory.
pub const MUTABLE_DIRECTORY_CAP_PREFIX: &str = "URI:DIR2:";

/// Prefix of read-only capabilities for a mutable directory.
pub const READONLY_DIRECTORY_CAP_PREFIX: &str = "URI:DIR2-RO:";

/// What a capability refers to, as far as its text reveals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Content,
    Directory,
    /// Mutable directory, through either its write or its read-only capability.
    MutableDirectory,
    Other,
}

/// Opaque identifier of an object in the grid.
///
/// Equality is textual. For immutable objects the store guarantees that two
/// capabilities are equal exactly when the objects they name are
/// bit-identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    pub fn new(text: impl Into<String>) -> Self {
        Capability(text.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> CapabilityKind {
        if self.0.starts_with(DIRECTORY_CAP_PREFIX) {
            CapabilityKind::Directory
        } else if self.0.starts_with(MUTABLE_DIRECTORY_CAP_PREFIX)
            || self.0.starts_with(READONLY_DIRECTORY_CAP_PREFIX)
        {
            CapabilityKind::MutableDirectory
        } else if self.0.starts_with(CONTENT_CAP_PREFIX) {
            CapabilityKind::Content
        } else {
            CapabilityKind::Other
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(
            self.kind(),
            CapabilityKind::Directory | CapabilityKind::MutableDirectory
        )
    }

    /// Whether this capability grants write access to a mutable directory.
    pub fn is_writable(&self) -> bool {
        self.0.starts_with(MUTABLE_DIRECTORY_CAP_PREFIX)
    }

    /// Shortened form for tables and log lines.
    pub fn short(&self) -> String {
        let body = self
            .0
            .strip_prefix(DIRECTORY_CAP_PREFIX)
            .or_else(|| self.0.strip_prefix(CONTENT_CAP_PREFIX))
            .or_else(|| self.0.strip_prefix(READONLY_DIRECTORY_CAP_PREFIX))
            .or_else(|| self.0.strip_prefix(MUTABLE_DIRECTORY_CAP_PREFIX))
            .unwrap_or(&self.0);
        body.chars().take(12).collect()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Capability {
    fn from(value: &str) -> Self {
        Capability::new(value)
    }
}

impl From<String> for Capability {
    fn from(value: String) -> Self {
        Capability::new(value)
    }
}

/// Identifier of a tracked file: its path relative to the folder root,
/// NFC-normalized, with `/` separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn new(relpath: &str) -> Result<Self, StorageError> {
        crate::path::normalize_relpath(relpath).map(FileId)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
