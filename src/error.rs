//! Error types for the foldsync snapshot and reconciliation engine.

use crate::types::Capability;
use thiserror::Error;

/// Errors reported by an object store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport or I/O failure. Safe to retry.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with a non-success status. Not retried automatically.
    #[error("Store rejected request (status {status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Capability not found in store: {0}")]
    NotFound(Capability),

    /// A request body could not be encoded.
    #[error("Failed to encode request: {0}")]
    Encoding(String),

    /// The store returned bytes that do not decode as the expected object.
    #[error("Malformed object {capability}: {reason}")]
    Malformed {
        capability: Capability,
        reason: String,
    },
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Local durable state errors (stash, heads, registry, identity files).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: Capability,
        actual: Capability,
    },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StorageError {
    /// Wrap a foreign error as an I/O error with context, the way every
    /// sled/bincode/fs call site reports failures.
    pub(crate) fn io(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        StorageError::IoError(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("{}: {}", context, err),
        ))
    }
}

/// Errors from authoring, ancestry walks, and reconciliation.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The parent chain revisits a snapshot. The history is corrupt.
    #[error("Cycle detected in snapshot history at {capability}")]
    CycleDetected { capability: Capability },

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Invalid invite: {0}")]
    InvalidInvite(String),

    /// Only the participant holding the collective's write capability may
    /// change its membership.
    #[error("Not the administrator of collective {0}")]
    NotAdministrator(String),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Errors at the application surface (configuration, identity, CLI).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Identity error: {0}")]
    IdentityError(String),

    #[error("Folder not configured: {0}")]
    FolderNotFound(String),

    #[error("Folder {0} is not a member of any collective")]
    NotJoined(String),

    #[error("Folder {0} already belongs to a collective")]
    AlreadyJoined(String),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Sync(SyncError::Store(err))
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
