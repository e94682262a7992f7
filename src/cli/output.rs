//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::{ApiError, SyncError};

/// Map domain/service errors to a string for CLI output.
pub fn map_error(e: &ApiError) -> String {
    match e {
        ApiError::Sync(err) if err.is_retryable() => {
            format!("{} (the grid node may be down; try again)", e)
        }
        ApiError::Sync(SyncError::CycleDetected { .. }) => {
            format!("{} (snapshot history is corrupt)", e)
        }
        ApiError::NotJoined(folder) => format!(
            "{} (run `foldsync folder create {}` or `foldsync folder join {} <invite-code>`)",
            e, folder, folder
        ),
        _ => e.to_string(),
    }
}

/// Process exit code for an error.
pub fn exit_code(e: &ApiError) -> i32 {
    match e {
        ApiError::ConfigError(_)
        | ApiError::FolderNotFound(_)
        | ApiError::NotJoined(_)
        | ApiError::AlreadyJoined(_) => 2,
        ApiError::Sync(err) if err.is_retryable() => 75,
        _ => 1,
    }
}
