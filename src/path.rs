//! File identifier normalization and directory entry name escaping

use crate::error::StorageError;
use std::path::{Component, Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

/// Entry names the snapshot node encoding uses for its own fields.
const RESERVED_ENTRY_NAMES: &[&str] = &["timestamp", "version"];

/// Normalize a folder-relative path into file identifier form.
///
/// This function:
/// 1. Normalizes Unicode to NFC
/// 2. Converts `\` separators to `/`
/// 3. Drops empty and `.` components
/// 4. Rejects `..`, absolute paths and empty results
pub fn normalize_relpath(relpath: &str) -> Result<String, StorageError> {
    let normalized: String = relpath.nfc().collect();
    let normalized = normalized.replace('\\', "/");

    if normalized.starts_with('/') {
        return Err(StorageError::InvalidPath(format!(
            "File identifier must be relative: {}",
            relpath
        )));
    }

    let mut parts = Vec::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(StorageError::InvalidPath(format!(
                    "File identifier escapes the folder: {}",
                    relpath
                )))
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return Err(StorageError::InvalidPath(format!(
            "Empty file identifier: {:?}",
            relpath
        )));
    }

    Ok(parts.join("/"))
}

/// Compute the folder-relative identifier of `path` inside `root`.
///
/// Both paths are canonicalized with dunce so symlinked roots and
/// platform prefixes compare equal.
pub fn relpath_under(root: &Path, path: &Path) -> Result<String, StorageError> {
    let canonical_root = dunce::canonicalize(root).map_err(|e| {
        StorageError::InvalidPath(format!("Failed to canonicalize {:?}: {}", root, e))
    })?;
    let canonical = dunce::canonicalize(path).map_err(|e| {
        StorageError::InvalidPath(format!("Failed to canonicalize {:?}: {}", path, e))
    })?;

    let relative = canonical.strip_prefix(&canonical_root).map_err(|_| {
        StorageError::InvalidPath(format!("{:?} is not inside {:?}", path, root))
    })?;

    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();

    normalize_relpath(&parts.join("/"))
}

/// Local filesystem location of a file identifier under `root`.
pub fn local_path(root: &Path, relpath: &str) -> PathBuf {
    relpath
        .split('/')
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

/// Escape a name for use as a linked-directory entry.
///
/// `@` becomes `@@` and `/` becomes `@_`. Names that would collide with a
/// reserved node entry get an `@=` prefix, which no other escape produces.
pub fn escape_entry_name(name: &str) -> String {
    let escaped = name.replace('@', "@@").replace('/', "@_");
    if RESERVED_ENTRY_NAMES.contains(&escaped.as_str()) {
        format!("@={}", escaped)
    } else {
        escaped
    }
}

/// Inverse of [`escape_entry_name`].
pub fn unescape_entry_name(entry: &str) -> Result<String, StorageError> {
    let body = entry.strip_prefix("@=").unwrap_or(entry);
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '@' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('@') => out.push('@'),
            Some('_') => out.push('/'),
            other => {
                return Err(StorageError::InvalidPath(format!(
                    "Bad escape {:?} in entry name {:?}",
                    other, entry
                )))
            }
        }
    }
    Ok(out)
}
