//! Local folder walker
//!
//! Lists the regular files of a synchronized folder as file identifiers,
//! skipping the engine's own state directory and temporary files.

use crate::error::StorageError;
use crate::path::relpath_under;
use crate::types::FileId;
use std::path::PathBuf;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// Suffix of files being written into place.
pub const TEMP_SUFFIX: &str = ".tmp";

/// A regular file found in the folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub file: FileId,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct WalkerConfig {
    /// Whether to follow symbolic links (default: false)
    pub follow_symlinks: bool,
    /// Path components to skip entirely.
    pub ignore_names: Vec<String>,
    pub max_depth: Option<usize>,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            ignore_names: vec![".foldsync".to_string(), ".git".to_string()],
            max_depth: None,
        }
    }
}

pub struct Walker {
    root: PathBuf,
    config: WalkerConfig,
}

impl Walker {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            config: WalkerConfig::default(),
        }
    }

    pub fn with_config(root: PathBuf, config: WalkerConfig) -> Self {
        Self { root, config }
    }

    /// Collect every file, sorted by identifier.
    pub fn walk(&self) -> Result<Vec<LocalFile>, StorageError> {
        let mut files = Vec::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(self.config.follow_symlinks)
            .max_depth(self.config.max_depth.unwrap_or(usize::MAX))
            .into_iter()
            .filter_entry(|entry| !self.should_ignore(entry));

        for entry in walker {
            let entry =
                entry.map_err(|e| StorageError::io("Failed to walk directory", e))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path().to_path_buf();
            let relpath = relpath_under(&self.root, &path)?;
            let file = match FileId::new(&relpath) {
                Ok(file) => file,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping file with unusable name");
                    continue;
                }
            };
            let size = entry
                .metadata()
                .map_err(|e| StorageError::io(format!("Failed to read metadata for {:?}", path), e))?
                .len();

            files.push(LocalFile { file, path, size });
        }

        files.sort_by(|a, b| a.file.cmp(&b.file));
        Ok(files)
    }

    fn should_ignore(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_file() && name.ends_with(TEMP_SUFFIX) {
            return true;
        }
        self.config
            .ignore_names
            .iter()
            .any(|ignored| name == ignored.as_str())
    }
}
