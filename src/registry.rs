//! Folder registry
//!
//! Persisted record of which collective each folder belongs to: the
//! collective's read capability, the write capability of this participant's
//! personal directory, and the collective's write capability when this
//! participant created it. Capabilities here are secrets; the file is only
//! ever written through a temporary sibling and rename.
//!
//! Every change re-reads the file first, so processes sharing one registry
//! only ever replace the folder they touched.

use crate::error::StorageError;
use crate::types::Capability;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One folder's place in a collective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    /// Read capability of the collective directory.
    pub collective: Capability,
    /// Write capability of this participant's personal directory.
    pub personal: Capability,
    /// Write capability of the collective directory, held by its creator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<Capability>,
}

impl Membership {
    pub fn is_admin(&self) -> bool {
        self.admin.is_some()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    /// Folder name -> membership, absent until the folder creates or joins a collective.
    folders: BTreeMap<String, Option<Membership>>,
}

pub struct FolderRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FolderRegistry {
    /// Open the registry at `path`; a missing file is an empty registry.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let registry = Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        };
        registry.load()?;
        Ok(registry)
    }

    /// Make sure `folder` has an entry. Existing memberships are left alone.
    pub fn register(&self, folder: &str) -> Result<(), StorageError> {
        self.modify(|folders| {
            if folders.contains_key(folder) {
                return false;
            }
            folders.insert(folder.to_string(), None);
            true
        })
    }

    pub fn membership(&self, folder: &str) -> Result<Option<Membership>, StorageError> {
        Ok(self.load()?.remove(folder).flatten())
    }

    /// Record that `folder` belongs to a collective. Replaces any earlier membership.
    pub fn set_membership(&self, folder: &str, membership: &Membership) -> Result<(), StorageError> {
        self.modify(|folders| {
            folders.insert(folder.to_string(), Some(membership.clone()));
            true
        })?;
        debug!(folder, collective = %membership.collective, "Recorded membership");
        Ok(())
    }

    /// Forget `folder`'s membership. Returns the membership that was dropped.
    pub fn leave(&self, folder: &str) -> Result<Option<Membership>, StorageError> {
        let mut dropped = None;
        self.modify(|folders| {
            dropped = folders.get_mut(folder).and_then(Option::take);
            dropped.is_some()
        })?;
        Ok(dropped)
    }

    pub fn list(&self) -> Result<Vec<(String, Option<Membership>)>, StorageError> {
        Ok(self.load()?.into_iter().collect())
    }

    fn load(&self) -> Result<BTreeMap<String, Option<Membership>>, StorageError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = fs::read(&self.path)
            .map_err(|e| StorageError::io(format!("Failed to read registry {:?}", self.path), e))?;
        let file = serde_json::from_slice::<RegistryFile>(&bytes).map_err(|e| {
            StorageError::Encoding(format!("Invalid registry {:?}: {}", self.path, e))
        })?;
        Ok(file.folders)
    }

    /// Re-read, apply `change`, and save when it reports a change.
    fn modify(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, Option<Membership>>) -> bool,
    ) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut folders = self.load()?;
        if change(&mut folders) {
            self.save(folders)?;
        }
        Ok(())
    }

    fn save(&self, folders: BTreeMap<String, Option<Membership>>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StorageError::io(format!("Failed to create parent directory {:?}", parent), e)
            })?;
        }
        let bytes = serde_json::to_vec_pretty(&RegistryFile { folders })
            .map_err(|e| StorageError::Encoding(format!("Failed to serialize registry: {}", e)))?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &bytes).map_err(|e| {
            StorageError::io(format!("Failed to write registry to {:?}", temp_path), e)
        })?;
        fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            StorageError::io(format!("Failed to rename temp file to {:?}", self.path), e)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn membership(tag: &str) -> Membership {
        Membership {
            collective: Capability::new(format!("URI:DIR2-RO:{}", tag)),
            personal: Capability::new(format!("URI:DIR2:{}-personal", tag)),
            admin: None,
        }
    }

    #[test]
    fn test_register_and_join() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("folders.json");

        let registry = FolderRegistry::open(&path).unwrap();
        registry.register("docs").unwrap();
        assert_eq!(registry.membership("docs").unwrap(), None);

        let joined = membership("docs");
        registry.set_membership("docs", &joined).unwrap();
        registry.register("docs").unwrap();

        let reopened = FolderRegistry::open(&path).unwrap();
        assert_eq!(reopened.membership("docs").unwrap(), Some(joined.clone()));
        assert_eq!(
            reopened.list().unwrap(),
            vec![("docs".to_string(), Some(joined))]
        );
    }

    #[test]
    fn test_writers_sharing_a_file_keep_each_others_folders() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("folders.json");
        let first = FolderRegistry::open(&path).unwrap();
        let second = FolderRegistry::open(&path).unwrap();

        first.set_membership("docs", &membership("docs")).unwrap();
        second.set_membership("photos", &membership("photos")).unwrap();

        let reopened = FolderRegistry::open(&path).unwrap();
        assert!(reopened.membership("docs").unwrap().is_some());
        assert!(reopened.membership("photos").unwrap().is_some());
    }

    #[test]
    fn test_leave_drops_membership_only() {
        let temp_dir = TempDir::new().unwrap();
        let registry = FolderRegistry::open(temp_dir.path().join("folders.json")).unwrap();
        let joined = membership("docs");
        registry.set_membership("docs", &joined).unwrap();

        assert_eq!(registry.leave("docs").unwrap(), Some(joined));
        assert_eq!(registry.leave("docs").unwrap(), None);
        assert_eq!(registry.list().unwrap(), vec![("docs".to_string(), None)]);
    }

    #[test]
    fn test_unknown_folder_has_no_membership() {
        let temp_dir = TempDir::new().unwrap();
        let registry = FolderRegistry::open(temp_dir.path().join("folders.json")).unwrap();
        assert_eq!(registry.membership("missing").unwrap(), None);
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_registry_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("folders.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            FolderRegistry::open(&path),
            Err(StorageError::Encoding(_))
        ));
    }
}
