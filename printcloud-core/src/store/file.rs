//! File-backed credential storage.
//!
//! All entries live in a single JSON document which is rewritten after every
//! mutation, so one file corresponds to one storage scope. The document is
//! written to an owner-only temporary file and renamed over the old one.
//!
//! # Storage Location
//!
//! The CLI keeps its store at `{data_dir}/credentials.json`; see
//! [`FileStore::default_path`].

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::{Secret, SecretStore, StoreError};

/// On-disk document format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileStoreData {
    /// Version of the file format (for future migrations).
    version: u32,

    entries: BTreeMap<String, Secret>,
}

impl Default for FileStoreData {
    fn default() -> Self {
        Self {
            version: 1,
            entries: BTreeMap::new(),
        }
    }
}

/// JSON file credential store.
///
/// Reads are served from an in-memory copy loaded at construction time. The
/// copy only changes once the file write has succeeded.
pub struct FileStore {
    path: PathBuf,
    data: RwLock<FileStoreData>,
}

impl FileStore {
    /// Default location of the credentials file inside a data directory.
    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join("credentials.json")
    }

    /// Load the store from a specific path.
    ///
    /// Creates parent directories if they don't exist. A missing file is an
    /// empty store; the file is created on the first write.
    pub fn load_from_path(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            FileStoreData::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Get the storage path for this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, data: &FileStoreData) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(data)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        // NamedTempFile is created with mode 0600 on unix.
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(contents.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("keys_count", &self.data.read().entries.len())
            .finish()
    }
}

#[async_trait]
impl SecretStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.data.read().entries.get(key).cloned())
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        let mut data = self.data.write();
        let mut updated = data.clone();
        updated.entries.insert(key.to_string(), secret.clone());
        self.save(&updated)?;
        *data = updated;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self.data.write();
        if !data.entries.contains_key(key) {
            return Ok(());
        }

        let mut updated = data.clone();
        updated.entries.remove(key);
        self.save(&updated)?;
        *data = updated;
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .data
            .read()
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
