//! Key-value storage for persisted credentials.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`SecretStore`] - Trait for storage backends
//! - [`MemoryStore`] - In-memory implementation for testing
//! - [`FileStore`] - JSON file on disk, one storage scope per file
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`create_store`] - Helper to select a backend from configuration
//!
//! # Storage Key Convention
//!
//! Credentials live under fixed keys of the form `{prefix}-{kind}-token`,
//! e.g. `printcloud-guest-token`. The value is the credential serialized as JSON.
//!
//! # Example
//!
//! ```rust,ignore
//! use printcloud_core::store::{MemoryStore, Secret, SecretStore};
//!
//! let store = MemoryStore::new();
//! store.set("printcloud-guest-token", &Secret::new("{...}")).await?;
//! let value = store.get("printcloud-guest-token").await?;
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod file;
mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use self::keyring::KeyringStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is zeroed when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Reading or writing a storage file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },
}

/// Abstraction over key-value storage backends.
///
/// Implementations include:
/// - [`MemoryStore`] - In-memory storage for testing
/// - [`FileStore`] - JSON file on disk
/// - [`KeyringStore`] (with `keyring-store` feature) - OS keyring
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store a secret at the given key.
    ///
    /// Overwrites any existing value.
    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError>;

    /// Delete a secret by key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List all keys matching a prefix.
    ///
    /// Returns an empty vec if no keys match.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Check if a key exists without retrieving the value.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

#[async_trait]
impl<S: SecretStore + ?Sized> SecretStore for Box<S> {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        (**self).set(key, secret).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        (**self).list_keys(prefix).await
    }
}

/// Which storage backend to use for credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local storage; nothing survives a restart.
    Memory,

    /// A JSON file at the given path.
    File { path: PathBuf },

    /// The OS keyring, namespaced by `service`.
    Keyring { service: String },
}

/// Create a secret store for the configured backend.
///
/// # Backend Selection Logic
///
/// - [`StoreBackend::File`] loads (or creates) the file and fails on I/O errors
/// - [`StoreBackend::Keyring`] attempts to create a [`KeyringStore`] and falls
///   back to [`MemoryStore`] with a warning if the keyring is unavailable or
///   the `keyring-store` feature is disabled
/// - [`StoreBackend::Memory`] returns a fresh [`MemoryStore`]
///
/// # Example
///
/// ```rust,ignore
/// use printcloud_core::store::{create_store, StoreBackend};
///
/// let store = create_store(&StoreBackend::Memory)?;
/// ```
pub fn create_store(backend: &StoreBackend) -> Result<Box<dyn SecretStore>, StoreError> {
    match backend {
        StoreBackend::File { path } => {
            tracing::debug!("Using file secret storage at {:?}", path);
            Ok(Box::new(FileStore::load_from_path(path.clone())?))
        }
        StoreBackend::Keyring { service } => Ok(keyring_or_memory(service)),
        StoreBackend::Memory => {
            tracing::debug!("Using in-memory secret storage");
            Ok(Box::new(MemoryStore::new()))
        }
    }
}

#[cfg(feature = "keyring-store")]
fn keyring_or_memory(service: &str) -> Box<dyn SecretStore> {
    match KeyringStore::try_new(service) {
        Ok(store) => {
            tracing::info!("Using OS keyring for credential storage");
            Box::new(store)
        }
        Err(e) => {
            tracing::warn!(
                "Keyring unavailable ({}), falling back to memory store. \
                 Credentials will not persist across restarts.",
                e
            );
            Box::new(MemoryStore::new())
        }
    }
}

#[cfg(not(feature = "keyring-store"))]
fn keyring_or_memory(_service: &str) -> Box<dyn SecretStore> {
    tracing::warn!(
        "Keyring storage requested but keyring-store feature not enabled. \
         Using memory store. Credentials will not persist across restarts."
    );
    Box::new(MemoryStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_redacted() {
        let secret = Secret::new("super-secret");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_secret_display_redacted() {
        let secret = Secret::new("super-secret");
        let display = format!("{}", secret);
        assert!(!display.contains("super-secret"));
        assert!(display.contains("REDACTED"));
    }

    #[test]
    fn test_secret_serializes_as_plain_string() {
        let json = serde_json::to_string(&Secret::new("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }

    #[test]
    fn test_secret_into_inner() {
        assert_eq!(Secret::new("value").into_inner(), "value");
    }

    #[test]
    fn test_store_backend_from_toml_shape() {
        let backend: StoreBackend =
            serde_json::from_value(serde_json::json!({"backend": "file", "path": "/tmp/c.json"}))
                .unwrap();
        assert_eq!(
            backend,
            StoreBackend::File {
                path: PathBuf::from("/tmp/c.json")
            }
        );
    }

    #[tokio::test]
    async fn test_create_store_memory() {
        let store = create_store(&StoreBackend::Memory).unwrap();

        store.set("test-key", &Secret::new("test")).await.unwrap();
        let retrieved = store.get("test-key").await.unwrap();
        assert_eq!(retrieved.unwrap().expose(), "test");
    }

    #[tokio::test]
    async fn test_create_store_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials.json");
        let store = create_store(&StoreBackend::File { path: path.clone() }).unwrap();

        store.set("test-key", &Secret::new("test")).await.unwrap();
        assert!(path.exists());
    }
}
