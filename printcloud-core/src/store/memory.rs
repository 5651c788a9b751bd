//! In-memory credential storage.
//!
//! Used by tests and by `storage = "memory"` in the CLI, where credentials
//! only live as long as the process.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::{Secret, SecretStore, StoreError};

/// Process-local secret store.
///
/// Keys are kept sorted, so [`list_keys`](SecretStore::list_keys) returns
/// them in the same order as the file store.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Secret>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with `entries`.
    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: RwLock::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), Secret::new(v)))
                    .collect(),
            ),
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys_count", &self.entries.read().len())
            .finish()
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), secret.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{Credential, CredentialKind};
    use chrono::Utc;

    #[tokio::test]
    async fn test_credential_json_round_trip() {
        let store = MemoryStore::new();
        let key = CredentialKind::Access.storage_key("printcloud");
        let credential = Credential::issued("a1", Utc::now(), 3600).unwrap();

        let json = serde_json::to_string(&credential).unwrap();
        store.set(&key, &Secret::new(json)).await.unwrap();

        let stored = store.get(&key).await.unwrap().unwrap();
        let read: Credential = serde_json::from_str(stored.expose()).unwrap();
        assert_eq!(read, credential);
        assert!(read.is_valid());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::with_entries([
            ("printcloud-access-token", "{}"),
            ("printcloud-refresh-token", "r1"),
        ]);

        for _ in 0..2 {
            store.delete("printcloud-access-token").await.unwrap();
            store.delete("printcloud-refresh-token").await.unwrap();
        }

        assert!(!store.exists("printcloud-access-token").await.unwrap());
        assert!(store.list_keys("printcloud-").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prefixes_keep_clients_apart() {
        let store = MemoryStore::with_entries([
            (CredentialKind::Guest.storage_key("sandbox"), "g-sandbox"),
            (CredentialKind::Access.storage_key("sandbox"), "a-sandbox"),
            (CredentialKind::Guest.storage_key("production"), "g-prod"),
            ("sandboxed-other".to_string(), "x"),
        ]);

        assert_eq!(
            store.list_keys("sandbox-").await.unwrap(),
            vec!["sandbox-access-token", "sandbox-guest-token"]
        );
        assert_eq!(
            store.list_keys("production-").await.unwrap(),
            vec!["production-guest-token"]
        );
        assert_eq!(store.list_keys("").await.unwrap().len(), 4);
        assert_eq!(
            store.get("production-guest-token").await.unwrap().unwrap().expose(),
            "g-prod"
        );
    }
}
