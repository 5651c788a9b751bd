//! OS keyring-backed credential storage.

use async_trait::async_trait;
use keyring::Entry;

use super::{Secret, SecretStore, StoreError};

/// Key under which the list of stored keys is kept.
///
/// Platform keyrings have no enumeration API, so the store keeps its own index.
const INDEX_KEY: &str = "__index__";

/// OS keyring-backed credential store.
///
/// This store uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: Secret Service API (via libsecret)
/// - Windows: Credential Manager
///
/// Entries are named `{service_name}/{key}`.
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Try to create a new keyring store.
    ///
    /// Returns an error if the keyring backend is not available on this platform.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        let availability = format!("{}/__availability__", service_name);
        match Entry::new(&availability, "printcloud") {
            Ok(_) => Ok(Self {
                service_name: service_name.to_string(),
            }),
            Err(e) => Err(StoreError::KeyringUnavailable {
                message: format!("keyring backend not available: {}", e),
            }),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        let service = format!("{}/{}", self.service_name, key);
        Entry::new(&service, "printcloud").map_err(|e| StoreError::BackendError {
            message: format!("failed to create keyring entry: {}", e),
        })
    }

    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::PlatformFailure(e)) => Err(StoreError::BackendError {
                message: format!("platform keyring failure: {}", e),
            }),
            Err(e) => Err(StoreError::BackendError {
                message: format!("keyring error: {}", e),
            }),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| StoreError::BackendError {
                message: format!("failed to set keyring password: {}", e),
            })
    }

    fn index(&self) -> Result<Vec<String>, StoreError> {
        match self.read(INDEX_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn update_index(&self, f: impl FnOnce(&mut Vec<String>)) -> Result<(), StoreError> {
        let mut keys = self.index()?;
        f(&mut keys);
        self.write(INDEX_KEY, &serde_json::to_string(&keys)?)
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[async_trait]
impl SecretStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.read(key)?.map(Secret::new))
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        self.write(key, secret.expose())?;
        self.update_index(|keys| {
            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {}
            Err(e) => {
                return Err(StoreError::BackendError {
                    message: format!("failed to delete keyring entry: {}", e),
                });
            }
        }
        self.update_index(|keys| keys.retain(|k| k != key))
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .index()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}
