//! CLI configuration handling.
//!
//! Configuration lives in `<config_dir>/printcloud.toml`:
//!
//! ```toml
//! storage = "file"
//! log_level = "info"
//!
//! [client]
//! client_id = "my-app-key"
//! api_root = "https://sandbox.example.com/api/v1"
//! guest_token_url = "https://my-app.example.com/guest-token"
//! refresh_token_url = "https://my-app.example.com/refresh"
//! ```

use anyhow::{Context, Result};
use directories::ProjectDirs;
use printcloud_core::{ClientConfig, FileStore, StoreBackend};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that overrides `client.client_id`.
pub const CLIENT_ID_ENV: &str = "PRINTCLOUD_CLIENT_ID";

/// Where credentials are kept between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// API client settings.
    #[serde(default)]
    pub client: Option<ClientConfig>,

    /// Credential storage backend.
    #[serde(default)]
    pub storage: StorageKind,

    /// Directory for the file credential store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Logging level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_data_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".printcloud"))
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            client: None,
            storage: StorageKind::default(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            config_path: PathBuf::new(),
        }
    }
}

impl CliConfig {
    /// The client configuration with environment overrides applied.
    pub fn client_config(&self) -> Result<ClientConfig> {
        self.client_config_with(std::env::var(CLIENT_ID_ENV).ok())
    }

    /// Like [`client_config`](Self::client_config), with the override passed in.
    pub fn client_config_with(&self, client_id: Option<String>) -> Result<ClientConfig> {
        let mut client = self.client.clone().with_context(|| {
            format!("No [client] section in {:?}", self.config_path)
        })?;

        if let Some(client_id) = client_id.filter(|id| !id.is_empty()) {
            client.client_id = client_id;
        }

        client
            .validate()
            .with_context(|| format!("Invalid [client] section in {:?}", self.config_path))?;
        Ok(client)
    }

    /// The store backend selected by `storage`.
    pub fn store_backend(&self) -> StoreBackend {
        match self.storage {
            StorageKind::File => StoreBackend::File {
                path: FileStore::default_path(&self.data_dir),
            },
            StorageKind::Keyring => StoreBackend::Keyring {
                service: "printcloud".to_string(),
            },
            StorageKind::Memory => StoreBackend::Memory,
        }
    }
}

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("printcloud.toml"))
        .unwrap_or_else(|| PathBuf::from("printcloud.toml"))
}

/// Load configuration from the default location or create defaults.
pub fn load_config() -> Result<CliConfig> {
    load_config_from(&default_config_path())
}

/// Load configuration from `config_path`, defaulting when the file is absent.
pub fn load_config_from(config_path: &Path) -> Result<CliConfig> {
    let mut config = if config_path.exists() {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?
    } else {
        CliConfig::default()
    };

    config.config_path = config_path.to_path_buf();
    Ok(config)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "printcloud", "printcloud")
}
