//! Client configuration.
//!
//! A [`ClientConfig`] is owned by each constructed client, so several
//! independent clients (say, one per test) can coexist in a process.
//!
//! # Example
//!
//! ```
//! use printcloud_core::config::ClientConfig;
//!
//! let config = ClientConfig::new("my-app-key", "https://sandbox.example.com/api/v1")
//!     .with_guest_token_url("https://auth.example.com/guest")
//!     .with_refresh_token_url("https://auth.example.com/refresh");
//!
//! assert_eq!(config.api_name(), "sandbox");
//! assert_eq!(config.api_url("/print/printers"), "https://sandbox.example.com/api/v1/print/printers");
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::credential::CredentialKind;
use thiserror::Error;
use url::Url;

/// Default prefix for storage keys.
pub const DEFAULT_STORAGE_PREFIX: &str = "printcloud";

/// Smallest poll interval a waiter will use.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Error type for invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field is empty.
    #[error("missing required setting: {field}")]
    Missing { field: &'static str },

    /// A URL setting could not be parsed.
    #[error("invalid URL for {field}: {message}")]
    InvalidUrl { field: &'static str, message: String },
}

/// Settings for the async operation waiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Status endpoint relative to the API root; `{task_id}` is substituted.
    pub status_path: String,

    /// Delay between polls in milliseconds.
    pub poll_interval_ms: u64,

    /// Give up after this many milliseconds since the first poll.
    pub timeout_ms: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            status_path: "/tasks/{task_id}".to_string(),
            poll_interval_ms: 100,
            timeout_ms: 120_000,
        }
    }
}

impl TaskConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Status path for one task.
    pub fn status_path_for(&self, task_id: &str) -> String {
        self.status_path.replace("{task_id}", task_id)
    }
}

/// Everything a client needs to talk to the API and its auth servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// The app key issued when the application was registered.
    pub client_id: String,

    /// API root, e.g. `https://sandbox.example.com/api/v1`.
    pub api_root: String,

    /// Where the OAuth service returns the browser to after login.
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// App-operated endpoint that exchanges the client secret for a guest token.
    #[serde(default)]
    pub guest_token_url: Option<String>,

    /// App-operated endpoint that exchanges an authorization code for an access token.
    #[serde(default)]
    pub access_token_url: Option<String>,

    /// App-operated endpoint that renews an access token.
    #[serde(default)]
    pub refresh_token_url: Option<String>,

    /// Keep the refresh token from a refresh response for the next refresh.
    ///
    /// It is stored under its own key and never in the access credential.
    #[serde(default)]
    pub retain_refresh_token: bool,

    /// Prefix for storage keys.
    #[serde(default = "default_storage_prefix")]
    pub storage_prefix: String,

    #[serde(default)]
    pub tasks: TaskConfig,
}

fn default_storage_prefix() -> String {
    DEFAULT_STORAGE_PREFIX.to_string()
}

impl ClientConfig {
    /// Create a configuration with no auth servers configured.
    pub fn new(client_id: impl Into<String>, api_root: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            api_root: api_root.into(),
            redirect_uri: None,
            guest_token_url: None,
            access_token_url: None,
            refresh_token_url: None,
            retain_refresh_token: false,
            storage_prefix: default_storage_prefix(),
            tasks: TaskConfig::default(),
        }
    }

    /// Set the login redirect URI.
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    /// Set the guest token endpoint.
    pub fn with_guest_token_url(mut self, url: impl Into<String>) -> Self {
        self.guest_token_url = Some(url.into());
        self
    }

    /// Set the code exchange endpoint.
    pub fn with_access_token_url(mut self, url: impl Into<String>) -> Self {
        self.access_token_url = Some(url.into());
        self
    }

    /// Set the refresh endpoint.
    pub fn with_refresh_token_url(mut self, url: impl Into<String>) -> Self {
        self.refresh_token_url = Some(url.into());
        self
    }

    /// Keep refresh tokens between refreshes.
    pub fn with_retained_refresh_token(mut self, retain: bool) -> Self {
        self.retain_refresh_token = retain;
        self
    }

    /// Set the storage key prefix.
    pub fn with_storage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_prefix = prefix.into();
        self
    }

    /// Set the task waiter settings.
    pub fn with_tasks(mut self, tasks: TaskConfig) -> Self {
        self.tasks = tasks;
        self
    }

    /// Check required fields and URL syntax.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Missing { field: "client_id" });
        }
        if self.api_root.trim().is_empty() {
            return Err(ConfigError::Missing { field: "api_root" });
        }

        check_url("api_root", Some(&self.api_root))?;
        check_url("redirect_uri", self.redirect_uri.as_deref())?;
        check_url("guest_token_url", self.guest_token_url.as_deref())?;
        check_url("access_token_url", self.access_token_url.as_deref())?;
        check_url("refresh_token_url", self.refresh_token_url.as_deref())?;
        Ok(())
    }

    /// `"sandbox"` when the API host starts with `sandbox.`, else `"production"`.
    pub fn api_name(&self) -> &'static str {
        let is_sandbox = Url::parse(&self.api_root)
            .ok()
            .and_then(|url| url.host_str().map(|host| host.starts_with("sandbox.")))
            .unwrap_or(false);

        if is_sandbox { "sandbox" } else { "production" }
    }

    /// Absolute URL for an endpoint path such as `/print/printers`.
    pub fn api_url(&self, endpoint: &str) -> String {
        let root = self.api_root.trim_end_matches('/');
        if endpoint.starts_with('/') {
            format!("{}{}", root, endpoint)
        } else {
            format!("{}/{}", root, endpoint)
        }
    }

    /// Storage key of a credential kind under the configured prefix.
    pub fn storage_key(&self, kind: CredentialKind) -> String {
        kind.storage_key(&self.storage_prefix)
    }

    /// Storage key of the retained refresh token.
    pub fn refresh_token_key(&self) -> String {
        format!("{}-refresh-token", self.storage_prefix)
    }

    /// Absolute URL of a task's status endpoint.
    pub fn task_status_url(&self, task_id: &str) -> String {
        self.api_url(&self.tasks.status_path_for(task_id))
    }
}

fn check_url(field: &'static str, value: Option<&str>) -> Result<(), ConfigError> {
    if let Some(value) = value {
        Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
            field,
            message: e.to_string(),
        })?;
    }
    Ok(())
}
