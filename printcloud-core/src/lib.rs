//! # printcloud Core
//!
//! Client core for a 3D-printing cloud REST API.
//!
//! This crate provides:
//! - A token cache that hands out valid guest and access credentials,
//!   refreshing them on demand
//! - An authorized request layer over a pluggable HTTP transport
//! - A task waiter that turns `202 Accepted` responses into final results
//! - In-memory, file and (optionally) keyring-based credential storage
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use printcloud_core::{ApiClient, ClientConfig, CredentialKind, MemoryStore};
//! use reqwest::Method;
//!
//! let config = ClientConfig::new("app-key", "https://api.example.com/api/v1")
//!     .with_guest_token_url("https://my-app.example.com/guest-token");
//! let client = ApiClient::new(config, MemoryStore::new())?;
//!
//! let request = client.request(CredentialKind::Guest, Method::POST, "/geom/meshes/import").await?;
//! let mesh = client.send_and_wait(request, None).await?;
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod credential;
pub mod error;
pub mod redirect;
pub mod store;
pub mod task;
pub mod transport;

pub use api::ApiClient;

pub use auth::{
    AuthError,
    LoginFlow,
    LoginRedirect,
    TokenCache,
    login_redirect_url,
};

pub use config::{
    ClientConfig,
    ConfigError,
    TaskConfig,
};

pub use credential::{
    Credential,
    CredentialKind,
    TokenResponse,
    TokenResponseError,
};

pub use error::PrintCloudError;

pub use redirect::RedirectParams;

pub use store::{
    FileStore,
    MemoryStore,
    Secret,
    SecretStore,
    StoreBackend,
    StoreError,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use task::{
    InitialResponse,
    ProgressCallback,
    TaskError,
    TaskHandle,
    TaskPoller,
    TaskStatus,
    TaskWaiter,
    WaitOptions,
};

pub use transport::{
    ApiRequest,
    ApiResponse,
    ReqwestTransport,
    Transport,
    TransportError,
};

/// Re-exported so callers can name request methods without depending on `reqwest`.
pub use reqwest::Method;
