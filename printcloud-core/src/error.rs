//! Top-level error types for printcloud.

use thiserror::Error;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::store::StoreError;
use crate::task::TaskError;
use crate::transport::TransportError;

/// Top-level error type encompassing all printcloud errors.
#[derive(Debug, Error)]
pub enum PrintCloudError {
    /// Error from credential storage.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error obtaining or refreshing a credential.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// Error from an API request.
    #[error("request failed: {0}")]
    Transport(#[from] TransportError),

    /// Error while waiting on a deferred operation.
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl PrintCloudError {
    /// HTTP status of the underlying failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            PrintCloudError::Auth(e) => e.status(),
            PrintCloudError::Transport(e) => e.status(),
            PrintCloudError::Task(e) => e.status(),
            PrintCloudError::Store(_) | PrintCloudError::Config(_) => None,
        }
    }

    /// Whether the error is a wait that ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PrintCloudError::Task(TaskError::Timeout { .. }))
    }
}
