//! Credential lifecycle: caching, refresh and interactive login.
//!
//! This module provides:
//! - [`TokenCache`] - Supplies valid guest and access credentials
//! - [`LoginFlow`] - Which OAuth variant a login uses
//! - [`login_redirect_url`] - Builds the URL a user is sent to for login
//! - [`AuthError`] - Error type for all of the above

use thiserror::Error;

use crate::store::StoreError;
use crate::transport::TransportError;

mod login;
mod token_cache;

pub use login::{LoginFlow, LoginRedirect, login_redirect_url};
pub use token_cache::TokenCache;

/// Error type for authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The operation needs an endpoint that was not configured.
    #[error("no server configured for {endpoint}")]
    NoServerConfigured { endpoint: &'static str },

    /// There is no access credential to refresh or use.
    #[error("not logged in")]
    NotLoggedIn,

    /// The server-flow redirect carried no `code` parameter.
    #[error("redirect is missing the authorization code")]
    MissingCode,

    /// The redirect's `state` does not match the one issued with the login URL.
    #[error("redirect state does not match the login request")]
    StateMismatch,

    /// The implicit-flow redirect carried no `access_token` parameter.
    #[error("redirect is missing the access token")]
    MissingToken,

    /// The request to the auth server failed.
    #[error("network error: {0}")]
    Network(#[from] TransportError),

    /// The auth server answered but refused to issue a credential.
    #[error("auth server rejected the request: {message}")]
    Rejected { message: String },

    /// The auth server answered with something we could not read.
    #[error("invalid auth response: {message}")]
    InvalidResponse { message: String },

    /// Reading or writing the credential store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Building an OAuth URL failed.
    #[error("OAuth error: {message}")]
    OAuth { message: String },
}

impl AuthError {
    /// HTTP status of the underlying failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Network(e) => e.status(),
            _ => None,
        }
    }
}
