//! Authorized requests against the API root.
//!
//! [`ApiClient`] is the layer resource wrappers build on: it prefixes the API
//! root, asks the [`TokenCache`] for an `Authorization` value before every
//! call and hands deferred responses to a [`TaskWaiter`].

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::{
    auth::{AuthError, TokenCache},
    config::ClientConfig,
    credential::CredentialKind,
    error::PrintCloudError,
    store::SecretStore,
    task::{ProgressCallback, TaskError, TaskPoller, TaskWaiter, WaitOptions},
    transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport},
};

/// A configured client. Cheap to clone; clones share one token cache.
pub struct ApiClient<S: SecretStore> {
    tokens: Arc<TokenCache<S>>,
}

impl<S: SecretStore> Clone for ApiClient<S> {
    fn clone(&self) -> Self {
        Self {
            tokens: Arc::clone(&self.tokens),
        }
    }
}

impl<S: SecretStore> ApiClient<S> {
    /// Create a client that talks HTTP through `reqwest`.
    ///
    /// Fails if the configuration does not validate.
    pub fn new(config: ClientConfig, store: S) -> Result<Self, PrintCloudError> {
        Self::with_transport(config, store, Arc::new(ReqwestTransport::new()))
    }

    /// Create a client with a custom transport.
    pub fn with_transport(
        config: ClientConfig,
        store: S,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, PrintCloudError> {
        config.validate()?;
        tracing::debug!(
            "Created {} client for {}",
            config.api_name(),
            config.api_root
        );
        Ok(Self {
            tokens: Arc::new(TokenCache::new(config, store, transport)),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        self.tokens.config()
    }

    pub fn tokens(&self) -> &TokenCache<S> {
        &self.tokens
    }

    /// Build a request for `endpoint`, authorized as `kind` when a credential is available.
    pub async fn request(
        &self,
        kind: CredentialKind,
        method: Method,
        endpoint: &str,
    ) -> Result<ApiRequest, AuthError> {
        let authorization = self.tokens.authorize_request(kind).await?;
        Ok(ApiRequest::new(method, self.config().api_url(endpoint)).with_authorization(authorization))
    }

    /// Send a request built by [`request`](Self::request).
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, PrintCloudError> {
        Ok(self.tokens.transport().send(request).await?)
    }

    /// Authorize and send in one step.
    pub async fn call(
        &self,
        kind: CredentialKind,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<ApiResponse, PrintCloudError> {
        let mut request = self.request(kind, method, endpoint).await?;
        if let Some(body) = body {
            request = request.with_body(body);
        }
        self.send(request).await
    }

    /// A waiter that polls through this client with the configured pacing.
    pub fn waiter(&self) -> TaskWaiter<Self> {
        TaskWaiter::new(self.clone(), WaitOptions::from(&self.config().tasks))
    }

    /// Send an operation that may be deferred and wait for its result.
    pub async fn send_and_wait(
        &self,
        request: ApiRequest,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Value, PrintCloudError> {
        let response = self.send(request).await?;
        let mut waiter = self.waiter();
        if let Some(callback) = on_progress {
            waiter = waiter.with_progress(callback);
        }
        Ok(waiter.wait(response).await?)
    }
}

#[async_trait]
impl<S: SecretStore> TaskPoller for ApiClient<S> {
    async fn poll(&self, task_id: &str) -> Result<Value, TaskError> {
        let url = self.config().task_status_url(task_id);
        let authorization = self.tokens.authorize_request(CredentialKind::Access).await?;
        let request = ApiRequest::get(url).with_authorization(authorization);
        let response = self.tokens.transport().send(request).await?;
        Ok(response.body)
    }
}

impl<S: SecretStore> std::fmt::Debug for ApiClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("api_root", &self.config().api_root)
            .field("tokens", &self.tokens)
            .finish()
    }
}
