//! The token cache.
//!
//! [`TokenCache`] hands out guest and access credentials, fetching or
//! refreshing them only when the cached copy is no longer valid. Credentials
//! are persisted as JSON in a [`SecretStore`] under
//! `{prefix}-guest-token` and `{prefix}-access-token`.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), printcloud_core::AuthError> {
//! use std::sync::Arc;
//! use printcloud_core::{ClientConfig, CredentialKind, MemoryStore, ReqwestTransport, TokenCache};
//!
//! let config = ClientConfig::new("app-key", "https://api.example.com/api/v1")
//!     .with_guest_token_url("https://my-app.example.com/guest-token");
//! let cache = TokenCache::new(config, MemoryStore::new(), Arc::new(ReqwestTransport::new()));
//!
//! let header = cache.authorize_request(CredentialKind::Guest).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use super::login::{LoginFlow, LoginRedirect, login_redirect_url};
use super::AuthError;
use crate::{
    config::ClientConfig,
    credential::{Credential, CredentialKind, TokenResponse, TokenResponseError},
    redirect::RedirectParams,
    store::{Secret, SecretStore},
    transport::{ApiRequest, Transport},
};

/// Supplies valid bearer credentials for one client.
///
/// Guest fetches and access refreshes are each serialized by their own lock,
/// so overlapping callers share one network round trip per kind.
///
/// # Type Parameters
///
/// * `S` - The secret store implementation to use
pub struct TokenCache<S: SecretStore> {
    config: ClientConfig,
    store: S,
    transport: Arc<dyn Transport>,
    guest_fetch: Mutex<()>,
    access_refresh: Mutex<()>,
}

impl<S: SecretStore> TokenCache<S> {
    /// Create a token cache over the given store and transport.
    pub fn new(config: ClientConfig, store: S, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            store,
            transport,
            guest_fetch: Mutex::new(()),
            access_refresh: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    async fn read_credential(&self, kind: CredentialKind) -> Result<Option<Credential>, AuthError> {
        let key = self.config.storage_key(kind);
        match self.store.get(&key).await? {
            Some(secret) => {
                let credential = serde_json::from_str(secret.expose())
                    .map_err(crate::store::StoreError::from)?;
                Ok(Some(credential))
            }
            None => Ok(None),
        }
    }

    async fn write_credential(
        &self,
        kind: CredentialKind,
        credential: &Credential,
    ) -> Result<(), AuthError> {
        let key = self.config.storage_key(kind);
        let json = serde_json::to_string(credential).map_err(crate::store::StoreError::from)?;
        self.store.set(&key, &Secret::new(json)).await?;
        Ok(())
    }

    async fn valid_cached(&self, kind: CredentialKind) -> Result<Option<Credential>, AuthError> {
        Ok(self.read_credential(kind).await?.filter(Credential::is_valid))
    }

    /// Send a token request and read the body as a [`TokenResponse`].
    async fn fetch_token(&self, request: ApiRequest) -> Result<TokenResponse, AuthError> {
        let response = self.transport.send(request).await?;
        let token: TokenResponse =
            serde_json::from_value(response.body).map_err(|e| AuthError::InvalidResponse {
                message: e.to_string(),
            })?;

        if let Some(message) = token.error.clone() {
            return Err(AuthError::Rejected { message });
        }

        Ok(token)
    }

    /// Store an access credential, keeping its refresh token out of the stored copy.
    async fn store_access(&self, credential: &Credential) -> Result<Credential, AuthError> {
        if self.config.retain_refresh_token {
            if let Some(refresh) = &credential.refresh_token {
                self.store.set(&self.config.refresh_token_key(), refresh).await?;
            }
        }

        let stored = credential.without_refresh_token();
        self.write_credential(CredentialKind::Access, &stored).await?;
        Ok(stored)
    }

    /// The cached guest credential, fetching a new one if it is absent or expired.
    ///
    /// A failed fetch leaves the cache untouched.
    pub async fn get_guest_credential(&self) -> Result<Credential, AuthError> {
        if let Some(credential) = self.valid_cached(CredentialKind::Guest).await? {
            tracing::debug!("Using cached guest token");
            return Ok(credential);
        }

        let url = self
            .config
            .guest_token_url
            .as_deref()
            .ok_or(AuthError::NoServerConfigured {
                endpoint: "guest_token_url",
            })?;

        let _guard = self.guest_fetch.lock().await;

        // Another caller may have fetched while we waited for the lock.
        if let Some(credential) = self.valid_cached(CredentialKind::Guest).await? {
            tracing::debug!("Using guest token fetched by a concurrent caller");
            return Ok(credential);
        }

        tracing::info!("Fetching guest token");
        let response = self.fetch_token(ApiRequest::get(url)).await?;
        let credential = response
            .into_credential(Utc::now())
            .map_err(|e| AuthError::InvalidResponse {
                message: format!("guest token {}", e),
            })?
            .without_refresh_token();

        self.write_credential(CredentialKind::Guest, &credential).await?;
        Ok(credential)
    }

    /// The cached access credential, valid or not. Never touches the network.
    pub async fn get_access_credential(&self) -> Result<Option<Credential>, AuthError> {
        self.read_credential(CredentialKind::Access).await
    }

    /// The cached access token value, if the credential is still valid.
    pub async fn get_access_token(&self) -> Result<Option<String>, AuthError> {
        Ok(self
            .valid_cached(CredentialKind::Access)
            .await?
            .map(|c| c.access_token.expose().to_string()))
    }

    pub async fn is_access_credential_valid(&self) -> Result<bool, AuthError> {
        Ok(self.valid_cached(CredentialKind::Access).await?.is_some())
    }

    /// Renew the access credential from the refresh endpoint.
    ///
    /// The returned credential carries the server's refresh token, if any;
    /// the stored copy never does.
    pub async fn refresh_access_credential(&self) -> Result<Credential, AuthError> {
        let url = self.refresh_url()?;
        let _guard = self.access_refresh.lock().await;
        self.refresh_locked(url).await
    }

    fn refresh_url(&self) -> Result<&str, AuthError> {
        self.config
            .refresh_token_url
            .as_deref()
            .ok_or(AuthError::NoServerConfigured {
                endpoint: "refresh_token_url",
            })
    }

    /// Refresh with `access_refresh` already held.
    async fn refresh_locked(&self, url: &str) -> Result<Credential, AuthError> {
        if self.read_credential(CredentialKind::Access).await?.is_none() {
            return Err(AuthError::NotLoggedIn);
        }

        let mut request = ApiRequest::get(url);
        if self.config.retain_refresh_token {
            if let Some(refresh) = self.store.get(&self.config.refresh_token_key()).await? {
                request = request.with_query("refresh_token", refresh.expose());
            }
        }

        tracing::info!("Refreshing access token");
        let response = self.fetch_token(request).await?;
        let credential = response
            .into_credential(Utc::now())
            .map_err(|e| AuthError::InvalidResponse {
                message: format!("refresh {}", e),
            })?;

        if self.read_credential(CredentialKind::Access).await?.is_none() {
            tracing::info!("Access token was removed during refresh; discarding the new one");
            return Err(AuthError::NotLoggedIn);
        }

        self.store_access(&credential).await?;
        tracing::info!("Successfully refreshed access token");

        Ok(credential)
    }

    /// Forget the logged-in user. Does nothing if no one is logged in.
    ///
    /// Waits for a refresh in flight, so the refreshed credential is removed too.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let _guard = self.access_refresh.lock().await;
        self.store
            .delete(&self.config.storage_key(CredentialKind::Access))
            .await?;
        self.store.delete(&self.config.refresh_token_key()).await?;

        tracing::info!("Logged out");
        Ok(())
    }

    /// Finish a login from the parameters of the redirect the browser landed on.
    pub async fn complete_login(
        &self,
        flow: LoginFlow,
        params: &RedirectParams,
    ) -> Result<Credential, AuthError> {
        let credential = match flow {
            LoginFlow::Server => self.exchange_code(params).await?,
            LoginFlow::Implicit => {
                let token = params.access_token.as_deref().ok_or(AuthError::MissingToken)?;
                let expires_in =
                    params
                        .expires_in_secs()
                        .ok_or_else(|| AuthError::InvalidResponse {
                            message: "redirect is missing a numeric expires_in".to_string(),
                        })?;
                Credential::issued(token, Utc::now(), expires_in).ok_or_else(|| {
                    AuthError::InvalidResponse {
                        message: format!(
                            "redirect expires_in of {} seconds is out of range",
                            expires_in
                        ),
                    }
                })?
            }
        };

        let stored = self.store_access(&credential).await?;
        tracing::info!("Login completed via {:?} flow", flow);
        Ok(stored)
    }

    /// [`complete_login`](Self::complete_login), after checking that the
    /// redirect echoes the `state` issued with the login URL.
    pub async fn complete_login_with_state(
        &self,
        flow: LoginFlow,
        params: &RedirectParams,
        expected_state: &str,
    ) -> Result<Credential, AuthError> {
        if params.state.as_deref() != Some(expected_state) {
            tracing::warn!("Rejecting login redirect with unexpected state");
            return Err(AuthError::StateMismatch);
        }
        self.complete_login(flow, params).await
    }

    async fn exchange_code(&self, params: &RedirectParams) -> Result<Credential, AuthError> {
        let code = params.code.as_deref().ok_or(AuthError::MissingCode)?;
        let url = self
            .config
            .access_token_url
            .as_deref()
            .ok_or(AuthError::NoServerConfigured {
                endpoint: "access_token_url",
            })?;

        let mut request = ApiRequest::get(url).with_query("code", code);
        let redirect_uri = self
            .config
            .redirect_uri
            .as_deref()
            .or_else(|| params.redirect_uri());
        if let Some(redirect_uri) = redirect_uri {
            request = request.with_query("redirect_uri", redirect_uri);
        }

        let response = self.fetch_token(request).await?;
        response
            .into_credential(Utc::now())
            .map_err(|e| match e {
                TokenResponseError::Missing(_) => AuthError::Rejected {
                    message: format!("access token {}", e),
                },
                TokenResponseError::LifetimeOutOfRange(_) => AuthError::InvalidResponse {
                    message: format!("access token {}", e),
                },
            })
    }

    /// `Authorization` header value for a request made as `kind`.
    ///
    /// For [`CredentialKind::Access`] this returns `None` when no one is
    /// logged in, or when the credential expired and no refresh endpoint is
    /// configured. An expired credential with a refresh endpoint is refreshed
    /// first. For [`CredentialKind::Guest`] this is
    /// [`get_guest_credential`](Self::get_guest_credential).
    pub async fn authorize_request(
        &self,
        kind: CredentialKind,
    ) -> Result<Option<String>, AuthError> {
        match kind {
            CredentialKind::Guest => {
                let credential = self.get_guest_credential().await?;
                Ok(Some(credential.authorization_header()))
            }
            CredentialKind::Access => {
                let Some(cached) = self.read_credential(CredentialKind::Access).await? else {
                    return Ok(None);
                };
                if cached.is_valid() {
                    return Ok(Some(cached.authorization_header()));
                }

                let Ok(url) = self.refresh_url() else {
                    tracing::debug!("Access token expired and no refresh endpoint configured");
                    return Ok(None);
                };

                let _guard = self.access_refresh.lock().await;
                if let Some(credential) = self.valid_cached(CredentialKind::Access).await? {
                    return Ok(Some(credential.authorization_header()));
                }

                let refreshed = self.refresh_locked(url).await?;
                Ok(Some(refreshed.authorization_header()))
            }
        }
    }

    /// Login URL for this client. See [`login_redirect_url`].
    pub fn login_redirect_url(
        &self,
        show_register: bool,
        flow: LoginFlow,
    ) -> Result<LoginRedirect, AuthError> {
        login_redirect_url(&self.config, show_register, flow)
    }
}

impl<S: SecretStore> std::fmt::Debug for TokenCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("client_id", &self.config.client_id)
            .field("storage_prefix", &self.config.storage_prefix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::transport::{ApiResponse, TransportError};
    use async_trait::async_trait;
    use chrono::Duration;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::{Value, json};
    use tokio::sync::Notify;

    /// Transport that answers every request with the same body and records the requests.
    struct FixedTransport {
        body: Value,
        requests: SyncMutex<Vec<ApiRequest>>,
    }

    impl FixedTransport {
        fn new(body: Value) -> Arc<Self> {
            Arc::new(Self {
                body,
                requests: SyncMutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
            self.requests.lock().push(request);
            Ok(ApiResponse::new(200, self.body.clone()))
        }
    }

    /// Transport that holds each request until `release` is notified.
    struct GatedTransport {
        body: Value,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn send(&self, _request: ApiRequest) -> Result<ApiResponse, TransportError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(ApiResponse::new(200, self.body.clone()))
        }
    }

    fn cache(config: ClientConfig, transport: Arc<FixedTransport>) -> TokenCache<MemoryStore> {
        TokenCache::new(config, MemoryStore::new(), transport)
    }

    fn base_config() -> ClientConfig {
        ClientConfig::new("app", "https://api.example.com")
    }

    #[tokio::test]
    async fn test_guest_without_server_configured() {
        let transport = FixedTransport::new(json!({}));
        let cache = cache(base_config(), transport.clone());

        let result = cache.get_guest_credential().await;
        assert!(matches!(
            result,
            Err(AuthError::NoServerConfigured { endpoint: "guest_token_url" })
        ));
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn test_guest_is_memoized() {
        let transport = FixedTransport::new(json!({"access_token": "g1", "expires_in": 3600}));
        let config = base_config().with_guest_token_url("https://auth.example.com/guest");
        let cache = cache(config, transport.clone());

        let first = cache.get_guest_credential().await.unwrap();
        let second = cache.get_guest_credential().await.unwrap();

        assert_eq!(first.access_token.expose(), "g1");
        assert_eq!(second.access_token.expose(), "g1");
        assert_eq!(transport.count(), 1);
    }

    #[tokio::test]
    async fn test_guest_rejected_leaves_cache_empty() {
        let transport = FixedTransport::new(json!({"Error": "bad secret"}));
        let config = base_config().with_guest_token_url("https://auth.example.com/guest");
        let cache = cache(config, transport);

        let result = cache.get_guest_credential().await;
        assert!(matches!(result, Err(AuthError::Rejected { ref message }) if message == "bad secret"));
        assert!(
            cache
                .store()
                .get("printcloud-guest-token")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_access_reads_never_fetch() {
        let transport = FixedTransport::new(json!({}));
        let cache = cache(base_config(), transport.clone());

        assert!(cache.get_access_credential().await.unwrap().is_none());
        assert!(cache.get_access_token().await.unwrap().is_none());
        assert!(!cache.is_access_credential_valid().await.unwrap());
        assert_eq!(cache.authorize_request(CredentialKind::Access).await.unwrap(), None);
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn test_implicit_login_then_logout() {
        let transport = FixedTransport::new(json!({}));
        let cache = cache(base_config(), transport);

        let params = RedirectParams::from_pairs("access_token=a1&expires_in=600");
        let credential = cache.complete_login(LoginFlow::Implicit, &params).await.unwrap();
        assert_eq!(credential.access_token.expose(), "a1");
        assert!(cache.is_access_credential_valid().await.unwrap());
        assert_eq!(
            cache.authorize_request(CredentialKind::Access).await.unwrap(),
            Some("Bearer a1".to_string())
        );

        cache.logout().await.unwrap();
        cache.logout().await.unwrap();
        assert!(cache.get_access_credential().await.unwrap().is_none());
        assert!(!cache.is_access_credential_valid().await.unwrap());
    }

    #[tokio::test]
    async fn test_login_missing_parameters() {
        let transport = FixedTransport::new(json!({}));
        let config = base_config().with_access_token_url("https://auth.example.com/access");
        let cache = cache(config, transport);
        let empty = RedirectParams::default();

        assert!(matches!(
            cache.complete_login(LoginFlow::Server, &empty).await,
            Err(AuthError::MissingCode)
        ));
        assert!(matches!(
            cache.complete_login(LoginFlow::Implicit, &empty).await,
            Err(AuthError::MissingToken)
        ));
    }

    #[tokio::test]
    async fn test_server_login_strips_refresh_token() {
        let transport = FixedTransport::new(
            json!({"access_token": "a1", "expires_in": "600", "refresh_token": "r1"}),
        );
        let config = base_config()
            .with_access_token_url("https://auth.example.com/access")
            .with_redirect_uri("https://app.example.com/cb");
        let cache = cache(config, transport.clone());

        let params = RedirectParams::from_pairs("code=c1");
        let credential = cache.complete_login(LoginFlow::Server, &params).await.unwrap();
        assert!(credential.refresh_token.is_none());

        let request = transport.requests.lock()[0].clone();
        assert_eq!(request.url, "https://auth.example.com/access");
        assert!(request.query.contains(&("code".to_string(), "c1".to_string())));
        assert!(request.query.contains(&(
            "redirect_uri".to_string(),
            "https://app.example.com/cb".to_string()
        )));

        let stored = cache.get_access_credential().await.unwrap().unwrap();
        assert!(stored.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_refresh_requires_server_and_login() {
        let transport = FixedTransport::new(json!({"access_token": "a2", "expires_in": 60}));
        let no_server = cache(base_config(), transport.clone());
        assert!(matches!(
            no_server.refresh_access_credential().await,
            Err(AuthError::NoServerConfigured { endpoint: "refresh_token_url" })
        ));

        let config = base_config().with_refresh_token_url("https://auth.example.com/refresh");
        let not_logged_in = cache(config, transport.clone());
        assert!(matches!(
            not_logged_in.refresh_access_credential().await,
            Err(AuthError::NotLoggedIn)
        ));
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn test_expired_access_without_refresh_is_anonymous() {
        let transport = FixedTransport::new(json!({}));
        let cache = cache(base_config(), transport.clone());

        let expired = Credential::issued("old", Utc::now() - Duration::hours(2), 60).unwrap();
        cache
            .write_credential(CredentialKind::Access, &expired)
            .await
            .unwrap();

        assert_eq!(cache.authorize_request(CredentialKind::Access).await.unwrap(), None);
        assert!(cache.get_access_token().await.unwrap().is_none());
        assert!(cache.get_access_credential().await.unwrap().is_some());
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn test_retained_refresh_token_round_trip() {
        let transport = FixedTransport::new(
            json!({"access_token": "a2", "expires_in": 60, "refresh_token": "r2"}),
        );
        let config = base_config()
            .with_refresh_token_url("https://auth.example.com/refresh")
            .with_retained_refresh_token(true);
        let cache = cache(config, transport.clone());

        let expired = Credential::issued("old", Utc::now() - Duration::hours(2), 60).unwrap();
        cache
            .write_credential(CredentialKind::Access, &expired)
            .await
            .unwrap();
        cache
            .store()
            .set("printcloud-refresh-token", &Secret::new("r1"))
            .await
            .unwrap();

        let refreshed = cache.refresh_access_credential().await.unwrap();
        assert_eq!(refreshed.refresh_token.as_ref().unwrap().expose(), "r2");

        let request = transport.requests.lock()[0].clone();
        assert_eq!(
            request.query,
            vec![("refresh_token".to_string(), "r1".to_string())]
        );

        let retained = cache.store().get("printcloud-refresh-token").await.unwrap();
        assert_eq!(retained.unwrap().expose(), "r2");
        let stored = cache.get_access_credential().await.unwrap().unwrap();
        assert!(stored.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_out_of_range_lifetimes_are_invalid_responses() {
        let transport =
            FixedTransport::new(json!({"access_token": "g", "expires_in": i64::MAX}));
        let config = base_config().with_guest_token_url("https://auth.example.com/guest");
        let cache = cache(config, transport);

        let result = cache.get_guest_credential().await;
        assert!(matches!(result, Err(AuthError::InvalidResponse { .. })));
        assert!(
            cache
                .read_credential(CredentialKind::Guest)
                .await
                .unwrap()
                .is_none()
        );

        let params = RedirectParams::from_pairs("access_token=a&expires_in=1e300");
        let result = cache.complete_login(LoginFlow::Implicit, &params).await;
        assert!(matches!(result, Err(AuthError::InvalidResponse { .. })));
        assert!(cache.get_access_credential().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logout_during_refresh_stays_logged_out() {
        let transport = Arc::new(GatedTransport {
            body: json!({"access_token": "new", "expires_in": 3600}),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let config = base_config().with_refresh_token_url("https://auth.example.com/refresh");
        let cache = Arc::new(TokenCache::new(config, MemoryStore::new(), transport.clone()));

        let expired = Credential::issued("old", Utc::now() - Duration::hours(2), 60).unwrap();
        cache
            .write_credential(CredentialKind::Access, &expired)
            .await
            .unwrap();

        let refresh = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.refresh_access_credential().await })
        };
        transport.entered.notified().await;

        let logout = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.logout().await })
        };
        tokio::task::yield_now().await;
        assert!(!logout.is_finished());

        transport.release.notify_one();
        let refreshed = refresh.await.unwrap().unwrap();
        logout.await.unwrap().unwrap();

        assert_eq!(refreshed.access_token.expose(), "new");
        assert!(cache.get_access_credential().await.unwrap().is_none());
        assert!(!cache.is_access_credential_valid().await.unwrap());
    }

    #[tokio::test]
    async fn test_login_state_must_match() {
        let transport = FixedTransport::new(json!({"access_token": "a1", "expires_in": 600}));
        let config = base_config().with_access_token_url("https://auth.example.com/access");
        let cache = cache(config, transport.clone());

        for params in [
            RedirectParams::from_pairs("code=c1&state=forged"),
            RedirectParams::from_pairs("code=c1"),
        ] {
            let result = cache
                .complete_login_with_state(LoginFlow::Server, &params, "s1")
                .await;
            assert!(matches!(result, Err(AuthError::StateMismatch)));
        }
        assert_eq!(transport.count(), 0);
        assert!(cache.get_access_credential().await.unwrap().is_none());

        let params = RedirectParams::from_pairs("code=c1&state=s1");
        let credential = cache
            .complete_login_with_state(LoginFlow::Server, &params, "s1")
            .await
            .unwrap();
        assert_eq!(credential.access_token.expose(), "a1");
        assert_eq!(transport.count(), 1);
    }
}
