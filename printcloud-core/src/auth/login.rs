//! Login redirect URLs.
//!
//! The user is sent to `<api_root>/oauth/authorize`; after authenticating the
//! browser comes back to the configured redirect URI carrying either a
//! `code` (server flow) or an `access_token` fragment (implicit flow).

use oauth2::{AuthUrl, ClientId, CsrfToken, RedirectUrl, basic::BasicClient};
use serde::{Deserialize, Serialize};
use url::Url;

use super::AuthError;
use crate::config::ClientConfig;

/// Which OAuth variant a login uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginFlow {
    /// Token returned directly in the redirect fragment.
    #[default]
    Implicit,

    /// Authorization code exchanged by the app's access token endpoint.
    Server,
}

/// A login URL and the CSRF state embedded in it.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    pub url: Url,
    pub state: CsrfToken,
}

/// Build the authorization URL for `flow`.
///
/// `show_register` asks the login page to open on its registration form.
pub fn login_redirect_url(
    config: &ClientConfig,
    show_register: bool,
    flow: LoginFlow,
) -> Result<LoginRedirect, AuthError> {
    let auth_url = AuthUrl::new(config.api_url("/oauth/authorize")).map_err(|e| {
        AuthError::OAuth {
            message: format!("invalid auth URL: {}", e),
        }
    })?;

    let mut client = BasicClient::new(ClientId::new(config.client_id.clone()), None, auth_url, None);

    if let Some(redirect) = &config.redirect_uri {
        let redirect_url = RedirectUrl::new(redirect.clone()).map_err(|e| AuthError::OAuth {
            message: format!("invalid redirect URL: {}", e),
        })?;
        client = client.set_redirect_uri(redirect_url);
    }

    let mut request = client.authorize_url(CsrfToken::new_random);
    if flow == LoginFlow::Implicit {
        request = request.use_implicit_flow();
    }
    if show_register {
        request = request.add_extra_param("register", "true");
    }

    let (url, state) = request.url();
    tracing::debug!("Built {:?} login URL for client {}", flow, config.client_id);

    Ok(LoginRedirect { url, state })
}
