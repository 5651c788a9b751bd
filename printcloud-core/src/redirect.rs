//! Reading login results from the URL the auth server redirected back to.

use url::Url;

use crate::credential::parse_seconds;

/// Parameters carried by a post-login redirect.
///
/// The server flow puts `code` in the query string; the implicit flow puts
/// `access_token` and `expires_in` in the fragment. Both echo `state`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectParams {
    pub code: Option<String>,
    pub access_token: Option<String>,
    pub expires_in: Option<String>,
    pub state: Option<String>,
    redirect_uri: Option<String>,
}

impl RedirectParams {
    /// Parse the redirect URL.
    ///
    /// The query string wins; the fragment is only read when the query is empty.
    pub fn from_url(raw: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(raw)?;
        let params = match url.query().filter(|q| !q.is_empty()) {
            Some(query) => query,
            None => url.fragment().unwrap_or_default(),
        };

        let mut parsed = Self::from_pairs(params);
        parsed.redirect_uri = Some(strip_params(raw));
        Ok(parsed)
    }

    /// Parse a bare `k=v&k2=v2` parameter string.
    pub fn from_pairs(params: &str) -> Self {
        let mut parsed = Self::default();
        for (key, value) in url::form_urlencoded::parse(params.as_bytes()) {
            match key.as_ref() {
                "code" => parsed.code = Some(value.into_owned()),
                "access_token" => parsed.access_token = Some(value.into_owned()),
                "expires_in" => parsed.expires_in = Some(value.into_owned()),
                "state" => parsed.state = Some(value.into_owned()),
                _ => {}
            }
        }
        parsed
    }

    /// The URL the browser landed on, without its query or fragment.
    pub fn redirect_uri(&self) -> Option<&str> {
        self.redirect_uri.as_deref()
    }

    /// `expires_in` as seconds, if present and numeric.
    pub fn expires_in_secs(&self) -> Option<i64> {
        self.expires_in.as_deref().and_then(parse_seconds)
    }
}

/// Strip everything from the first `?`, or failing that the first `#`.
pub fn strip_params(raw: &str) -> String {
    let cut = raw.find('?').or_else(|| raw.find('#'));
    match cut {
        Some(index) => raw[..index].to_string(),
        None => raw.to_string(),
    }
}
