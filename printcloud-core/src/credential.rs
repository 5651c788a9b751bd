//! Bearer credentials and their validity rules.
//!
//! This module provides:
//! - [`CredentialKind`] - Guest or access credential
//! - [`Credential`] - A bearer token with issue and expiry timestamps
//! - [`TokenResponse`] - The JSON body returned by the authentication server
//! - [`is_valid`] - The validity rule shared by every cache lookup

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

use crate::store::Secret;

/// The two independent credential slots a client holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    /// Token obtained without end-user login, for public API access.
    Guest,

    /// Token representing a logged-in user.
    Access,
}

impl CredentialKind {
    /// Get the kind as a string slice.
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::Guest => "guest",
            CredentialKind::Access => "access",
        }
    }

    /// Storage key for this kind under the given prefix.
    ///
    /// ```
    /// use printcloud_core::CredentialKind;
    ///
    /// assert_eq!(CredentialKind::Guest.storage_key("printcloud"), "printcloud-guest-token");
    /// ```
    pub fn storage_key(&self, prefix: &str) -> String {
        format!("{}-{}-token", prefix, self.as_str())
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bearer credential as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// The bearer value.
    pub access_token: Secret,

    /// When the credential was acquired.
    pub issued_at: DateTime<Utc>,

    /// When the credential stops being usable. A credential without an
    /// expiry is never considered valid.
    pub expires_at: Option<DateTime<Utc>>,

    /// Renewal secret, only present on values handed back from a refresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Secret>,
}

impl Credential {
    /// Create a credential issued at `issued_at` that lives for `expires_in_secs`.
    ///
    /// Returns `None` when the expiry does not fit in a timestamp.
    pub fn issued(
        access_token: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_in_secs: i64,
    ) -> Option<Self> {
        let expires_at = TimeDelta::try_seconds(expires_in_secs)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))?;
        Some(Self {
            access_token: Secret::new(access_token),
            issued_at,
            expires_at: Some(expires_at),
            refresh_token: None,
        })
    }

    /// Attach a refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(Secret::new(refresh_token));
        self
    }

    /// Copy of this credential with the refresh token removed.
    pub fn without_refresh_token(&self) -> Self {
        Self {
            refresh_token: None,
            ..self.clone()
        }
    }

    /// Whether the credential is usable at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp > now)
    }

    /// Whether the credential is usable right now.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Value for an `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token.expose())
    }
}

/// A credential is valid iff it is present, has an expiry and the expiry is after `now`.
pub fn is_valid(credential: Option<&Credential>, now: DateTime<Utc>) -> bool {
    credential.is_some_and(|c| c.is_valid_at(now))
}

/// Why a token body could not be turned into a [`Credential`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenResponseError {
    #[error("response is missing {0}")]
    Missing(&'static str),

    #[error("expires_in of {0} seconds is out of range")]
    LifetimeOutOfRange(i64),
}

/// Token body returned by the guest, access and refresh endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,

    /// Lifetime in seconds; servers send it either as a number or a string.
    #[serde(default, deserialize_with = "deserialize_seconds")]
    pub expires_in: Option<i64>,

    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Error message some auth servers embed in a 200 response.
    #[serde(default, rename = "Error", alias = "error")]
    pub error: Option<String>,
}

impl TokenResponse {
    /// Turn the response into a credential issued at `now`.
    pub fn into_credential(self, now: DateTime<Utc>) -> Result<Credential, TokenResponseError> {
        let access_token = self
            .access_token
            .ok_or(TokenResponseError::Missing("access_token"))?;
        let expires_in = self
            .expires_in
            .ok_or(TokenResponseError::Missing("expires_in"))?;
        let credential = Credential::issued(access_token, now, expires_in)
            .ok_or(TokenResponseError::LifetimeOutOfRange(expires_in))?;
        Ok(match self.refresh_token {
            Some(refresh) => credential.with_refresh_token(refresh),
            None => credential,
        })
    }
}

/// Parse a lifetime given as a JSON number or numeric string.
pub(crate) fn parse_seconds(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().map(|f| f as i64))
}

fn deserialize_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(match Option::<Seconds>::deserialize(deserializer)? {
        Some(Seconds::Int(n)) => Some(n),
        Some(Seconds::Float(f)) => Some(f as i64),
        Some(Seconds::Text(s)) => parse_seconds(&s),
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn credential_expiring_at(expires_at: DateTime<Utc>) -> Credential {
        Credential {
            access_token: Secret::new("t"),
            issued_at: expires_at - Duration::hours(1),
            expires_at: Some(expires_at),
            refresh_token: None,
        }
    }

    #[test]
    fn test_validity_relative_to_now() {
        let now = Utc::now();

        let before = credential_expiring_at(now - Duration::milliseconds(1));
        let at = credential_expiring_at(now);
        let after = credential_expiring_at(now + Duration::milliseconds(1));

        assert!(!is_valid(Some(&before), now));
        assert!(!is_valid(Some(&at), now));
        assert!(is_valid(Some(&after), now));
        assert!(!is_valid(None, now));
    }

    #[test]
    fn test_credential_without_expiry_is_invalid() {
        let mut credential = credential_expiring_at(Utc::now() + Duration::hours(1));
        credential.expires_at = None;
        assert!(!credential.is_valid());
    }

    #[test]
    fn test_issued_computes_expiry() {
        let now = Utc::now();
        let credential = Credential::issued("g1", now, 3600).unwrap();
        assert_eq!(credential.expires_at, Some(now + Duration::seconds(3600)));
        assert!(credential.is_valid_at(now + Duration::seconds(3599)));
        assert!(!credential.is_valid_at(now + Duration::seconds(3600)));
    }

    #[test]
    fn test_without_refresh_token_strips_only_refresh() {
        let credential = Credential::issued("a", Utc::now(), 60)
            .unwrap()
            .with_refresh_token("r");
        let stripped = credential.without_refresh_token();

        assert!(stripped.refresh_token.is_none());
        assert_eq!(stripped.access_token, credential.access_token);

        let json = serde_json::to_value(&stripped).unwrap();
        assert!(json.get("refresh_token").is_none());
    }

    #[test]
    fn test_token_response_accepts_string_lifetime() {
        let response: TokenResponse = serde_json::from_value(json!({
            "access_token": "a1",
            "expires_in": "3600"
        }))
        .unwrap();
        assert_eq!(response.expires_in, Some(3600));
    }

    #[test]
    fn test_token_response_into_credential() {
        let now = Utc::now();
        let response: TokenResponse = serde_json::from_value(json!({
            "access_token": "a1",
            "expires_in": 10,
            "refresh_token": "r1"
        }))
        .unwrap();

        let credential = response.into_credential(now).unwrap();
        assert_eq!(credential.access_token.expose(), "a1");
        assert_eq!(credential.expires_at, Some(now + Duration::seconds(10)));
        assert_eq!(credential.refresh_token.unwrap().expose(), "r1");
    }

    #[test]
    fn test_token_response_error_field() {
        let response: TokenResponse =
            serde_json::from_value(json!({"Error": "invalid code"})).unwrap();
        assert_eq!(response.error.as_deref(), Some("invalid code"));
        assert_eq!(
            response.into_credential(Utc::now()),
            Err(TokenResponseError::Missing("access_token"))
        );
    }

    #[test]
    fn test_huge_lifetimes_are_rejected() {
        let now = Utc::now();
        assert!(Credential::issued("a", now, i64::MAX).is_none());
        assert!(Credential::issued("a", now, i64::MIN).is_none());

        for expires_in in [json!(i64::MAX), json!(1e300), json!("9223372036854775807")] {
            let response: TokenResponse = serde_json::from_value(json!({
                "access_token": "a1",
                "expires_in": expires_in
            }))
            .unwrap();
            assert!(matches!(
                response.into_credential(now),
                Err(TokenResponseError::LifetimeOutOfRange(_))
            ));
        }
    }

    #[test]
    fn test_authorization_header() {
        let credential = Credential::issued("abc", Utc::now(), 60).unwrap();
        assert_eq!(credential.authorization_header(), "Bearer abc");
    }
}
