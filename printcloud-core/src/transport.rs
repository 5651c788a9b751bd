//! HTTP transport used by the token cache and the request layer.
//!
//! [`Transport`] is the seam between this crate and the network. The
//! production implementation is [`ReqwestTransport`].

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use thiserror::Error;

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request never produced an HTTP response (DNS, connect, TLS, ...).
    #[error("network error: {message}")]
    Network { message: String },

    /// The server answered with a non-2xx status.
    #[error("{status} status code: {body}")]
    Status { status: u16, body: String },

    /// The response body was not valid JSON.
    #[error("invalid response body ({status}): {message}")]
    Decode { status: u16, message: String },
}

impl TransportError {
    /// HTTP status of the failed exchange, where one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Network { .. } => None,
            TransportError::Status { status, .. } | TransportError::Decode { status, .. } => {
                Some(*status)
            }
        }
    }
}

/// An outgoing API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    /// Full `Authorization` header value, e.g. `Bearer abc`.
    pub authorization: Option<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            authorization: None,
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_authorization(mut self, authorization: Option<String>) -> Self {
        self.authorization = authorization;
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// A successful API response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON body; `Value::Null` for 204 and empty bodies.
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }
}

/// Issues HTTP requests on behalf of the client.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let ApiRequest {
            method,
            url,
            authorization,
            query,
            body,
        } = request;

        tracing::debug!("{} {}", method, url);

        let mut builder = self.client.request(method, &url);
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        if let Some(authorization) = authorization {
            builder = builder.header(reqwest::header::AUTHORIZATION, authorization);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().await.map_err(|e| TransportError::Network {
            message: format!("{} failed: {}", url, e),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| TransportError::Network {
            message: format!("reading response from {} failed: {}", url, e),
        })?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| TransportError::Decode {
                status: status.as_u16(),
                message: e.to_string(),
            })?
        };

        Ok(ApiResponse::new(status.as_u16(), body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path, query_param},
    };

    #[tokio::test]
    async fn test_send_attaches_auth_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/things"))
            .and(header("authorization", "Bearer t1"))
            .and(query_param("code", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let request = ApiRequest::get(format!("{}/things", server.uri()))
            .with_authorization(Some("Bearer t1".to_string()))
            .with_query("code", "abc");
        let response = ReqwestTransport::new().send(request).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body["ok"], true);
    }

    #[tokio::test]
    async fn test_send_no_content_is_null() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let request = ApiRequest::new(Method::DELETE, server.uri());
        let response = ReqwestTransport::new().send(request).await.unwrap();

        assert_eq!(response.status, 204);
        assert_eq!(response.body, Value::Null);
    }

    #[tokio::test]
    async fn test_send_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
            .mount(&server)
            .await;

        let err = ReqwestTransport::new()
            .send(ApiRequest::get(server.uri()))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(404));
        assert!(matches!(err, TransportError::Status { ref body, .. } if body == "missing"));
    }

    #[tokio::test]
    async fn test_send_network_failure() {
        // Port 9 (discard) on localhost is closed in test environments.
        let err = ReqwestTransport::new()
            .send(ApiRequest::get("http://127.0.0.1:9/unreachable"))
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Network { .. }));
        assert_eq!(err.status(), None);
    }
}
