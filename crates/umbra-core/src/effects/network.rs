//! Network effect
//!
//! Umbra never owns an HTTP client. The host supplies one behind this trait;
//! the engine only builds [`UrlRequest`]s and interprets [`UrlResponse`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::UmbraError;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UrlMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
}

/// An outbound request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRequest {
    /// Method
    pub method: UrlMethod,
    /// Absolute URL
    pub url: String,
    /// Headers
    pub headers: BTreeMap<String, String>,
    /// Body, if any
    pub body: Option<String>,
}

impl UrlRequest {
    /// A GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: UrlMethod::Get,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// A POST request with a JSON body
    pub fn post_json(url: impl Into<String>, body: impl Into<String>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self {
            method: UrlMethod::Post,
            url: url.into(),
            headers,
            body: Some(body.into()),
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlResponse {
    /// HTTP status code
    pub status_code: u16,
    /// Response body
    pub body: String,
}

impl UrlResponse {
    /// Construct a response
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
        }
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// 5xx
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status_code)
    }
}

/// Network operation errors
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum NetworkError {
    /// Failed to establish a connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    /// The transport gave up waiting
    #[error("Request timed out")]
    TimedOut,
    /// Any other transport failure
    #[error("Transport failed: {0}")]
    Transport(String),
}

impl From<NetworkError> for UmbraError {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::TimedOut => UmbraError::timeout(0),
            other => UmbraError::network(other.to_string()),
        }
    }
}

/// Request/response transport
#[async_trait]
pub trait NetworkEffects: Send + Sync {
    /// Perform one request
    async fn send(&self, request: UrlRequest) -> Result<UrlResponse, NetworkError>;
}

#[async_trait]
impl<T: NetworkEffects + ?Sized> NetworkEffects for Arc<T> {
    async fn send(&self, request: UrlRequest) -> Result<UrlResponse, NetworkError> {
        (**self).send(request).await
    }
}
