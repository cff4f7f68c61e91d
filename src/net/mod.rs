//! Transport seam between the session client and the remote API.
//!
//! SYSTEM CONTEXT
//! ==============
//! `Transport` moves one request and hands back status plus JSON body; it
//! knows nothing about sessions. Status interpretation, including the 401
//! interceptor, lives in [`crate::client::SessionClient::execute`].

pub mod http;

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

use serde_json::Value;

pub use http::HttpTransport;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

/// A request relative to the configured API base.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path beginning with `/`, appended to the base URL.
    pub path: String,
    pub body: Option<Value>,
    /// Whether a 401 on this request means the current session is invalid.
    /// Credential exchanges (login, register) set this to `false`.
    pub carries_session: bool,
}

impl ApiRequest {
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self { method: Method::Get, path: path.into(), body: None, carries_session: true }
    }

    #[must_use]
    pub fn post(path: impl Into<String>, body: Option<Value>) -> Self {
        Self { method: Method::Post, path: path.into(), body, carries_session: true }
    }

    /// Mark the request as a credential exchange that runs without a session.
    #[must_use]
    pub fn without_session(mut self) -> Self {
        self.carries_session = false;
        self
    }
}

/// Status and decoded body of an HTTP response.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    #[must_use]
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `message` field of the body, when present and non-empty.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.body
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
    }
}

/// The request produced no HTTP response (DNS, connect, timeout, body read).
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Sends API requests. Implemented over HTTP for real use and scripted in
/// tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Decode a response body: JSON when possible, raw text otherwise, `null`
/// when empty.
#[must_use]
pub fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()))
}
