//! Outgoing request description.
//!
//! Requests are kept as plain data rather than `reqwest::Request` so they can
//! be rebuilt and resent once after a token refresh.

use std::time::Duration;

use reqwest::Method;
use serde::Serialize;

use super::ApiError;

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const ME_PATH: &str = "/auth/me";

/// Endpoints whose 401 is final. Recovering from them would refresh the refresher.
const NO_RECOVERY_PATHS: [&str; 3] = [LOGIN_PATH, REGISTER_PATH, REFRESH_PATH];

/// True when a 401 from `path` must propagate without entering refresh recovery.
pub fn is_auth_endpoint(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let path = path.trim_end_matches('/');
    NO_RECOVERY_PATHS.iter().any(|p| path.ends_with(p))
}

#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) body: Option<serde_json::Value>,
    pub(crate) timeout: Option<Duration>,
    requires_auth: bool,
    retry_attempted: bool,
}

impl OutgoingRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            timeout: None,
            requires_auth: true,
            retry_attempted: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Send without a bearer token.
    pub fn anonymous(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to serialize body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Override the client-wide timeout for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    pub fn retry_attempted(&self) -> bool {
        self.retry_attempted
    }

    /// Flip the retry flag. Returns false if it was already set, so a request
    /// gets at most one refresh-triggered retry.
    pub fn mark_retry_attempted(&mut self) -> bool {
        !std::mem::replace(&mut self.retry_attempted, true)
    }

    pub fn targets_auth_endpoint(&self) -> bool {
        is_auth_endpoint(&self.path)
    }
}
