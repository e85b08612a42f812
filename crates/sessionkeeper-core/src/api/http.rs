//! Shared HTTP transport.
//!
//! One `reqwest::Client` backs both the Authentication Service calls and the
//! business request dispatcher. Its cookie store carries the refresh
//! credential set by `/auth/login`, so application code never sees it.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;

use super::ApiError;
use crate::config::Config;

/// HTTP transport bound to one Authentication Service base URL.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Arc<str>,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let client = Client::builder()
            .timeout(request_timeout)
            .cookie_store(true)
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').into(),
            request_timeout,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Resolve an endpoint path against the base URL, keeping any base path prefix.
    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        let joined = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse(&joined).map_err(|e| ApiError::InvalidRequest(format!("Invalid URL {}: {}", joined, e)))
    }

    /// Check if response is successful, returning an error with body if not.
    pub async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let url = response.url().clone();
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url.path(), e))
        })
    }
}
