//! Request dispatch with transparent token recovery.
//!
//! Every business call goes through [`RequestDispatcher::dispatch`]. It
//! attaches the current bearer token, and on a 401 joins the single-flight
//! refresh and resends the request once with the new token.

use std::sync::Arc;

use reqwest::{Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::http::HttpTransport;
use super::request::OutgoingRequest;
use super::{ApiError, AuthClient, AuthFailure};
use crate::auth::{AccessToken, RefreshCoordinator, TokenHolder, TokenSource};

pub struct RequestDispatcher<S = AuthClient> {
    http: HttpTransport,
    tokens: TokenHolder,
    coordinator: Arc<RefreshCoordinator<S>>,
}

// Manual impl: a derive would demand `S: Clone`
impl<S> Clone for RequestDispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
            tokens: self.tokens.clone(),
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

impl<S: TokenSource> RequestDispatcher<S> {
    pub fn new(http: HttpTransport, coordinator: Arc<RefreshCoordinator<S>>) -> Self {
        Self {
            http,
            tokens: coordinator.tokens().clone(),
            coordinator,
        }
    }

    /// Send a request, recovering once from an expired access token.
    ///
    /// Any non-401 response is returned unchanged, success or not.
    ///
    /// # Errors
    /// - [`ApiError::Unauthorized`] for a 401 from login/register/refresh or
    ///   from a request that does not require auth
    /// - [`ApiError::RetryExhausted`] when the request still gets 401 after its retry
    /// - [`ApiError::RefreshFailed`] when the refresh itself failed
    /// - transport errors ([`ApiError::Timeout`], [`ApiError::NetworkError`])
    pub async fn dispatch(&self, mut request: OutgoingRequest) -> Result<Response, ApiError> {
        let mut token = if request.requires_auth() {
            self.tokens.get()
        } else {
            None
        };

        loop {
            let response = self.send(&request, token.as_ref()).await?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            if request.targets_auth_endpoint() || !request.requires_auth() {
                debug!(path = request.path(), "401 on request outside refresh recovery");
                return Err(ApiError::Unauthorized);
            }

            if !request.mark_retry_attempted() {
                warn!(path = request.path(), "Still unauthorized after token refresh");
                return Err(ApiError::RetryExhausted);
            }

            match &token {
                Some(expired) => debug!(
                    path = request.path(),
                    reason = AuthFailure::TokenExpired.as_str(),
                    token_age_secs = expired.age_secs(),
                    "Unauthorized, awaiting token refresh"
                ),
                None => debug!(
                    path = request.path(),
                    reason = AuthFailure::AuthRequired.as_str(),
                    "Unauthorized, awaiting token refresh"
                ),
            }

            token = Some(self.coordinator.await_refresh(token.as_ref()).await?);
        }
    }

    /// Dispatch and decode a successful JSON response.
    /// Non-success statuses surface as the matching [`ApiError`].
    pub async fn send_json<T: DeserializeOwned>(&self, request: OutgoingRequest) -> Result<T, ApiError> {
        let response = self.dispatch(request).await?;
        let response = HttpTransport::check_response(response).await?;
        HttpTransport::read_json(response).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(OutgoingRequest::get(path)).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(OutgoingRequest::post(path).json(body)?).await
    }

    async fn send(&self, request: &OutgoingRequest, token: Option<&AccessToken>) -> Result<Response, ApiError> {
        let mut builder = self
            .http
            .client()
            .request(request.method.clone(), self.http.url(&request.path)?)
            .timeout(request.timeout.unwrap_or(self.http.request_timeout()));

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token.as_str());
        }

        builder.send().await.map_err(|e| {
            debug!(path = request.path(), error = %e, "Request failed to send");
            ApiError::from(e)
        })
    }
}
