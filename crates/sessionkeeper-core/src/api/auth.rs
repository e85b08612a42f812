//! Authentication Service endpoints.
//!
//! These calls bypass the request dispatcher: a 401 from login, register or
//! refresh is final, and `/auth/me` treats 401 as "anonymous".

use std::future::Future;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use super::http::HttpTransport;
use super::request::{LOGIN_PATH, LOGOUT_PATH, ME_PATH, REFRESH_PATH, REGISTER_PATH};
use super::{ApiError, RefreshError};
use crate::auth::{AccessToken, TokenSource};
use crate::models::{LoginRequest, LoginResponse, RefreshResponse, RegisterRequest, User};

/// `/auth/me` answers either `{"user": {...}}` or the bare user document.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MeResponse {
    Wrapped { user: User },
    Bare(User),
}

impl MeResponse {
    fn into_user(self) -> User {
        match self {
            MeResponse::Wrapped { user } | MeResponse::Bare(user) => user,
        }
    }
}

fn with_token(response: LoginResponse) -> Result<LoginResponse, ApiError> {
    if response.access_token.is_empty() {
        return Err(ApiError::InvalidResponse("Response has an empty access token".to_string()));
    }
    Ok(response)
}

#[derive(Clone)]
pub struct AuthClient {
    http: HttpTransport,
}

impl AuthClient {
    pub fn new(http: HttpTransport) -> Self {
        Self { http }
    }

    /// Exchange credentials for an access token. The server also sets the
    /// refresh credential cookie, which the transport keeps.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let response = self
            .http
            .client()
            .post(self.http.url(LOGIN_PATH)?)
            .json(&LoginRequest { email, password })
            .send()
            .await?;

        let response = HttpTransport::check_response(response).await?;
        with_token(HttpTransport::read_json(response).await?)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<LoginResponse, ApiError> {
        let response = self
            .http
            .client()
            .post(self.http.url(REGISTER_PATH)?)
            .json(request)
            .send()
            .await?;

        let response = HttpTransport::check_response(response).await?;
        with_token(HttpTransport::read_json(response).await?)
    }

    /// Mint a new access token using the transport-held refresh credential.
    pub async fn refresh_token(&self) -> Result<AccessToken, RefreshError> {
        let url = self
            .http
            .url(REFRESH_PATH)
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        let response = self.http.client().post(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshError::from_status(status, &body));
        }

        let text = response.text().await?;
        let parsed: RefreshResponse = serde_json::from_str(&text)
            .map_err(|e| RefreshError::InvalidResponse(format!("Failed to parse refresh response: {}", e)))?;
        if parsed.access_token.is_empty() {
            return Err(RefreshError::InvalidResponse("empty access token".to_string()));
        }

        Ok(AccessToken::new(parsed.access_token))
    }

    /// Invalidate the refresh credential server-side.
    /// A 401 means there was nothing left to invalidate.
    pub async fn logout(&self, token: Option<&AccessToken>) -> Result<(), ApiError> {
        let mut request = self.http.client().post(self.http.url(LOGOUT_PATH)?);
        if let Some(token) = token {
            request = request.bearer_auth(token.as_str());
        }

        let response = request.send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("Logout returned 401, session already gone server-side");
            return Ok(());
        }
        HttpTransport::check_response(response).await?;
        Ok(())
    }

    /// Probe the current session. `Ok(None)` means anonymous.
    pub async fn me(&self, token: Option<&AccessToken>) -> Result<Option<User>, ApiError> {
        let mut request = self.http.client().get(self.http.url(ME_PATH)?);
        if let Some(token) = token {
            request = request.bearer_auth(token.as_str());
        }

        let response = request.send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Ok(None);
        }

        let response = HttpTransport::check_response(response).await?;
        let me: MeResponse = HttpTransport::read_json(response).await.inspect_err(|e| {
            warn!(error = %e, "Unexpected /auth/me payload");
        })?;
        Ok(Some(me.into_user()))
    }
}

impl TokenSource for AuthClient {
    fn refresh(&self) -> impl Future<Output = Result<AccessToken, RefreshError>> + Send {
        self.refresh_token()
    }
}
