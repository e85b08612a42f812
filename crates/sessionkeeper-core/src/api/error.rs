use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// 401 that is not eligible for recovery (auth endpoints, anonymous requests).
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Unauthorized after token refresh - giving up")]
    RetryExhausted,

    #[error("Session expired: {0}")]
    RefreshFailed(#[from] RefreshError),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    NetworkError(reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::NetworkError(err)
        }
    }
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

impl ApiError {
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            408 => ApiError::Timeout,
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// True when the failure means the session is gone and the user must log in again.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::RefreshFailed(_))
    }
}

/// Outcome of a failed refresh episode.
///
/// Cloned into every waiter queued behind the episode, so it carries
/// rendered messages rather than the underlying transport error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// The refresh credential was rejected (401/403). Authoritative.
    #[error("refresh credential rejected (status {0})")]
    Rejected(u16),

    #[error("refresh request timed out")]
    Timeout,

    #[error("refresh request failed: {0}")]
    Network(String),

    #[error("authentication server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),

    /// The episode ended without publishing an outcome.
    #[error("refresh abandoned before completion")]
    Abandoned,

    /// The user logged out while the refresh was running.
    #[error("session ended while refreshing")]
    Superseded,
}

impl RefreshError {
    /// Whether another attempt inside the same episode could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RefreshError::Timeout | RefreshError::Network(_) | RefreshError::Server { .. }
        )
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            code @ (401 | 403) => RefreshError::Rejected(code),
            code @ 500..=599 => RefreshError::Server {
                status: code,
                message: truncate_body(body),
            },
            code => RefreshError::InvalidResponse(format!("Status {}: {}", code, truncate_body(body))),
        }
    }
}

impl From<reqwest::Error> for RefreshError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RefreshError::Timeout
        } else if err.is_decode() {
            RefreshError::InvalidResponse(err.to_string())
        } else {
            RefreshError::Network(err.to_string())
        }
    }
}

/// Why a business request hit a recoverable 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The request needed auth but was sent without a token.
    AuthRequired,
    /// The request carried a token the server no longer accepts.
    TokenExpired,
}

impl AuthFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthFailure::AuthRequired => "auth_required",
            AuthFailure::TokenExpired => "token_expired",
        }
    }
}
