//! HTTP layer for the Authentication Service and business endpoints.
//!
//! This module provides the `RequestDispatcher` that every business call goes
//! through, and the `AuthClient` binding of the login, register, refresh,
//! logout and me endpoints.
//!
//! Business endpoints use `Authorization: Bearer <accessToken>`. The refresh
//! credential is a cookie kept by the shared transport.

pub mod auth;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod request;

pub use auth::AuthClient;
pub use dispatcher::RequestDispatcher;
pub use error::{ApiError, AuthFailure, RefreshError};
pub use http::HttpTransport;
pub use request::{is_auth_endpoint, OutgoingRequest};
