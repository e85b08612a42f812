//! Session keeping for bearer-token HTTP clients.
//!
//! Keeps an authenticated client working across short-lived access token
//! expiry: requests that hit a 401 join a single in-flight refresh, are
//! resent once with the new token, and a failed refresh logs the session out
//! exactly once.
//!
//! ```text
//! SessionClient
//!   ├─ SessionController ──── reacts to refresh outcomes, redirects on failure
//!   ├─ RequestDispatcher ──── attaches the token, recovers from 401
//!   │        │
//!   │        ▼
//!   └─ RefreshCoordinator ─── one refresh at a time, fans the result out
//!            │
//!            ▼
//!       TokenHolder ───────── current access token, memory only
//! ```

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod models;

pub use api::{ApiError, OutgoingRequest, RefreshError, RequestDispatcher};
pub use auth::{AccessToken, Navigator, SessionState, TokenHolder};
pub use client::SessionClient;
pub use config::Config;
