//! Access token lifecycle.
//!
//! This module provides:
//! - `TokenHolder`: volatile storage for the current access token
//! - `RefreshCoordinator`: single-flight refresh with waiter fan-out
//! - `SessionController`: session state driven by login, logout and refresh outcomes
//!
//! Tokens are never persisted; a new process starts anonymous and resumes
//! through the `/auth/me` probe and the refresh cookie.

pub mod refresh;
pub mod session;
pub mod token;

pub use refresh::{RefreshCoordinator, RefreshEvent, RefreshPolicy, RefreshState, TokenSource};
pub use session::{Navigator, SessionController, SessionState};
pub use token::{AccessToken, TokenHolder};
