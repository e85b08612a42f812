//! Wire models for the Authentication Service.
//!
//! - `User`: the authenticated principal returned by login and `/auth/me`
//! - `LoginRequest`, `RegisterRequest`: credential payloads
//! - `LoginResponse`, `RefreshResponse`: token-bearing responses

pub mod auth;
pub mod user;

pub use auth::{LoginRequest, LoginResponse, RefreshResponse, RegisterRequest};
pub use user::User;
