//! In-memory access token storage.
//!
//! The access token lives only in process memory. It is written on login and
//! on a successful refresh, and cleared on logout or refresh failure.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

/// Short-lived bearer credential.
///
/// Clone is cheap - the value is shared behind an `Arc`.
#[derive(Clone)]
pub struct AccessToken {
    value: Arc<str>,
    obtained_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self {
            value: value.into(),
            obtained_at: Utc::now(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Seconds since this token was issued to us, logged when it gets rejected.
    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.obtained_at).num_seconds().max(0)
    }
}

impl PartialEq for AccessToken {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for AccessToken {}

// Never print the credential itself
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

/// Shared handle to the current access token.
///
/// Clones point at the same slot. Readers always see either the previous or
/// the next token, never a partial write.
#[derive(Clone, Default)]
pub struct TokenHolder {
    slot: Arc<RwLock<Option<AccessToken>>>,
}

impl TokenHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<AccessToken> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, token: AccessToken) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    pub fn clear(&self) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_present(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl fmt::Debug for TokenHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenHolder")
            .field("present", &self.is_present())
            .finish()
    }
}
