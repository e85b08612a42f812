//! Client configuration management.
//!
//! This module handles loading and saving the client configuration: the
//! Authentication Service base URL, request and refresh timeouts, and the
//! transient refresh retry policy.
//!
//! Configuration is stored at `~/.config/sessionkeeper/config.json` and can be
//! overridden per-process with `SESSIONKEEPER_*` environment variables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for the config directory path
const APP_NAME: &str = "sessionkeeper";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Refresh call timeout in seconds.
/// Shorter than ordinary requests since every queued request waits on it.
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;

/// Extra refresh attempts after a transient (network/5xx/timeout) failure.
const DEFAULT_REFRESH_RETRIES: u32 = 2;

/// Initial backoff between transient refresh attempts, doubled each time.
const DEFAULT_REFRESH_BACKOFF_MS: u64 = 250;

/// Upper bounds that keep a queued request's worst-case wait finite and short.
const MAX_REFRESH_RETRIES: u32 = 5;
const MAX_REFRESH_BACKOFF_MS: u64 = 10_000;

const DEFAULT_LOGIN_LOCATION: &str = "/login";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    pub refresh_retries: u32,
    pub refresh_backoff_ms: u64,
    /// Where the user is sent when the session is invalidated.
    pub login_location: String,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
            refresh_retries: DEFAULT_REFRESH_RETRIES,
            refresh_backoff_ms: DEFAULT_REFRESH_BACKOFF_MS,
            login_location: DEFAULT_LOGIN_LOCATION.to_string(),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    /// Config pointing at `base_url` with every other setting defaulted.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `SESSIONKEEPER_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("SESSIONKEEPER_BASE_URL") {
            self.base_url = url;
        }
        if let Some(secs) = lookup("SESSIONKEEPER_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = secs
                .parse()
                .context("SESSIONKEEPER_REQUEST_TIMEOUT_SECS must be a number")?;
        }
        if let Some(secs) = lookup("SESSIONKEEPER_REFRESH_TIMEOUT_SECS") {
            self.refresh_timeout_secs = secs
                .parse()
                .context("SESSIONKEEPER_REFRESH_TIMEOUT_SECS must be a number")?;
        }
        if let Some(retries) = lookup("SESSIONKEEPER_REFRESH_RETRIES") {
            self.refresh_retries = retries
                .parse()
                .context("SESSIONKEEPER_REFRESH_RETRIES must be a number")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base URL: {}", self.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Unsupported base URL scheme: {}", url.scheme());
        }
        if self.request_timeout_secs == 0 || self.refresh_timeout_secs == 0 {
            anyhow::bail!("Timeouts must be greater than zero");
        }
        if self.refresh_retries > MAX_REFRESH_RETRIES {
            anyhow::bail!("refresh_retries must be at most {}", MAX_REFRESH_RETRIES);
        }
        if self.refresh_backoff_ms > MAX_REFRESH_BACKOFF_MS {
            anyhow::bail!("refresh_backoff_ms must be at most {}", MAX_REFRESH_BACKOFF_MS);
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }
}
