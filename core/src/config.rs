//! Proxy configuration: timeouts and common request headers.
//!
//! # Design
//! `ProxyConfig` is plain serde data so it can come from a JSON document or
//! from `WSPROXY_*` environment variables. Both timeouts are always finite;
//! a missing value falls back to the default, a zero value is rejected.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

pub const CONNECT_TIMEOUT_ENV: &str = "WSPROXY_CONNECT_TIMEOUT_MS";
pub const READ_TIMEOUT_ENV: &str = "WSPROXY_READ_TIMEOUT_MS";

/// Connect and read timeouts for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Budget for name resolution and connection establishment.
    pub connect: Duration,
    /// Budget for sending the body and receiving the response.
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            read: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl Timeouts {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.connect.is_zero() {
            return Err(ApiError::configuration("connect timeout must be greater than zero"));
        }
        if self.read.is_zero() {
            return Err(ApiError::configuration("read timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// Settings shared by every request a caller issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Headers sent with every request. Per-request headers win.
    pub headers: BTreeMap<String, String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            read_timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
            headers: BTreeMap::new(),
        }
    }
}

impl ProxyConfig {
    pub fn from_json(text: &str) -> Result<Self, ApiError> {
        let config: ProxyConfig = serde_json::from_str(text)
            .map_err(|e| ApiError::configuration(format!("invalid proxy configuration: {e}")))?;
        config.timeouts().validate()?;
        Ok(config)
    }

    /// Read timeouts from `WSPROXY_CONNECT_TIMEOUT_MS` and
    /// `WSPROXY_READ_TIMEOUT_MS`, falling back to the defaults.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ApiError> {
        let mut config = ProxyConfig::default();
        if let Some(ms) = millis(&lookup, CONNECT_TIMEOUT_ENV)? {
            config.connect_timeout_ms = ms;
        }
        if let Some(ms) = millis(&lookup, READ_TIMEOUT_ENV)? {
            config.read_timeout_ms = ms;
        }
        config.timeouts().validate()?;
        Ok(config)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            read: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>, ApiError> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|e| ApiError::configuration(format!("{key}={raw:?} is not a millisecond count: {e}")))
        })
        .transpose()
}
