//! Server configuration module
//! Handles dynamic configuration parameters for the chat server

use crate::constants::{
    DEFAULT_HOST, DEFAULT_LIMITER_IDLE_SECS, DEFAULT_PORT, DEFAULT_ROOM_IDLE_SECS,
};
use crate::error::{ChatError, Result};
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Root directory for file-backed history; in-memory storage when unset
    pub data_dir: Option<PathBuf>,
    /// Take the client identity from proxy headers sent by trusted proxies
    pub trust_proxy_headers: bool,
    pub trusted_proxies: Vec<IpAddr>,
    /// How long an empty room actor stays resident
    pub room_idle_timeout: Duration,
    /// How long a settled rate limiter actor stays resident
    pub limiter_idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            data_dir: None,
            trust_proxy_headers: false,
            trusted_proxies: Vec::new(),
            room_idle_timeout: Duration::from_secs(DEFAULT_ROOM_IDLE_SECS),
            limiter_idle_timeout: Duration::from_secs(DEFAULT_LIMITER_IDLE_SECS),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        let host = env::var("ROOMCAST_HOST").unwrap_or(DEFAULT_HOST.to_string());
        let port = match env::var("ROOMCAST_PORT") {
            Ok(p) => p.parse().map_err(|_| {
                ChatError::ConfigError(format!("ROOMCAST_PORT is not a valid port: {}", p))
            })?,
            Err(_) => DEFAULT_PORT,
        };

        let data_dir = env::var("ROOMCAST_DATA_DIR")
            .ok()
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from);

        let trust_proxy_headers = env::var("ROOMCAST_TRUST_PROXY")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);

        let trusted_proxies = match env::var("ROOMCAST_TRUSTED_PROXIES") {
            Ok(list) => Self::parse_proxy_list(&list)?,
            Err(_) => Vec::new(),
        };

        let room_idle_secs = env::var("ROOMCAST_ROOM_IDLE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_ROOM_IDLE_SECS);

        let limiter_idle_secs = env::var("ROOMCAST_LIMITER_IDLE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_LIMITER_IDLE_SECS);

        let config = Self {
            host,
            port,
            data_dir,
            trust_proxy_headers,
            trusted_proxies,
            room_idle_timeout: Duration::from_secs(room_idle_secs),
            limiter_idle_timeout: Duration::from_secs(limiter_idle_secs),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.room_idle_timeout.is_zero() || self.limiter_idle_timeout.is_zero() {
            return Err(ChatError::ConfigError(
                "idle timeouts must be at least one second".to_string(),
            ));
        }

        if self.trust_proxy_headers && self.trusted_proxies.is_empty() {
            return Err(ChatError::ConfigError(
                "ROOMCAST_TRUST_PROXY is enabled but ROOMCAST_TRUSTED_PROXIES is empty".to_string(),
            ));
        }

        if let Some(ref dir) = self.data_dir {
            if dir.exists() && !dir.is_dir() {
                return Err(ChatError::ConfigError(format!(
                    "data directory is not a directory: {}",
                    dir.display()
                )));
            }
        }

        Ok(())
    }

    fn parse_proxy_list(list: &str) -> Result<Vec<IpAddr>> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<IpAddr>().map_err(|_| {
                    ChatError::ConfigError(format!("invalid trusted proxy address: {}", s))
                })
            })
            .collect()
    }
}
