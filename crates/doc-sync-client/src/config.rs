//! Client configuration: where the store and realtime server live, and how
//! long a request may take.
//!
//! Every field can come from a flag or an environment variable, flags winning.

use clap::Args;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8080";
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8080";
pub const DEFAULT_SOCKET_PATH: &str = "/socket.io";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Debug, Clone, Args)]
pub struct ClientConfig {
    /// Base URL of the document REST API
    #[arg(long, env = "DOC_SYNC_BACKEND_URL", default_value = DEFAULT_BACKEND_URL)]
    pub backend_url: String,

    /// Realtime server URL (ws:// or wss://)
    #[arg(long, env = "DOC_SYNC_SERVER_URL", default_value = DEFAULT_SERVER_URL)]
    pub server_url: String,

    /// Path of the realtime endpoint on the server
    #[arg(long, env = "DOC_SYNC_SOCKET_PATH", default_value = DEFAULT_SOCKET_PATH)]
    pub socket_path: String,

    /// Per-request timeout for the REST API, in seconds
    #[arg(long, env = "DOC_SYNC_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    /// Validated REST base URL.
    pub fn backend(&self) -> Result<Url, ConfigError> {
        let url = parse(&self.backend_url)?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(invalid(&self.backend_url, "expected an http(s) base URL"));
        }
        Ok(url)
    }

    /// Full realtime endpoint: the server URL with its path replaced by `socket_path`.
    pub fn realtime_url(&self) -> Result<Url, ConfigError> {
        let mut url = parse(&self.server_url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(invalid(&self.server_url, "expected a ws:// or wss:// URL"));
        }
        url.set_path(&self.socket_path);
        Ok(url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn parse(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| invalid(raw, &e.to_string()))
}

fn invalid(url: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}
