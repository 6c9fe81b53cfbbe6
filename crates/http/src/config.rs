//! Server and protocol settings.
//!
//! [`ServerConfig`] describes the listener and the connection budget, [`HttpConfig`]
//! the protocol behavior shared by every connection. Both have sensible defaults and
//! can be deserialized (with `serde`) from any self-describing format:
//!
//! ```
//! use slim_http::config::ServerConfig;
//!
//! let config: ServerConfig = serde_json::from_str(r#"{
//!     "address": "127.0.0.1:8080",
//!     "slots": 2,
//!     "http": { "timeout": 2.5, "allow_all_origins": true }
//! }"#).unwrap();
//!
//! assert_eq!(config.slots(), 2);
//! assert!(config.http().allow_all_origins());
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::ensure;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);
pub const DEFAULT_SERVER_NAME: &str = "Slim Server";
pub const DEFAULT_MAX_HEADER_LINES: usize = 100;
pub const DEFAULT_SLOT_SIZE: usize = 1024;
pub const MIN_SLOT_SIZE: usize = 64;
/// The listen backlog is clipped to this value.
pub const MAX_BACKLOG: u32 = 255;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one slot pair is required")]
    NoSlots,

    #[error("slot size {size} is below the minimum of {min} bytes")]
    SlotTooSmall { size: usize, min: usize },

    #[error("address {address} does not resolve to a socket address")]
    UnresolvedAddress { address: String },
}

/// Protocol behavior shared by every connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(deserialize_with = "seconds")]
    timeout: Duration,
    allow_all_origins: bool,
    not_found_url: Option<String>,
    server_name: String,
    max_header_lines: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            allow_all_origins: false,
            not_found_url: None,
            server_name: DEFAULT_SERVER_NAME.to_owned(),
            max_header_lines: DEFAULT_MAX_HEADER_LINES,
        }
    }
}

impl HttpConfig {
    /// How long a connection may wait for the next line, the request content or the peer
    /// draining the response.
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether responses reflect the request `Origin` in `Access-Control-Allow-Origin`.
    #[inline]
    pub fn allow_all_origins(&self) -> bool {
        self.allow_all_origins
    }

    /// Where "not found" responses redirect to, instead of answering 404.
    #[inline]
    pub fn not_found_url(&self) -> Option<&str> {
        self.not_found_url.as_deref()
    }

    #[inline]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    #[inline]
    pub fn max_header_lines(&self) -> usize {
        self.max_header_lines
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_allow_all_origins(mut self, allow: bool) -> Self {
        self.allow_all_origins = allow;
        self
    }

    #[must_use]
    pub fn with_not_found_url(mut self, url: Option<String>) -> Self {
        self.not_found_url = url;
        self
    }

    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    #[must_use]
    pub fn with_max_header_lines(mut self, max: usize) -> Self {
        self.max_header_lines = max;
        self
    }
}

/// Listener address and connection budget.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    address: SocketAddr,
    backlog: u32,
    slots: usize,
    slot_size: usize,
    http: HttpConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], 80)),
            backlog: MAX_BACKLOG,
            slots: 1,
            slot_size: DEFAULT_SLOT_SIZE,
            http: HttpConfig::default(),
        }
    }
}

impl ServerConfig {
    #[inline]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    #[inline]
    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    /// Number of slot pairs, which is also the number of concurrent connections.
    #[inline]
    pub fn slots(&self) -> usize {
        self.slots
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    #[inline]
    pub fn http(&self) -> &HttpConfig {
        &self.http
    }

    pub fn http_mut(&mut self) -> &mut HttpConfig {
        &mut self.http
    }

    pub fn set_address(&mut self, address: SocketAddr) {
        self.address = address;
    }

    pub fn set_backlog(&mut self, backlog: u32) {
        self.backlog = backlog;
    }

    pub fn set_slots(&mut self, slots: usize) {
        self.slots = slots;
    }

    pub fn set_slot_size(&mut self, slot_size: usize) {
        self.slot_size = slot_size;
    }

    /// Checks the connection budget and clips the backlog.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        ensure!(self.slots > 0, ConfigError::NoSlots);
        ensure!(
            self.slot_size >= MIN_SLOT_SIZE,
            ConfigError::SlotTooSmall { size: self.slot_size, min: MIN_SLOT_SIZE }
        );
        self.backlog = self.backlog.clamp(1, MAX_BACKLOG);
        Ok(self)
    }
}

fn seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.slots(), 1);
        assert_eq!(config.slot_size(), 1024);
        assert_eq!(config.http().timeout(), Duration::from_secs(4));
        assert!(!config.http().allow_all_origins());
        assert_eq!(config.http().not_found_url(), None);
        assert_eq!(config.http().max_header_lines(), 100);
    }

    #[test]
    fn validate_clips_backlog_and_rejects_bad_budgets() {
        let mut config = ServerConfig::default();
        config.set_backlog(4096);
        assert_eq!(config.clone().validate().unwrap().backlog(), 255);

        config.set_slots(0);
        assert_eq!(config.clone().validate().unwrap_err(), ConfigError::NoSlots);

        config.set_slots(1);
        config.set_slot_size(16);
        assert_eq!(config.validate().unwrap_err(), ConfigError::SlotTooSmall { size: 16, min: 64 });
    }

    #[test]
    fn deserializes_partial_config() {
        let config: ServerConfig = serde_json::from_str(
            r#"{ "address": "127.0.0.1:9000", "http": { "timeout": 0.5, "not_found_url": "/index.html" } }"#,
        )
        .unwrap();
        assert_eq!(config.address(), SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert_eq!(config.http().timeout(), Duration::from_millis(500));
        assert_eq!(config.http().not_found_url(), Some("/index.html"));
        assert_eq!(config.http().server_name(), DEFAULT_SERVER_NAME);
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(serde_json::from_str::<ServerConfig>(r#"{ "port": 80 }"#).is_err());
    }
}
