//! Link configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LinkResult;

/// Configuration for a [`Link`](crate::Link).
///
/// Every process of a Splash session must share the same socket directory
/// and prefix, otherwise they cannot find each other's endpoints.
///
/// ```
/// use splash_net::LinkConfig;
///
/// let config = LinkConfig::from_toml_str(
///     r#"
///     socket_prefix = "show"
///     connect_delay_ms = 20
///     "#,
/// )
/// .unwrap();
/// assert_eq!(config.socket_prefix, "show");
/// assert_eq!(config.message_hwm, 1000);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Shared prefix segment, empty for none.
    pub socket_prefix: String,
    /// Directory holding the socket files.
    pub socket_dir: PathBuf,
    /// Wait after connecting to a peer, in milliseconds.
    pub connect_delay_ms: u64,
    /// Inbound messages queued before reading pauses.
    pub message_hwm: usize,
    /// Maximum number of queued buffers, inbound and per outer peer.
    pub buffer_hwm: usize,
    /// Sleep of the receive loops when idle, in milliseconds.
    pub poll_interval_ms: u64,
    /// Write timeout for outbound sockets, in milliseconds.
    pub send_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            socket_prefix: String::new(),
            socket_dir: PathBuf::from("/tmp"),
            connect_delay_ms: 100,
            message_hwm: 1000,
            buffer_hwm: 1,
            poll_interval_ms: 1,
            send_timeout_ms: 1000,
        }
    }
}

impl LinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> LinkResult<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> String {
        toml::to_string(self).unwrap_or_default()
    }

    pub fn socket_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.socket_prefix = prefix.into();
        self
    }

    pub fn socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn message_hwm(mut self, hwm: usize) -> Self {
        self.message_hwm = hwm;
        self
    }

    pub fn buffer_hwm(mut self, hwm: usize) -> Self {
        self.buffer_hwm = hwm;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn connect_delay_duration(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }

    /// Receive loop sleep, never shorter than a millisecond.
    pub fn poll_interval_duration(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Outbound write timeout, `None` when disabled with zero.
    pub fn send_timeout_duration(&self) -> Option<Duration> {
        (self.send_timeout_ms > 0).then(|| Duration::from_millis(self.send_timeout_ms))
    }
}
