//! WebSocket transport settings.

use std::time::Duration;

use alive_core::RetryConfig;
use serde::{Deserialize, Serialize};

/// How the transport connects and reopens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketSettings {
    /// Deadline for a single connect attempt.
    pub connect_timeout_ms: u64,
    /// Backoff between connect attempts; bounded, after which the socket
    /// reports itself finished.
    pub connect: RetryConfig,
    /// Lower bound of the random delay before reopening after a close.
    /// The upper bound adds the session's reconnect window.
    pub reopen_min_delay_ms: u64,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 4000,
            connect: RetryConfig::with_attempts(7),
            reopen_min_delay_ms: 100,
        }
    }
}

impl SocketSettings {
    /// Connect deadline as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Minimum reopen delay as a [`Duration`].
    pub fn reopen_min_delay(&self) -> Duration {
        Duration::from_millis(self.reopen_min_delay_ms)
    }
}
