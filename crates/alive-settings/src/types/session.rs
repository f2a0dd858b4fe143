//! Session behavior settings.

use std::time::Duration;

use alive_core::RetryConfig;
use serde::{Deserialize, Serialize};

/// Batching, reconnect pacing and redeploy handling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Maximum topics per subscribe or unsubscribe frame.
    pub batch_size: usize,
    /// Spread applied to reconnects after an unexplained disconnect, so a
    /// crashed server is not hit by every client at once.
    pub reconnect_window_ms: u64,
    /// A client that came online more recently than this reconnects
    /// without spread.
    pub recently_online_ms: u64,
    /// Backoff for fetching a fresh socket URL. Must stay unbounded.
    pub refresh: RetryConfig,
    /// Earliest early reconnect after the server announced a redeploy.
    pub redeploy_reconnect_min_ms: u64,
    /// Latest early reconnect after the server announced a redeploy.
    pub redeploy_reconnect_max_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            batch_size: 25,
            reconnect_window_ms: 10_000,
            recently_online_ms: 60_000,
            refresh: RetryConfig::unbounded(),
            redeploy_reconnect_min_ms: 3 * 60_000,
            redeploy_reconnect_max_ms: 25 * 60_000,
        }
    }
}

impl SessionSettings {
    /// Reconnect window as a [`Duration`].
    pub fn reconnect_window(&self) -> Duration {
        Duration::from_millis(self.reconnect_window_ms)
    }

    /// Recently-online threshold as a [`Duration`].
    pub fn recently_online(&self) -> Duration {
        Duration::from_millis(self.recently_online_ms)
    }
}
