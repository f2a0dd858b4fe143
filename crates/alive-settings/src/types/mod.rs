//! Settings type definitions.
//!
//! Field names are `snake_case` so that file keys and `ALIVE_*` environment
//! keys line up one to one. Every section is `#[serde(default)]`, so a
//! partial file only overrides what it names.

mod logging;
mod session;
mod socket;

pub use logging::*;
pub use session::*;
pub use socket::*;

use alive_core::RetryConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the Alive client.
///
/// ```json
/// {
///   "socket": { "connect_timeout_ms": 4000 },
///   "session": { "batch_size": 25 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AliveSettings {
    /// WebSocket transport settings.
    pub socket: SocketSettings,
    /// Session behavior settings.
    pub session: SessionSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl AliveSettings {
    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.socket.connect_timeout_ms == 0 {
            return invalid("socket.connect_timeout_ms must be at least 1");
        }
        validate_retry("socket.connect", &self.socket.connect)?;
        if self.session.batch_size == 0 {
            return invalid("session.batch_size must be at least 1");
        }
        if self.session.redeploy_reconnect_min_ms > self.session.redeploy_reconnect_max_ms {
            return invalid(
                "session.redeploy_reconnect_min_ms must not exceed session.redeploy_reconnect_max_ms",
            );
        }
        validate_retry("session.refresh", &self.session.refresh)?;
        if self.session.refresh.max_attempts.is_some() {
            return invalid("session.refresh.max_attempts must be unset; refresh retries forever");
        }
        Ok(())
    }
}

fn validate_retry(section: &str, config: &RetryConfig) -> Result<()> {
    if config.max_attempts == Some(0) {
        return invalid(&format!("{section}.max_attempts must be at least 1"));
    }
    if !(0.0..=1.0).contains(&config.jitter_factor) {
        return invalid(&format!("{section}.jitter_factor must be within 0.0..=1.0"));
    }
    if config.base_delay_ms > config.max_delay_ms {
        return invalid(&format!(
            "{section}.base_delay_ms must not exceed {section}.max_delay_ms"
        ));
    }
    Ok(())
}

fn invalid(message: &str) -> Result<()> {
    Err(SettingsError::InvalidValue(message.to_string()))
}
