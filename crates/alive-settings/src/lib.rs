//! # alive-settings
//!
//! Layered configuration for the Alive client.
//!
//! Settings are resolved from three layers (later wins):
//! 1. **Compiled defaults**: [`AliveSettings::default()`]
//! 2. **User file**: `~/.alive/settings.json`, or an explicit path
//! 3. **Environment**: `ALIVE_*` variables, `__` separating sections
//!    (`ALIVE_SESSION__BATCH_SIZE=10`)
//!
//! The merged result is validated before it is handed out.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{ENV_PREFIX, figment, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let settings = AliveSettings::default();
        assert!(settings.validate().is_ok());
        assert!(settings_path().ends_with(".alive/settings.json"));
    }
}
