//! Settings loading.
//!
//! Loading flow:
//! 1. Start with compiled [`AliveSettings::default()`]
//! 2. Merge the JSON file if it exists (a missing file is not an error)
//! 3. Merge `ALIVE_*` environment variables (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use tracing::debug;

use crate::errors::Result;
use crate::types::AliveSettings;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "ALIVE_";

/// Resolve the path to the settings file (`~/.alive/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".alive").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<AliveSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
pub fn load_settings_from_path(path: &Path) -> Result<AliveSettings> {
    debug!(?path, exists = path.exists(), "loading settings");
    let settings: AliveSettings = figment(path).extract().map_err(Box::new)?;
    settings.validate()?;
    Ok(settings)
}

/// The layered provider stack, before extraction.
pub fn figment(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(AliveSettings::default()))
        .merge(Json::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}
