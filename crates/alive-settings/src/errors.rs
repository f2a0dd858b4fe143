//! Settings error types.

use thiserror::Error;

/// Errors that can occur when loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A layer could not be read or did not match the settings shape.
    #[error("failed to load settings: {0}")]
    Figment(#[from] Box<figment::Error>),
    /// A value parsed but is out of range.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_value_display() {
        let err = SettingsError::InvalidValue("session.batch_size must be at least 1".to_string());
        assert_eq!(
            err.to_string(),
            "invalid settings value: session.batch_size must be at least 1"
        );
    }

    #[test]
    fn figment_error_from_conversion() {
        let err: SettingsError = Box::new(figment::Error::from("bad layer".to_string())).into();
        assert!(matches!(err, SettingsError::Figment(_)));
        assert!(err.to_string().contains("bad layer"));
    }
}
