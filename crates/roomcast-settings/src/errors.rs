//! Settings error types.

use thiserror::Error;

/// Why gateway settings could not be produced.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid JSON, or does not fit the settings shape.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),
    /// The merged settings failed validation.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_keeps_cause() {
        let err = SettingsError::from(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "permission denied",
        ));
        assert!(err.to_string().starts_with("cannot read settings file"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn shape_mismatch_is_malformed() {
        let json_err = serde_json::from_str::<Vec<String>>(r#"{"rooms": 1}"#).unwrap_err();
        assert!(SettingsError::from(json_err).to_string().starts_with("malformed settings"));
    }

    #[test]
    fn invalid_value_display() {
        let err = SettingsError::InvalidValue("rooms must not be empty".to_string());
        assert_eq!(err.to_string(), "invalid settings value: rooms must not be empty");
    }
}
