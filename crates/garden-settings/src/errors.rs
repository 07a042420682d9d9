//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// Merged settings do not match the expected shape (wrong field types).
    #[error("settings have the wrong shape: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_errors_name_the_path() {
        let err = SettingsError::Read {
            path: PathBuf::from("/home/g/.garden/settings.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(
            err.to_string(),
            "cannot read /home/g/.garden/settings.json: denied"
        );
    }

    #[test]
    fn invalid_value_display() {
        let err = SettingsError::InvalidValue("maxDelayMs below baseDelayMs".to_string());
        assert_eq!(
            err.to_string(),
            "invalid settings value: maxDelayMs below baseDelayMs"
        );
    }
}
