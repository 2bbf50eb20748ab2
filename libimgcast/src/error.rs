//! Error types for imgcast

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ImgcastError>;

#[derive(Error, Debug)]
pub enum ImgcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Remote UI error: {0}")]
    Ui(#[from] UiError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ImgcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ImgcastError::InvalidInput(_) => 2,
            ImgcastError::Session(SessionError::Missing(_)) => 2,
            ImgcastError::Discovery(DiscoveryError::RootNotFound(_)) => 2,
            ImgcastError::Discovery(DiscoveryError::NotADirectory(_)) => 2,
            ImgcastError::Session(_) => 1,
            ImgcastError::Config(_) => 1,
            ImgcastError::Ledger(_) => 1,
            ImgcastError::Ui(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Ledger migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Ledger at {path} failed its integrity check ({detail}). Refusing to continue; repair or move the file manually.")]
    Corrupt { path: String, detail: String },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No saved session at {0}. Run `imgcast-login` first.")]
    Missing(PathBuf),

    #[error("Failed to read session: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to parse session: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to write session: {0}")]
    Write(#[source] std::io::Error),
}

#[derive(Error, Debug, Clone)]
pub enum UiError {
    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("No element matched {0}")]
    ElementNotFound(String),

    #[error("Interaction failed: {0}")]
    Interaction(String),

    #[error("Browser driver error: {0}")]
    Driver(String),
}

impl UiError {
    /// Whether retrying the same step could plausibly succeed
    ///
    /// Missing elements and rejected interactions are structural; repeating
    /// them against the same page does not help.
    pub fn is_transient(&self) -> bool {
        match self {
            UiError::Navigation(_) | UiError::Timeout { .. } | UiError::Driver(_) => true,
            UiError::ElementNotFound(_) | UiError::Interaction(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Directory does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = ImgcastError::InvalidInput("post size must be positive".to_string());
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_missing_session() {
        let error = ImgcastError::Session(SessionError::Missing(PathBuf::from("session.json")));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_missing_directory() {
        let error = ImgcastError::Discovery(DiscoveryError::RootNotFound(PathBuf::from("/nope")));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_ledger_corruption() {
        let error = ImgcastError::Ledger(LedgerError::Corrupt {
            path: "uploads.db".to_string(),
            detail: "file is not a database".to_string(),
        });
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_missing_session_message_is_actionable() {
        let error = SessionError::Missing(PathBuf::from("/tmp/session.json"));
        let message = error.to_string();
        assert!(message.contains("/tmp/session.json"));
        assert!(message.contains("imgcast-login"));
    }

    #[test]
    fn test_error_message_formatting_config() {
        let config_error = ConfigError::MissingField("ledger.path".to_string());
        let error = ImgcastError::Config(config_error);
        assert_eq!(
            error.to_string(),
            "Configuration error: Missing required field: ledger.path"
        );
    }

    #[test]
    fn test_ui_error_transience() {
        assert!(UiError::Navigation("connection reset".to_string()).is_transient());
        assert!(UiError::Driver("session crashed".to_string()).is_transient());
        assert!(UiError::Timeout {
            what: "post URL".to_string(),
            after: Duration::from_secs(180),
        }
        .is_transient());

        assert!(!UiError::ElementNotFound("input[type='file']".to_string()).is_transient());
        assert!(!UiError::Interaction("element not clickable".to_string()).is_transient());
    }

    #[test]
    fn test_error_conversion_from_ui_error() {
        let ui_error = UiError::ElementNotFound("publish button".to_string());
        let error: ImgcastError = ui_error.into();

        match error {
            ImgcastError::Ui(_) => {}
            _ => panic!("Expected ImgcastError::Ui"),
        }
    }

    #[test]
    fn test_ui_error_clone() {
        // Retry loops keep the last error around while trying again
        let original = UiError::Navigation("net::ERR_CONNECTION_RESET".to_string());
        let cloned = original.clone();
        assert_eq!(original.to_string(), cloned.to_string());
    }
}
