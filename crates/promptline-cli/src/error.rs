//! Error types and handling for the CLI

use promptline_core::ErrorKind;
use std::io;
use std::path::PathBuf;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for CLI operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Error from promptline-core
    #[error("{0}")]
    Core(#[from] promptline_core::Error),

    /// File not found
    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid argument combination
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// Provider name in the config file is not known
    #[error("Provider '{}' not found (expected 'openai' or 'gemini')", name)]
    ProviderNotFound { name: String },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error with context
    #[error("{message}")]
    Other { message: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an invalid arguments error
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::InvalidArgs(message.into())
    }

    /// Create a generic error with message
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io(_) => 1,
            Self::Core(e) => match e.kind() {
                ErrorKind::Validation => 2,
                ErrorKind::Config => 5,
                ErrorKind::Transport => 10,
            },
            Self::FileNotFound { .. } => 3,
            Self::Config(_) => 5,
            Self::InvalidArgs(_) => 6,
            Self::ProviderNotFound { .. } => 7,
            Self::Json(_) => 12,
            Self::Yaml(_) => 13,
            Self::Other { .. } => 99,
        }
    }

    /// Check if this error should display usage help
    pub fn should_show_help(&self) -> bool {
        matches!(self, Self::InvalidArgs(_))
    }
}

/// Format an error for display to the user
pub fn format_error(error: &Error, use_color: bool) -> String {
    if use_color {
        use colored::Colorize;
        format!("{} {}", "Error:".red().bold(), error)
    } else {
        format!("Error: {}", error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_core_kind() {
        let validation = Error::from(promptline_core::Error::validation("bad"));
        let transport = Error::from(promptline_core::Error::http_status(502, "gateway"));
        let config = Error::from(promptline_core::Error::config("missing key"));

        assert_eq!(validation.exit_code(), 2);
        assert_eq!(transport.exit_code(), 10);
        assert_eq!(config.exit_code(), 5);
        assert_eq!(Error::FileNotFound { path: "x".into() }.exit_code(), 3);
    }

    #[test]
    fn test_format_error_keeps_core_message() {
        let err = Error::from(promptline_core::Error::validation("no user message"));
        let text = format_error(&err, false);
        assert_eq!(text, "Error: Validation error: no user message");

        assert_eq!(format_error(&Error::other("boom"), false), "Error: boom");
    }

    #[test]
    fn test_only_invalid_args_shows_help() {
        assert!(Error::invalid_args("x").should_show_help());
        assert!(!Error::config("x").should_show_help());
    }
}
