//! Error types for the Promptline core library
//!
//! Every failure surfaced by the pipeline falls into one of three kinds:
//! configuration problems, invalid input, or transport failures. Only the
//! last kind is ever retried.

use std::fmt;
use thiserror::Error;
use serde::{Deserialize, Serialize};

/// Main error type for Promptline operations
#[derive(Error, Debug)]
pub enum Error {
    /// Missing credentials, missing model, unreadable configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Malformed YAML, bad roles, preset cycles, format violations
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Network and provider failures
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        status_code: Option<u16>,
        #[source]
        source: Option<anyhow::Error>,
    },
}

/// Convenience type alias for Results using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Discriminant of [`Error`], handy for matching and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Validation,
    Transport,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Transport => write!(f, "transport"),
        }
    }
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Error::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Validation error attributed to a specific input field
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            status_code: None,
            source: None,
        }
    }

    /// Transport error carrying the HTTP status returned by the provider
    pub fn http_status(status_code: u16, message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            status_code: Some(status_code),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config { .. } => ErrorKind::Config,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Transport { .. } => ErrorKind::Transport,
        }
    }

    /// Only transport failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Transport { status_code, .. } => *status_code,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport {
            message: err.to_string(),
            status_code: err.status().map(|s| s.as_u16()),
            source: Some(err.into()),
        }
    }
}
