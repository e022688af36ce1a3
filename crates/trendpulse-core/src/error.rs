use std::path::PathBuf;

use thiserror::Error;

/// Core error type for TrendPulse.
#[derive(Debug, Error)]
pub enum TrendPulseError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{service} request failed: {message}")]
    Transport { service: &'static str, message: String },
    #[error("row store error at {path}: {message}")]
    Store { path: PathBuf, message: String },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrendPulseError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn transport(service: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            service,
            message: message.into(),
        }
    }

    pub fn store(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Store {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// Failure to turn free-form model output into a structured value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecisionParseError {
    #[error("response has no ```yaml block")]
    MissingBlock,
    #[error("malformed yaml block: {0}")]
    Malformed(String),
    #[error("required field `{0}` is missing or empty")]
    MissingField(&'static str),
    #[error("unknown action `{0}`")]
    UnknownAction(String),
}
