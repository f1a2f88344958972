use std::error::Error as StdError;
use std::path::PathBuf;

use thiserror::Error;

/// ScriptSync's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// ScriptSync's crate-wide error type.
///
/// This is intentionally decoupled from `anyhow` so downstream libraries aren't forced to
/// adopt `anyhow` in their own public APIs.
#[derive(Debug, Error)]
pub enum Error {
    /// A media file could not be opened or probed. Fatal for that file only.
    #[error("failed to read media '{}': {message}", path.display())]
    MediaRead { path: PathBuf, message: String },

    /// A cache entry exists but does not decode into a valid transcript.
    #[error("malformed cache entry '{}': {reason}", path.display())]
    CacheMalformed { path: PathBuf, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The acoustic model or tokenizer failed.
    #[error("model failure: {0}")]
    Model(String),

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

impl Error {
    pub(crate) fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub(crate) fn model(err: impl std::fmt::Display) -> Self {
        Self::Model(err.to_string())
    }

    pub(crate) fn media_read(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::MediaRead {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn cache_malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CacheMalformed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Message(format!("{err:#}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Self::Other(Box::new(err))
    }
}
