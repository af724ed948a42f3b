//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Network-level failure talking to the directory API (unreachable, timeout).
    #[error("Connection error: {0}")]
    Connectivity(String),

    /// The directory API answered with something we could not use.
    #[error("API error: {0}")]
    Api(String),

    #[error("Channel not found: {login}")]
    NotFound { login: String },

    /// The capture tool could not be started or tracked.
    #[error("Capture launch failed for {login}: {reason}")]
    CaptureLaunch { login: String, reason: String },

    /// A status poll reported the channel as not live.
    #[error("{login} is not live")]
    TransientOffline { login: String },

    /// Socket-level failure on the PubSub connection.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(login: impl Into<String>) -> Self {
        Self::NotFound {
            login: login.into(),
        }
    }

    pub fn capture_launch(login: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CaptureLaunch {
            login: login.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether the operation that produced this error should be tried again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connectivity(_)
                | Self::Api(_)
                | Self::CaptureLaunch { .. }
                | Self::TransientOffline { .. }
                | Self::Transport(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Connectivity(err.to_string())
        } else {
            Self::Api(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
