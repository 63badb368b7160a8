//! Error types for the sync run
//!
//! Variants fall into two groups:
//! - fatal startup failures (`Config`, `Connection`, `Auth`) that abort the run
//! - per-transcript failures that carry the offending path so the run can
//!   report them and move on

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Unrecognized log directory layout: {}", path.display())]
    Layout { path: PathBuf },

    #[error("Could not parse a timestamp from {}", path.display())]
    Timestamp { path: PathBuf },

    #[error("Tried all configured encodings for {}", path.display())]
    Encoding { path: PathBuf },

    #[error("Could not render {}: {reason}", path.display())]
    Render { path: PathBuf, reason: String },
}

impl SyncError {
    /// Whether the run must stop rather than move on to the next transcript.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Config(_) | SyncError::Connection(_) | SyncError::Auth(_)
        )
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

impl From<walkdir::Error> for SyncError {
    fn from(err: walkdir::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

/// Result type alias using SyncError
pub type Result<T> = std::result::Result<T, SyncError>;
