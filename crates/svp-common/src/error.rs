//! Error types shared across SVP crates

use thiserror::Error;

/// Result type alias for SVP operations
pub type Result<T> = std::result::Result<T, SvpError>;

#[derive(Error, Debug)]
pub enum SvpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown job kind: {0}")]
    UnknownJobKind(String),

    #[error("Unknown job status: {0}")]
    UnknownJobStatus(String),

    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(String),
}
