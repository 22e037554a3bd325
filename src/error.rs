//! Common error wrapper.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("required file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("insufficient privileges: {0}")]
    Privilege(String),

    #[error("ping stream failed: {0}")]
    PingStream(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Handy alias.
pub type Result<T> = std::result::Result<T, HarnessError>;
