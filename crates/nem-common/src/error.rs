//! Error types shared across the NEM crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, NemError>;

/// Main error type for shared utilities
#[derive(Error, Debug)]
pub enum NemError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid timestamp '{0}': expected YYYYMMDDHHMM or ISO-8601")]
    InvalidTimestamp(String),

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}
