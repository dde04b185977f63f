// Error taxonomy for the dispatch-price pipelines

use std::fmt;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Why a landed object was refused entry into the inbox.
///
/// `Display` renders the stable reason codes that show up in logs and run
/// error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidObjectReason {
    FileMissing,
    EmptyFile,
    BadArchive,
    BadMember(String),
}

impl fmt::Display for InvalidObjectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidObjectReason::FileMissing => f.write_str("file_missing"),
            InvalidObjectReason::EmptyFile => f.write_str("empty_file"),
            InvalidObjectReason::BadArchive => f.write_str("bad_archive"),
            InvalidObjectReason::BadMember(name) => write!(f, "bad_member:{}", name),
        }
    }
}

/// Failure retrieving one remote object
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("Invalid object: {0}")]
    Invalid(InvalidObjectReason),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Structural failures are deterministic; everything else may be transient.
    ///
    /// Both are retried, but callers use this to label the failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, FetchError::Invalid(_))
    }
}

/// Error types for the ingestion pipelines
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Listing fetch failed for {url}: {message}")]
    ListingFetch { url: String, message: String },

    #[error("Object fetch failed for {name}: {source}")]
    ObjectFetch {
        name: String,
        #[source]
        source: FetchError,
    },

    #[error("Invalid object: {0}")]
    InvalidObject(InvalidObjectReason),

    #[error("Database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Watermark error: {0}")]
    Watermark(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run interrupted")]
    Interrupted,
}

impl From<nem_common::NemError> for IngestError {
    fn from(err: nem_common::NemError) -> Self {
        match err {
            nem_common::NemError::Io(e) => IngestError::Io(e),
            nem_common::NemError::Walk(e) => IngestError::Io(std::io::Error::other(e.to_string())),
            invalid @ nem_common::NemError::InvalidTimestamp(_) => {
                IngestError::Watermark(invalid.to_string())
            },
        }
    }
}

impl From<InvalidObjectReason> for IngestError {
    fn from(reason: InvalidObjectReason) -> Self {
        IngestError::InvalidObject(reason)
    }
}
