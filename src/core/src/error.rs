use std::path::PathBuf;

use thiserror::Error;

/// Source/destination detection failures.
///
/// Raised by the reference classifier before any copy is attempted.
#[derive(Error, Debug)]
pub enum DetectionError {
    /// A local file is neither an OCI archive nor a docker archive
    #[error("Unrecognized archive: {} is neither an oci-archive nor a docker-archive", path.display())]
    UnrecognizedArchive { path: PathBuf },

    /// A whole repository cannot be collapsed into a single destination tag
    #[error("Unexpected destination tag: '{destination}' carries a tag but the source is a whole repository")]
    UnexpectedDestinationTag { destination: String },

    /// A location could not be parsed as an image reference
    #[error("Invalid reference '{reference}': {cause}")]
    ReferenceParseFailure { reference: String, cause: String },
}

/// imagesync error types
#[derive(Error, Debug)]
pub enum SyncError {
    /// Invalid configuration (bad regex, invalid concurrency, ...)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Source or destination could not be classified
    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),

    /// Tags of a repository could not be enumerated
    #[error("Listing error: {repository} - {message}")]
    ListingError { repository: String, message: String },

    /// A single image copy failed
    #[error("Copy error: {src} -> {dest}: {message}")]
    CopyError {
        src: String,
        dest: String,
        message: String,
    },

    /// Every tag in a repository sync failed
    #[error("All {failed} tag(s) failed to sync")]
    AllTagsFailed { failed: usize },

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// OCI image error
    #[error("OCI image error: {0}")]
    OciImageError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Coarse error classes used to decide how a failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal, reported before any network activity.
    Configuration,
    /// Fatal, no copy attempted.
    Detection,
    /// Recoverable: the destination is treated as empty.
    Listing,
    /// Per-tag, handled according to the failure policy.
    Copy,
    Other,
}

impl SyncError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::ConfigError(_) => ErrorKind::Configuration,
            SyncError::Detection(DetectionError::UnexpectedDestinationTag { .. }) => {
                ErrorKind::Configuration
            }
            SyncError::Detection(_) => ErrorKind::Detection,
            SyncError::ListingError { .. } => ErrorKind::Listing,
            SyncError::CopyError { .. }
            | SyncError::AllTagsFailed { .. }
            | SyncError::RegistryError { .. } => ErrorKind::Copy,
            _ => ErrorKind::Other,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Other(format!("Task failed: {}", err))
    }
}

/// Result type alias for imagesync operations
pub type Result<T> = std::result::Result<T, SyncError>;
