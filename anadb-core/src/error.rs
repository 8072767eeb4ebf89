//! Error types for AnaDB

use crate::object::ObjectId;
use crate::snapshot::SnapshotId;

/// Result type for database operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in database operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key is absent from the active namespace
    #[error("Unknown key: {0}")]
    KeyNotFound(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(SnapshotId),

    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// Stored bytes are not valid JSON; displays the decoder's message as-is
    #[error("{0}")]
    Parse(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for any lookup that found nothing
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::KeyNotFound(_) | Error::SnapshotNotFound(_) | Error::ObjectNotFound(_)
        )
    }

    pub(crate) fn serialization(err: impl std::fmt::Display) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::serialization(err)
    }
}
