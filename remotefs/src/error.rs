use remotefs_common::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] globset::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Status code of the underlying backend error, if any.
    pub fn code(&self) -> Option<u16> {
        match self {
            Error::Storage(e) => e.code(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Cancellation surfaced by a backend becomes a pipeline cancellation.
pub(crate) fn from_storage(err: StorageError) -> Error {
    match err {
        StorageError::Cancelled => Error::Cancelled,
        other => Error::Storage(other),
    }
}
