/// Errors raised by storage backend adapters.
///
/// Status-bearing variants keep the HTTP-like code so callers can tell the
/// conditional-request outcomes (304, 412) apart from real failures.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not modified")]
    NotModified,
    #[error("Precondition failed")]
    PreconditionFailed,
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),
    #[error("Operation cancelled")]
    Cancelled,
}

impl StorageError {
    /// HTTP-like status code for this error, when one applies.
    pub fn code(&self) -> Option<u16> {
        match self {
            StorageError::NotModified => Some(304),
            StorageError::PreconditionFailed => Some(412),
            StorageError::NotFound(_) => Some(404),
            StorageError::Status { status, .. } => Some(*status),
            StorageError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Conditional-read outcomes that mean "nothing to fetch" rather than failure.
    pub fn is_expected(&self) -> bool {
        matches!(self.code(), Some(304) | Some(412))
    }

    /// Map a raw status code onto the typed variants.
    pub fn from_status(status: u16, key: &str, body: String) -> Self {
        match status {
            304 => StorageError::NotModified,
            412 => StorageError::PreconditionFailed,
            404 => StorageError::NotFound(key.to_string()),
            _ => StorageError::Status { status, body },
        }
    }
}
