//! Crate-wide error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MediaError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Arithmetic overflow: {0}")]
    Overflow(String),
    #[error("Source format (color depth={depth}, subsampling={subsampling}) not supported")]
    UnsupportedFormat { depth: u8, subsampling: String },
    #[error("Cannot allocate {bytes} bytes")]
    OutOfMemory { bytes: usize },
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),
}

impl MediaError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        MediaError::InvalidArgument(reason.into())
    }

    pub fn overflow(reason: impl Into<String>) -> Self {
        MediaError::Overflow(reason.into())
    }

    /// Reason string carried by the error, without the category prefix.
    pub fn reason(&self) -> String {
        match self {
            MediaError::InvalidArgument(r)
            | MediaError::Overflow(r)
            | MediaError::PreconditionViolation(r) => r.clone(),
            other => other.to_string(),
        }
    }
}
