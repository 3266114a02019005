//! Control-plane error taxonomy.
//!
//! Every error carries a wire-visible code mirroring the driver-facing
//! command error classes. Validation errors are raised before any catalog
//! mutation; internal errors indicate a race or bug rather than user error
//! and are never retried by this crate.

use thiserror::Error;

/// Wire-visible error class of a failed control-plane operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidOptions,
    InvalidNamespace,
    NamespaceNotFound,
    FailedToParse,
    BadValue,
    CommandNotSupported,
    BackgroundOperationInProgress,
    InternalError,
}

#[derive(Debug, Error)]
pub enum DistributedError {
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("Failed to parse: {0}")]
    FailedToParse(String),

    #[error("Bad value: {0}")]
    BadValue(String),

    #[error("Command not supported: {0}")]
    CommandNotSupported(String),

    #[error("Background operation in progress: {0}")]
    BackgroundOperationInProgress(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DistributedError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DistributedError::InvalidOptions(_) => ErrorCode::InvalidOptions,
            DistributedError::InvalidNamespace(_) => ErrorCode::InvalidNamespace,
            DistributedError::NamespaceNotFound(_) => ErrorCode::NamespaceNotFound,
            DistributedError::FailedToParse(_) => ErrorCode::FailedToParse,
            DistributedError::BadValue(_) => ErrorCode::BadValue,
            DistributedError::CommandNotSupported(_) => ErrorCode::CommandNotSupported,
            DistributedError::BackgroundOperationInProgress(_) => {
                ErrorCode::BackgroundOperationInProgress
            }
            DistributedError::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        DistributedError::Internal(message.into())
    }
}

pub type Result<T> = std::result::Result<T, DistributedError>;
