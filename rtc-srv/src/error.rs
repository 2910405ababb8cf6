use thiserror::Error;

use crate::service::ServiceErrorCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The operation was cancelled before or while it was executing.
    #[error("operation cancelled")]
    ErrCancelled,
    /// The configured timeout elapsed before the resolver service
    /// produced a terminal reply.
    #[error("operation timed out")]
    ErrTimeout,
    /// The resolver service reported a non-zero status for the query.
    #[error("resolver service error: {0}")]
    ErrResolver(ServiceErrorCode),
    /// The query could not be issued at all.
    #[error("failed to issue query: {0}")]
    ErrSetup(ServiceErrorCode),
    #[error("service name must not be empty")]
    ErrEmptyServiceName,
    #[error("run loop: {0}")]
    ErrRunLoop(String),

    // Per-answer parse failures. These never terminate a query.
    #[error("insufficient data for base length type")]
    ErrBaseLen,
    #[error("segment length too long")]
    ErrSegTooLong,
    #[error("name too long")]
    ErrNameTooLong,
    #[error("compressed name in rdata")]
    ErrCompressedName,
    #[error("name is missing its root label")]
    ErrTruncatedName,
    #[error("trailing data after rdata")]
    ErrTrailingData,
}

impl Error {
    /// Reports whether this error describes a single malformed answer
    /// rather than a terminal failure of the query.
    pub fn is_malformed_answer(&self) -> bool {
        matches!(
            self,
            Error::ErrBaseLen
                | Error::ErrSegTooLong
                | Error::ErrNameTooLong
                | Error::ErrCompressedName
                | Error::ErrTruncatedName
                | Error::ErrTrailingData
        )
    }
}
