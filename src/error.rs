//! Read-ahead reader error types.

use thiserror::Error;

use crate::dlsn::Dlsn;

/// Result type alias for read-ahead operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Read-ahead reader error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("position {start} already truncated (last={last:?})")]
    AlreadyTruncated { start: Dlsn, last: Option<Dlsn> },

    #[error("inconsistent metadata: {0}")]
    InconsistentMetadata(String),

    #[error("log not found: stream deleted")]
    LogNotFound,

    /// Internal signal meaning "no more readable entries in this segment".
    /// Converted into segment advancement by the read-ahead loop; never
    /// surfaced to the consumer.
    #[error("end of log segment")]
    EndOfLogSegment,

    #[error("unexpected error: {0}")]
    Unexpected(String),

    #[error("interrupted while waiting for the next entry")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid configuration file: {0}")]
    ConfigParse(String),
}

impl Error {
    /// True for transient conditions a caller may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Interrupted)
    }

    /// True for everything except the internal end-of-segment signal, which
    /// is absorbed by the read-ahead loop and must never latch as a fatal
    /// reader error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::EndOfLogSegment)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::ConfigParse(e.to_string())
    }
}
