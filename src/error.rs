//! Error types for the ztoc-rs library.
//!
//! All fallible operations return a [`Result<T>`], an alias for
//! `Result<T, ZtocError>`.
//!
//! # Error categories
//!
//! - **Compressed-stream errors**: [`UnsupportedFormat`], [`Truncated`]
//! - **Tar parsing**: [`MalformedTar`]
//! - **Serialized ztoc**: [`SchemaVersion`], [`Corrupt`]
//! - **Extraction requests**: [`NotFound`], [`WrongType`], [`OutOfBounds`]
//! - **Caller control**: [`Cancelled`], [`InvalidConfig`]
//! - **System errors**: [`Io`]
//!
//! [`UnsupportedFormat`]: ZtocError::UnsupportedFormat
//! [`Truncated`]: ZtocError::Truncated
//! [`MalformedTar`]: ZtocError::MalformedTar
//! [`SchemaVersion`]: ZtocError::SchemaVersion
//! [`Corrupt`]: ZtocError::Corrupt
//! [`NotFound`]: ZtocError::NotFound
//! [`WrongType`]: ZtocError::WrongType
//! [`OutOfBounds`]: ZtocError::OutOfBounds
//! [`Cancelled`]: ZtocError::Cancelled
//! [`InvalidConfig`]: ZtocError::InvalidConfig
//! [`Io`]: ZtocError::Io
//!
//! Errors are surfaced to the caller unchanged; the library performs no
//! retries, and no partial output accompanies an error.

/// Result type alias for operations that may return a ZtocError.
pub type Result<T> = std::result::Result<T, ZtocError>;

/// Error types for ztoc operations.
#[derive(Debug, thiserror::Error)]
pub enum ZtocError {
    /// The input is not a recognized compressed stream.
    #[error("unsupported compressed stream: {0}")]
    UnsupportedFormat(String),

    /// The stream ended before the required bytes were delivered.
    #[error("truncated input: {0}")]
    Truncated(String),

    /// A tar header failed validation during the build walk.
    #[error("malformed tar: {0}")]
    MalformedTar(String),

    /// The serialized ztoc carries a version tag unknown to this
    /// implementation.
    #[error("unknown ztoc schema version: {0}")]
    SchemaVersion(String),

    /// Structural inconsistency in a serialized ztoc.
    #[error("corrupt ztoc: {0}")]
    Corrupt(String),

    /// The named entry is absent from the table of contents.
    #[error("entry not found: {0}")]
    NotFound(String),

    /// The entry exists but is not a regular file.
    #[error("entry {0} is not a regular file")]
    WrongType(String),

    /// A sub-range request falls outside the entry.
    #[error("range out of bounds: {0}")]
    OutOfBounds(String),

    /// The caller's cancellation signal fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid builder configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error from the caller-supplied source or spool.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
