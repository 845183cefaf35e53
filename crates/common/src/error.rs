use thiserror::Error;

/// Canonical partq error taxonomy used across crates.
///
/// Classification guidance:
/// - [`PartqError::InvalidInput`]: request/config contract violations discovered before work starts
/// - [`PartqError::Execution`]: runtime read/compute/write or data-shape failures
/// - [`PartqError::Io`]: raw filesystem IO failures from std APIs
/// - [`PartqError::Unsupported`]: syntactically valid but intentionally unimplemented behavior
#[derive(Debug, Error)]
pub enum PartqError {
    /// Invalid or incomplete partition request / worker configuration.
    ///
    /// Examples:
    /// - missing table/partition/output descriptor
    /// - key column id outside the projected schema
    /// - folder output target with an empty file-name list
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Runtime failures after validation succeeded.
    ///
    /// Examples:
    /// - parquet decode/encode failures
    /// - a split task that panicked or was cancelled
    /// - bucket/schema state shape mismatches
    #[error("execution error: {0}")]
    Execution(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Valid request for a feature/shape not implemented in the current version.
    ///
    /// Examples:
    /// - unregistered storage scheme
    /// - hash partitioning on an unsupported key column type
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Standard partq result alias.
pub type Result<T> = std::result::Result<T, PartqError>;
