//! Configuration Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The configuration sources could not be read or deserialized.
    #[display("could not load configuration")]
    Load,
    /// No platform configuration directory could be determined.
    #[display("could not determine a configuration directory")]
    NoConfigDir,
    /// An explicitly requested configuration file does not exist.
    #[display("configuration file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// A configuration file path with an extension we cannot parse.
    #[display("unsupported configuration file: {}", _0.display())]
    UnsupportedFile(#[error(not(source))] PathBuf),
    /// A collection's options are malformed.
    #[display("invalid configuration for collection '{collection}': {reason}")]
    Invalid { collection: String, reason: String },
    /// No collection is configured under the requested name.
    #[display("Alternative collection '{_0}' not found.")]
    UnknownCollection(#[error(not(source))] String),
}

impl ErrorKind {
    pub(crate) fn invalid(collection: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid { collection: collection.into(), reason: reason.into() }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
