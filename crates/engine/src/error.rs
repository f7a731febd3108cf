//! Engine Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.
//!
//! Errors come in two flavours. Fatal ones ([`ErrorKind::Configuration`],
//! [`ErrorKind::Storage`], [`ErrorKind::Library`], ...) abort a run before any
//! further action starts. Per-item ones ([`ErrorKind::Encode`],
//! [`ErrorKind::Write`], [`ErrorKind::Filesystem`], [`ErrorKind::Template`])
//! are caught by the executor, recorded as a [`Failure`](crate::Failure) and
//! never stop sibling actions.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An engine error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A collection or template is malformed.
    #[display("invalid configuration")]
    Configuration,
    /// No collection is configured under this name.
    #[display("Alternative collection '{_0}' not found.")]
    UnknownCollection(#[error(not(source))] String),
    /// The collection root is absent and its creation was not confirmed.
    #[display("collection directory is missing: {}", _0.display())]
    MissingCollectionDirectory(#[error(not(source))] PathBuf),
    /// The encoding backend failed to transcode an item.
    #[display("encoding failed")]
    Encode,
    /// Writing tags or embedding art failed.
    #[display("writing tags or artwork failed")]
    Write,
    /// A copy, move, link or delete inside the collection failed.
    #[display("filesystem operation failed")]
    Filesystem,
    /// The manifest is unavailable.
    #[display("manifest storage failed")]
    Storage,
    /// A destination path could not be rendered for an item.
    #[display("could not render path: {_0}")]
    Template(#[error(not(source))] String),
    /// The host library could not be queried.
    #[display("library query failed")]
    Library,
}

/// Failure categories, as counted in a [`RunSummary`](crate::RunSummary).
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FailureKind {
    #[display("encode")]
    Encode,
    #[display("write")]
    Write,
    #[display("filesystem")]
    Filesystem,
    #[display("template")]
    Template,
    /// A removable collection's root is missing and its creation was declined.
    #[display("missing collection directory")]
    MissingCollectionDirectory,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Filesystem | Self::Storage | Self::Encode)
    }

    /// The failure category of an item-level error, or `None` for errors that
    /// must abort the whole run.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Encode => Some(FailureKind::Encode),
            Self::Write => Some(FailureKind::Write),
            Self::Filesystem => Some(FailureKind::Filesystem),
            Self::Template(_) => Some(FailureKind::Template),
            _ => None,
        }
    }
}
