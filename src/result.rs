//! Error types and the related `Result<T>`

use camino::Utf8PathBuf;
use thiserror::Error;

pub type WalkResult<T> = Result<T, WalkError>;

#[derive(Debug, Error)]
pub enum WalkError {
    /// An error from underlying I/O. This is what a consumer's
    /// `?`-propagated `std::io::Error` becomes, so it always aborts the
    /// walk; extractors report their own read failures as
    /// [`WalkError::ArchiveIo`] instead.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// An I/O failure met while reading a container's own bytes (opening
    /// it, spilling it to disk, pulling entry headers off its stream).
    /// Kept apart from [`WalkError::Io`] so that a consumer hitting
    /// ENOSPC while writing extracted data is never mistaken for a broken
    /// archive and silently skipped.
    #[error("archive I/O error")]
    ArchiveIo(#[source] std::io::Error),

    /// A container held data that violates its own format specification.
    /// The first field names the format ("zip", "arj", ...).
    #[error("invalid {0} data: {1}")]
    InvalidArchive(&'static str, String),

    /// The container uses a feature this crate cannot read
    /// (multi-disk ZIP, an exotic compression method, ...).
    #[error("unsupported archive: {0}")]
    UnsupportedArchive(String),

    /// Decoding a name or comment as UTF-8 failed
    #[error("invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// A filesystem entry has a name that cannot be represented in a
    /// UTF-8 display path.
    #[error("path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(std::path::PathBuf),

    /// An include/exclude glob failed to compile
    #[error("invalid glob pattern")]
    Pattern(#[from] globset::Error),

    /// The walker was configured inconsistently. Raised before any
    /// traversal takes place.
    #[error("configuration error: {0}")]
    Config(String),

    /// A traversal produced a nonsensical file hierarchy
    /// (an entry outside the root, a path ending in "..", etc.)
    #[error("strange file hierarchy: {0}")]
    Hierarchy(String),

    /// The same display path was delivered twice to a file tree
    #[error("path '{0}' already in tree")]
    DuplicatePath(Utf8PathBuf),

    /// The default error handler wraps any recoverable failure in this
    /// and aborts the traversal.
    #[error("walk aborted at '{path}': {message}")]
    Aborted {
        path: Utf8PathBuf,
        message: String,
        #[source]
        source: Option<Box<WalkError>>,
    },

    /// A cast from a 64-bit offset to usize failed while mapping an
    /// archive, probably on a 32-bit system.
    #[error("archive too large for address space")]
    ArchiveTooLarge,

    /// Crate-internal signal: an extractor gave up on a container and the
    /// engine should treat it as an opaque leaf. Never escapes the walk.
    #[doc(hidden)]
    #[error("archive skipped")]
    SkippedArchive,

    /// An error returned by a caller-supplied consumer or error handler
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl WalkError {
    /// Wraps an arbitrary error for return from a consumer or error handler.
    pub fn other(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        WalkError::Other(Box::new(e))
    }

    /// True for failures that demote a container to an opaque leaf instead
    /// of aborting the walk: container-level I/O and format trouble, but
    /// never an error raised by the consumer, the error handler or the
    /// configuration. Deliberately does *not* match [`WalkError::Io`] —
    /// that variant is what consumer code's `?` produces.
    pub(crate) fn is_archive_failure(&self) -> bool {
        matches!(
            self,
            WalkError::ArchiveIo(_)
                | WalkError::InvalidArchive(..)
                | WalkError::UnsupportedArchive(_)
                | WalkError::Encoding(_)
                | WalkError::ArchiveTooLarge
        )
    }
}
