//! Error types and the related `Result<T>`s
//!
//! [`ZipError`] comes from reading the archive itself;
//! [`ExtractError`] is what extraction hands back to the caller.

use std::path::PathBuf;

use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

pub type ExtractResult<T> = Result<T, ExtractError>;

/// Errors returned by the per-entry observer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// The ZIP archive contained malformed records.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(&'static str),

    /// Decoding a UTF-8 name failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// The ZIP archive uses an unsupported feature
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// The ZIP archive is prepended some unknown bytes.
    /// (Use [`ZipArchive::with_prepended_data()`] if this is okay.)
    ///
    /// [`ZipArchive::with_prepended_data()`]: crate::read::ZipArchive::with_prepended_data
    #[error("Archive prepended with {0} unknown bytes")]
    PrependedWithUnknownBytes(usize),

    /// A 64-bit size or offset doesn't fit in a usize,
    /// probably on a 32-bit system.
    #[error("Zip archive too large for address space")]
    InsufficientAddressSpace,

    /// The archive was closed and its contents released.
    #[error("Zip archive is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    /// The requested target directory can't be used as an extraction root.
    #[error("Target directory {} is expected to be absolute", .0.display())]
    Config(PathBuf),

    /// Reading the archive failed.
    #[error("Couldn't read archive")]
    Archive(#[from] ZipError),

    /// An entry would be written outside the target directory.
    #[error("Out of bound path {} found while processing {entry}", resolved.display())]
    PathTraversal { entry: String, resolved: PathBuf },

    /// Creating a directory or writing a file failed.
    #[error("I/O error at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The `on_entry` observer returned an error.
    #[error("Entry observer failed on {entry}")]
    Observer {
        entry: String,
        #[source]
        source: BoxError,
    },
}

impl ExtractError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| ExtractError::Io { path, source }
    }
}
