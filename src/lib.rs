//! zextract extracts ZIP archives onto the filesystem without letting them
//! write anywhere they shouldn't:
//!
//! ```no_run
//! # use zextract::*;
//! # async fn run() -> ExtractResult<()> {
//! let options = ExtractOptions::new("/tmp/unpacked")
//!     .exclude("do-not-want.txt")
//!     .default_file_mode("600");
//! extract_file("foo.zip", options).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Directory structure and Unix permissions are reproduced.
//! Entries are extracted one at a time, in the order the archive lists them.
//! Each entry's parent directory is created, resolved to its canonical path
//! (following any symlinks), and checked to be inside the target directory
//! before anything is written into it. An entry that would escape
//! ("zip-slip", e.g. `../../etc/passwd`) fails the whole extraction
//! with [`ExtractError::PathTraversal`].
//!
//! The first error of any kind stops extraction. Entries already written
//! stay on disk; cleaning up is the caller's call.
//!
//! If you'd like to do your own thing, the [`read`] module has the archive
//! reader the extractor is built on:
//!
//! ```no_run
//! # use std::io;
//! # use zextract::read::ZipArchive;
//! let mut archive = ZipArchive::open("foo.zip")?;
//! while let Some(entry) = archive.next_entry()? {
//!     let mut reader = archive.read(&entry)?;
//!     io::copy(&mut reader, &mut io::sink())?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::path::Path;

pub mod classify;
pub mod extract;
pub mod mode;
pub mod options;
pub mod path;
pub mod read;
pub mod result;

pub use extract::Extractor;
pub use options::ExtractOptions;
pub use read::{Entry, ZipArchive};
pub use result::{BoxError, ExtractError, ExtractResult, ZipError, ZipResult};

mod arch;
mod crc_reader;
mod spec;

/// Extracts the ZIP archive at `zip_path` according to `options`.
pub async fn extract_file<P: AsRef<Path>>(
    zip_path: P,
    options: ExtractOptions,
) -> ExtractResult<()> {
    Extractor::new(options).extract_file(zip_path).await
}

/// Extracts a ZIP archive held in memory according to `options`.
pub async fn extract_buffer(bytes: Vec<u8>, options: ExtractOptions) -> ExtractResult<()> {
    Extractor::new(options).extract_buffer(bytes).await
}
