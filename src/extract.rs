//! The extraction driver
//!
//! Entries are pulled from the archive one at a time and each is fully
//! committed to disk (or fails) before the next is requested:
//!
//! 1. skip `__MACOSX/` metadata and excluded names,
//! 2. refuse names that climb out of the root, then create the entry's parent,
//!    canonicalize it, and make sure it's still inside the root,
//! 3. tell the observer,
//! 4. create the directory, or stream the file out with its resolved mode.
//!
//! The first error cancels the extraction and closes the archive.
//! Nothing already written is rolled back.

use std::io;
use std::path::Path;

use log::*;
use tokio::fs;
use tokio::task;

use crate::classify::is_directory;
use crate::mode::resolve_mode;
use crate::options::ExtractOptions;
use crate::path::{self, ResolvedTarget};
use crate::read::{Entry, ZipArchive};
use crate::result::*;

/// macOS tucks resource forks and Finder info under here. Never extracted.
const MACOS_METADATA_PREFIX: &str = "__MACOSX/";

/// Extracts archives according to a set of [`ExtractOptions`].
///
/// All methods need a Tokio runtime.
#[derive(Debug)]
pub struct Extractor {
    options: ExtractOptions,
    canceled: bool,
}

impl Extractor {
    pub fn new(options: ExtractOptions) -> Self {
        Self {
            options,
            canceled: false,
        }
    }

    /// Memory maps and extracts the archive at `zip_path`.
    pub async fn extract_file<P: AsRef<Path>>(self, zip_path: P) -> ExtractResult<()> {
        let zip_path = zip_path.as_ref().to_path_buf();
        let archive = task::spawn_blocking(move || ZipArchive::open(zip_path))
            .await
            .map_err(|e| ZipError::Io(io::Error::other(e)))??;
        self.extract(archive).await
    }

    /// Extracts an archive held in memory.
    pub async fn extract_buffer(self, bytes: Vec<u8>) -> ExtractResult<()> {
        let (archive, prepended) = ZipArchive::with_prepended_data(bytes)?;
        if prepended != 0 {
            warn!("Archive is prepended with {prepended} bytes");
        }
        self.extract(archive).await
    }

    /// Extracts every entry of an opened archive.
    pub async fn extract(mut self, mut archive: ZipArchive) -> ExtractResult<()> {
        self.ensure_dir().await?;
        self.canceled = false;
        info!(
            "Extracting {} entries into {}",
            archive.len(),
            self.options.dir.display()
        );

        self.stream_entries(&mut archive).await?;
        info!("Extracted into {}", self.options.dir.display());
        Ok(())
    }

    /// Makes sure the target exists and swaps it for its canonical path,
    /// which every entry is then checked against.
    async fn ensure_dir(&mut self) -> ExtractResult<()> {
        let dir = &self.options.dir;
        if !dir.is_absolute() {
            return Err(ExtractError::Config(dir.clone()));
        }
        fs::create_dir_all(dir)
            .await
            .map_err(ExtractError::io(dir))?;
        let canonical = fs::canonicalize(dir)
            .await
            .map_err(ExtractError::io(dir))?;
        debug!("{} is {}", dir.display(), canonical.display());
        self.options.dir = canonical;
        Ok(())
    }

    /// Pulls entries until the archive runs out or one fails.
    /// The first failure cancels: the archive is closed and nothing more is read.
    async fn stream_entries(&mut self, archive: &mut ZipArchive) -> ExtractResult<()> {
        let mut outcome = Ok(());
        while !self.canceled {
            let step = match archive.next_entry() {
                Ok(Some(entry)) => self.process(archive, &entry).await,
                Ok(None) => break,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = step {
                debug!("Extraction aborted: {e}");
                self.canceled = true;
                archive.close();
                outcome = Err(e);
            }
        }
        outcome
    }

    async fn process(&mut self, archive: &ZipArchive, entry: &Entry) -> ExtractResult<()> {
        if entry.name.starts_with(MACOS_METADATA_PREFIX) {
            debug!("Skipping macOS metadata {}", entry.name);
            return Ok(());
        }
        if self.options.is_excluded(&entry.name) {
            debug!("Skipping excluded {}", entry.name);
            return Ok(());
        }
        self.extract_entry(archive, entry).await
    }

    async fn extract_entry(&mut self, archive: &ZipArchive, entry: &Entry) -> ExtractResult<()> {
        let root = &self.options.dir;

        let dest = path::destination(root, &entry.name);
        path::check_contained(root, &dest, &entry.name)?;

        // The parent has to exist before we can ask where it really is.
        let parent = path::parent_of(&dest);
        fs::create_dir_all(parent)
            .await
            .map_err(ExtractError::io(parent))?;
        let canonical_parent = fs::canonicalize(parent)
            .await
            .map_err(ExtractError::io(parent))?;
        path::check_contained(root, &canonical_parent, &entry.name)?;

        if let Some(observer) = self.options.on_entry.as_mut() {
            observer(entry, archive).map_err(|source| ExtractError::Observer {
                entry: entry.name.clone(),
                source,
            })?;
        }

        let is_dir = is_directory(entry);
        let mode = resolve_mode(
            entry.unix_mode(),
            is_dir,
            self.options.default_dir_mode.as_deref(),
            self.options.default_file_mode.as_deref(),
        );
        let target = ResolvedTarget {
            path: dest,
            canonical_parent,
            is_dir,
            mode,
        };
        trace!("{:?}", target);

        if target.is_dir {
            create_directory(&target).await
        } else {
            write_file(archive, entry, &target).await
        }
    }
}

async fn create_directory(target: &ResolvedTarget) -> ExtractResult<()> {
    let dest = target.canonical_path();
    debug!("Creating directory {} ({:o})", dest.display(), target.mode);
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(target.mode);
    builder.create(&dest).await.map_err(ExtractError::io(&dest))
}

async fn write_file(
    archive: &ZipArchive,
    entry: &Entry,
    target: &ResolvedTarget,
) -> ExtractResult<()> {
    // Any directories made here get the default mode; only the file gets the entry's.
    let parent = &target.canonical_parent;
    fs::create_dir_all(parent)
        .await
        .map_err(ExtractError::io(parent))?;
    let dest = target.canonical_path();
    remove_symlink(&dest).await?;

    let reader = archive.read(entry)?;
    debug!(
        "Writing {} ({} bytes, {:o})",
        dest.display(),
        entry.size,
        target.mode
    );

    let mode = target.mode;
    let copy_to = dest.clone();
    let written = task::spawn_blocking(move || copy_to_file(reader, &copy_to, mode))
        .await
        .map_err(io::Error::other)
        .and_then(|copied| copied)
        .map_err(ExtractError::io(&dest))?;
    trace!("Wrote {written} bytes to {}", dest.display());
    Ok(())
}

/// We overwrite whatever is at the destination, but never through a symlink.
async fn remove_symlink(dest: &Path) -> ExtractResult<()> {
    match fs::symlink_metadata(dest).await {
        Ok(metadata) if metadata.file_type().is_symlink() => {
            warn!("Replacing symlink {}", dest.display());
            fs::remove_file(dest).await.map_err(ExtractError::io(dest))
        }
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ExtractError::io(dest)(e)),
    }
}

fn copy_to_file(mut reader: Box<dyn io::Read + Send>, dest: &Path, mode: u32) -> io::Result<u64> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(dest)?;
    io::copy(&mut reader, &mut file)
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn missing_destinations_are_fine() {
        let scratch = tempfile::tempdir().unwrap();
        remove_symlink(&scratch.path().join("nothing-here"))
            .await
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_are_removed() {
        let scratch = tempfile::tempdir().unwrap();
        let real = scratch.path().join("real.txt");
        let link = scratch.path().join("link.txt");
        std::fs::write(&real, b"keep me").unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        remove_symlink(&link).await.unwrap();
        assert!(std::fs::symlink_metadata(&link).is_err());
        assert_eq!(std::fs::read(&real).unwrap(), b"keep me");

        // Regular files stay put; they're truncated when written.
        remove_symlink(&real).await.unwrap();
        assert!(real.exists());
    }

    #[tokio::test]
    async fn lookup_failures_propagate() {
        let scratch = tempfile::tempdir().unwrap();
        // Longer than any filesystem allows a single name to be
        let dest = scratch.path().join("x".repeat(300));
        match remove_symlink(&dest).await {
            Err(ExtractError::Io { path, source }) => {
                assert_eq!(path, dest);
                assert_ne!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("Expected an I/O error, got {other:?}"),
        }
    }
}
