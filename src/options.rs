//! What to extract, and where

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::read::{Entry, ZipArchive};
use crate::result::BoxError;

/// Called with each entry (and the archive it came from) before it's extracted.
pub type EntryObserver = Box<dyn FnMut(&Entry, &ZipArchive) -> Result<(), BoxError> + Send>;

/// Options for one extraction.
///
/// ```
/// # use zextract::ExtractOptions;
/// let options = ExtractOptions::new("/tmp/out")
///     .exclude("README.txt")
///     .default_file_mode("600");
/// ```
pub struct ExtractOptions {
    pub(crate) dir: PathBuf,
    pub(crate) excluded_files: HashSet<String>,
    pub(crate) default_dir_mode: Option<String>,
    pub(crate) default_file_mode: Option<String>,
    pub(crate) on_entry: Option<EntryObserver>,
}

impl ExtractOptions {
    /// Extract into `dir`, which must be absolute.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            excluded_files: HashSet::new(),
            default_dir_mode: None,
            default_file_mode: None,
            on_entry: None,
        }
    }

    /// Skips the entry with exactly this name.
    pub fn exclude<S: Into<String>>(mut self, name: S) -> Self {
        self.excluded_files.insert(name.into());
        self
    }

    /// Skips entries with exactly these names.
    pub fn excluded_files<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_files.extend(names.into_iter().map(Into::into));
        self
    }

    /// Octal mode (e.g. `"755"`) for directories the archive gives no mode.
    pub fn default_dir_mode<S: Into<String>>(mut self, mode: S) -> Self {
        self.default_dir_mode = Some(mode.into());
        self
    }

    /// Octal mode (e.g. `"644"`) for files the archive gives no mode.
    pub fn default_file_mode<S: Into<String>>(mut self, mode: S) -> Self {
        self.default_file_mode = Some(mode.into());
        self
    }

    /// Calls `observer` for every entry that's about to be extracted.
    /// An error from it aborts the extraction.
    pub fn on_entry<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&Entry, &ZipArchive) -> Result<(), BoxError> + Send + 'static,
    {
        self.on_entry = Some(Box::new(observer));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn is_excluded(&self, name: &str) -> bool {
        self.excluded_files.contains(name)
    }
}

impl fmt::Debug for ExtractOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractOptions")
            .field("dir", &self.dir)
            .field("excluded_files", &self.excluded_files)
            .field("default_dir_mode", &self.default_dir_mode)
            .field("default_file_mode", &self.default_file_mode)
            .field("on_entry", &self.on_entry.is_some())
            .finish()
    }
}
