//! Mapping entry names to destinations, and proving those stay put.
//!
//! [`check_contained()`] runs twice per entry. First on the lexical
//! [`destination()`], before any directory is made for it, so names like
//! `../x/y` are refused without touching the disk. Then on the canonical
//! parent once it exists, since a directory created for an earlier entry
//! (or one that was already there) can be a symlink pointing anywhere.

use std::path::{Component, Path, PathBuf};

use camino::{Utf8Component, Utf8Path};

use crate::result::*;

/// Where an entry goes, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Absolute destination of the entry
    pub path: PathBuf,
    /// The canonical (symlink-free) form of the destination's parent
    pub canonical_parent: PathBuf,
    pub is_dir: bool,
    /// Permission bits to create the entry with
    pub mode: u32,
}

impl ResolvedTarget {
    /// The destination, under the parent that passed the containment check.
    pub fn canonical_path(&self) -> PathBuf {
        match self.path.file_name() {
            Some(name) => self.canonical_parent.join(name),
            None => self.path.clone(),
        }
    }
}

/// Joins an entry name onto the root.
///
/// `.` and empty segments vanish, `..` pops a component,
/// and leading `/` or drive prefixes are dropped so the name always
/// lands under `root` before `..` gets a say.
pub fn destination(root: &Path, entry_name: &str) -> PathBuf {
    let mut dest = root.to_path_buf();
    for component in Utf8Path::new(entry_name).components() {
        match component {
            Utf8Component::Prefix(_) | Utf8Component::RootDir | Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                dest.pop();
            }
            Utf8Component::Normal(part) => dest.push(part),
        }
    }
    dest
}

/// The directory an entry's destination lives in.
pub fn parent_of(dest: &Path) -> &Path {
    dest.parent().unwrap_or(dest)
}

/// Fails unless `path` is `root` or somewhere beneath it.
///
/// `root` must be canonical. `path` must be canonical or come from
/// [`destination()`].
pub fn check_contained(root: &Path, path: &Path, entry_name: &str) -> ExtractResult<()> {
    let escapes = match path.strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .any(|c| matches!(c, Component::ParentDir)),
        Err(_) => true,
    };
    if escapes {
        return Err(ExtractError::PathTraversal {
            entry: entry_name.to_owned(),
            resolved: path.to_path_buf(),
        });
    }
    Ok(())
}
