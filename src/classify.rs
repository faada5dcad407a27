//! Is this entry a directory?
//!
//! ZIP has no single answer. Archivers variously set Unix file type bits,
//! append a trailing slash, or set the DOS directory attribute, so we check
//! each in turn.

use crate::read::Entry;
use crate::spec::System;

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;

/// The MS-DOS "directory" attribute
const DOS_DIRECTORY: u32 = 0x10;

pub fn is_directory(entry: &Entry) -> bool {
    if entry.unix_mode() & S_IFMT == S_IFDIR {
        return true;
    }

    // For archivers that skip Unix attributes but name directories `foo/`
    if entry.name.ends_with('/') {
        return true;
    }

    // Some Windows tools mark directories with only the DOS attribute.
    // Exactly 0x10: anything more and it's probably a file with odd flags.
    System::from_version_made_by(entry.version_made_by) == System::Dos
        && entry.external_attributes == DOS_DIRECTORY
}
