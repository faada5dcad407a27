//! Permission bits for extracted entries

use log::*;

pub const DEFAULT_DIR_MODE: u32 = 0o755;
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Picks the permissions to create an entry with.
///
/// `unix_mode` comes from the entry's external attributes.
/// If it is zero (the archiver recorded nothing), the configured default for
/// the entry's kind is used, then `0o755`/`0o644`.
/// Only the rwx bits survive; file type, setuid, and friends are dropped.
pub fn resolve_mode(
    unix_mode: u32,
    is_dir: bool,
    default_dir_mode: Option<&str>,
    default_file_mode: Option<&str>,
) -> u32 {
    let mode = if unix_mode != 0 {
        unix_mode
    } else if is_dir {
        default_dir_mode
            .and_then(parse_octal)
            .unwrap_or(DEFAULT_DIR_MODE)
    } else {
        default_file_mode
            .and_then(parse_octal)
            .unwrap_or(DEFAULT_FILE_MODE)
    };
    mode & 0o777
}

/// Parses an octal permission string like `"755"` or `"0o755"`.
/// Zero and garbage both yield `None`.
fn parse_octal(mode: &str) -> Option<u32> {
    let trimmed = mode.trim();
    let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
    match u32::from_str_radix(digits, 8) {
        Ok(0) => None,
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!("Ignoring default mode {mode:?}: {e}");
            None
        }
    }
}
