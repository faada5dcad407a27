use crate::result::*;

/// A checked cast to usize for sizes and offsets read from the archive.
pub fn usize<I: Into<u64>>(i: I) -> ZipResult<usize> {
    let i: u64 = i.into();
    usize::try_from(i).map_err(|_| ZipError::InsufficientAddressSpace)
}
