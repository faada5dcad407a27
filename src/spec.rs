//! Parsing of the on-disk records described by PKWARE's APPNOTE.TXT
//!
//! The byte-level layout lives here; [`read`] builds the lazy entry
//! iteration on top of it. Comments quote [`APPNOTE.TXT`] where it helps.
//!
//! Every parser here is bounds-checked: archives come from untrusted
//! sources, so a truncated record is an [`InvalidArchive`] error, not a panic.
//!
//! [`read`]: crate::read
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT
//! [`InvalidArchive`]: crate::result::ZipError::InvalidArchive

use std::borrow::Cow;

use chrono::{NaiveDate, NaiveDateTime};
use codepage_437::*;
use memchr::memmem;

use crate::read::{CompressionMethod, Entry};
use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory magic number
const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Zip64 end of central directory locator magic number
const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];
/// Central directory magic number
const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];

/// The EOCDR is 22 bytes plus a comment of at most `u16::MAX` bytes.
const EOCDR_MAX_SEARCH: usize = 22 + u16::MAX as usize;

impl CompressionMethod {
    fn from_u16(u: u16) -> Self {
        match u {
            0 => CompressionMethod::None,
            8 => CompressionMethod::Deflate,
            v => CompressionMethod::Unsupported(v),
        }
    }
}

/// The host system whose attribute format an entry's external attributes use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum System {
    Dos,
    Unix,
    Unknown,
}

impl System {
    pub(crate) fn from_version_made_by(version_made_by: u16) -> Self {
        // 4.4.2.1 The upper byte indicates the compatibility of the file
        // attribute information.  If the external file attributes
        // are compatible with MS-DOS and can be read by PKZIP for
        // DOS version 2.04g then this value will be zero.
        match version_made_by >> 8 {
            0 => System::Dos,
            3 => System::Unix,
            _ => System::Unknown,
        }
    }
}

/// Splits `len` bytes off the front of `input`.
fn take<'a>(input: &mut &'a [u8], len: usize) -> ZipResult<&'a [u8]> {
    if input.len() < len {
        return Err(ZipError::InvalidArchive("Record truncated"));
    }
    let (taken, rest) = input.split_at(len);
    *input = rest;
    Ok(taken)
}

fn take_array<const N: usize>(input: &mut &[u8]) -> ZipResult<[u8; N]> {
    take(input, N)?
        .try_into()
        .map_err(|_| ZipError::InvalidArchive("Record truncated"))
}

fn read_u64(input: &mut &[u8]) -> ZipResult<u64> {
    take_array(input).map(u64::from_le_bytes)
}

fn read_u32(input: &mut &[u8]) -> ZipResult<u32> {
    take_array(input).map(u32::from_le_bytes)
}

fn read_u16(input: &mut &[u8]) -> ZipResult<u16> {
    take_array(input).map(u16::from_le_bytes)
}

fn expect_magic(input: &mut &[u8], magic: [u8; 4], what: &'static str) -> ZipResult<()> {
    if take_array::<4>(input)? != magic {
        return Err(ZipError::InvalidArchive(what));
    }
    Ok(())
}

/// Data from the End of central directory record
#[derive(Debug)]
pub struct EndOfCentralDirectory<'a> {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub file_comment: &'a [u8],
}

impl<'a> EndOfCentralDirectory<'a> {
    pub fn parse(mut eocdr: &'a [u8]) -> ZipResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        expect_magic(
            &mut eocdr,
            EOCDR_MAGIC,
            "Invalid End Of Central Directory Record",
        )?;
        let disk_number = read_u16(&mut eocdr)?;
        let disk_with_central_directory = read_u16(&mut eocdr)?;
        let entries_on_this_disk = read_u16(&mut eocdr)?;
        let entries = read_u16(&mut eocdr)?;
        let central_directory_size = read_u32(&mut eocdr)?;
        let central_directory_offset = read_u32(&mut eocdr)?;
        let comment_length = read_u16(&mut eocdr)?;
        let file_comment = take(&mut eocdr, comment_length as usize)?;

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
            file_comment,
        })
    }
}

/// Searches backward from the end of `mapping` for the
/// End of central directory record.
///
/// Its variable-length comment means we can't jump to a known offset,
/// but it can't start further back than [`EOCDR_MAX_SEARCH`] bytes.
pub fn find_eocdr(mapping: &[u8]) -> ZipResult<usize> {
    let search_start = mapping.len().saturating_sub(EOCDR_MAX_SEARCH);
    memmem::rfind(&mapping[search_start..], &EOCDR_MAGIC)
        .map(|posit| search_start + posit)
        .ok_or(ZipError::InvalidArchive(
            "Couldn't find End Of Central Directory Record",
        ))
}

/// Data from the Zip64 end of central directory locator,
/// which immediately precedes the End of central directory record on Zip64 files.
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub disk_with_central_directory: u32,
    pub zip64_eocdr_offset: u64,
    pub disks: u32,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub const SIZE_IN_FILE: usize = 20;

    /// Returns `None` if the locator isn't there, i.e., this isn't a Zip64 archive.
    pub fn parse(mut mapping: &[u8]) -> ZipResult<Option<Self>> {
        // 4.3.15 Zip64 end of central directory locator
        //
        // zip64 end of central dir locator
        // signature                       4 bytes  (0x07064b50)
        // number of the disk with the
        // start of the zip64 end of
        // central directory               4 bytes
        // relative offset of the zip64
        // end of central directory record 8 bytes
        // total number of disks           4 bytes
        if !mapping.starts_with(&ZIP64_EOCDR_LOCATOR_MAGIC) {
            return Ok(None);
        }
        mapping = &mapping[4..];
        let disk_with_central_directory = read_u32(&mut mapping)?;
        let zip64_eocdr_offset = read_u64(&mut mapping)?;
        let disks = read_u32(&mut mapping)?;

        Ok(Some(Self {
            disk_with_central_directory,
            zip64_eocdr_offset,
            disks,
        }))
    }
}

/// Data from the Zip64 end of central directory record
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectory {
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub entries_on_this_disk: u64,
    pub entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub fn parse(mut eocdr: &[u8]) -> ZipResult<Self> {
        // 4.3.14  Zip64 end of central directory record
        //
        // zip64 end of central dir
        // signature                       4 bytes  (0x06064b50)
        // size of zip64 end of central
        // directory record                8 bytes
        // version made by                 2 bytes
        // version needed to extract       2 bytes
        // number of this disk             4 bytes
        // number of the disk with the
        // start of the central directory  4 bytes
        // total number of entries in the
        // central directory on this disk  8 bytes
        // total number of entries in the
        // central directory               8 bytes
        // size of the central directory   8 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        8 bytes
        // zip64 extensible data sector    (variable size)
        expect_magic(
            &mut eocdr,
            ZIP64_EOCDR_MAGIC,
            "Invalid Zip64 End Of Central Directory Record",
        )?;
        let _record_size = read_u64(&mut eocdr)?;
        let _version_made_by = read_u16(&mut eocdr)?;
        let _minimum_extract_version = read_u16(&mut eocdr)?;
        let disk_number = read_u32(&mut eocdr)?;
        let disk_with_central_directory = read_u32(&mut eocdr)?;
        let entries_on_this_disk = read_u64(&mut eocdr)?;
        let entries = read_u64(&mut eocdr)?;
        let central_directory_size = read_u64(&mut eocdr)?;
        let central_directory_offset = read_u64(&mut eocdr)?;

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
        })
    }
}

/// Finds the Zip64 end of central directory record in the given slice.
///
/// The slice should start at the record's nominal location,
/// but prepended data can push it further along.
pub fn find_zip64_eocdr(mapping: &[u8]) -> ZipResult<usize> {
    memmem::find(mapping, &ZIP64_EOCDR_MAGIC).ok_or(ZipError::InvalidArchive(
        "Couldn't find Zip64 End Of Central Directory Record",
    ))
}

/// Data from a central directory entry,
/// describing one file or folder in the archive.
#[derive(Debug)]
pub struct CentralDirectoryEntry<'a> {
    pub version_made_by: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub external_file_attributes: u32,
    pub header_offset: u32,
    pub path: &'a [u8],
    pub extra_field: &'a [u8],
}

impl<'a> CentralDirectoryEntry<'a> {
    pub fn parse_and_consume(entry: &mut &'a [u8]) -> ZipResult<Self> {
        // 4.3.12  Central directory structure, file header:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        expect_magic(
            entry,
            CENTRAL_DIRECTORY_MAGIC,
            "Invalid central directory entry",
        )?;
        let version_made_by = read_u16(entry)?;
        let _minimum_extract_version = read_u16(entry)?;
        let flags = read_u16(entry)?;
        let compression_method = read_u16(entry)?;
        let last_modified_time = read_u16(entry)?;
        let last_modified_date = read_u16(entry)?;
        let crc32 = read_u32(entry)?;
        let compressed_size = read_u32(entry)?;
        let uncompressed_size = read_u32(entry)?;
        let path_length = read_u16(entry)? as usize;
        let extra_field_length = read_u16(entry)? as usize;
        let file_comment_length = read_u16(entry)? as usize;
        let disk_number = read_u16(entry)?;
        let _internal_file_attributes = read_u16(entry)?;
        let external_file_attributes = read_u32(entry)?;
        let header_offset = read_u32(entry)?;
        let path = take(entry, path_length)?;
        let extra_field = take(entry, extra_field_length)?;
        let _file_comment = take(entry, file_comment_length)?;

        Ok(Self {
            version_made_by,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            external_file_attributes,
            header_offset,
            path,
            extra_field,
        })
    }
}

/// Data from a local file header, which precedes each file's contents.
#[derive(Debug)]
pub struct LocalFileHeader<'a> {
    pub flags: u16,
    pub compression_method: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub path: &'a [u8],
    pub extra_field: &'a [u8],
}

impl<'a> LocalFileHeader<'a> {
    pub fn parse_and_consume(header: &mut &'a [u8]) -> ZipResult<Self> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        expect_magic(header, LOCAL_FILE_HEADER_MAGIC, "Invalid local file header")?;
        let _minimum_extract_version = read_u16(header)?;
        let flags = read_u16(header)?;
        let compression_method = read_u16(header)?;
        let _last_modified_time = read_u16(header)?;
        let _last_modified_date = read_u16(header)?;
        let crc32 = read_u32(header)?;
        let compressed_size = read_u32(header)?;
        let uncompressed_size = read_u32(header)?;
        let path_length = read_u16(header)? as usize;
        let extra_field_length = read_u16(header)? as usize;
        let path = take(header, path_length)?;
        let extra_field = take(header, extra_field_length)?;

        Ok(Self {
            flags,
            compression_method,
            crc32,
            compressed_size,
            uncompressed_size,
            path,
            extra_field,
        })
    }

    /// Checks the local header against what the central directory told us.
    ///
    /// Sizes and CRC are skipped when a data descriptor follows the file,
    /// since the local header then holds zeros.
    pub fn matches(&self, entry: &Entry) -> ZipResult<bool> {
        let name = decode_path(self.path, self.flags)?;
        if name != entry.name
            || CompressionMethod::from_u16(self.compression_method) != entry.compression_method
        {
            return Ok(false);
        }
        if has_data_descriptor(self.flags) {
            return Ok(true);
        }
        let mut size = self.uncompressed_size as u64;
        let mut compressed_size = self.compressed_size as u64;
        parse_zip64_extra_field(self.extra_field, &mut size, &mut compressed_size, None)?;
        Ok(self.crc32 == entry.crc32
            && size == entry.size
            && compressed_size == entry.compressed_size)
    }
}

/// Bit 11: Language encoding flag (EFS). If set, the file name is UTF-8;
/// otherwise it is CP437.
fn is_utf8(flags: u16) -> bool {
    flags & (1 << 11) != 0
}

/// Bit 0: If set, indicates that the file is encrypted
fn is_encrypted(flags: u16) -> bool {
    flags & 1 != 0
}

/// Bit 3: CRC and sizes are in a data descriptor after the file data.
fn has_data_descriptor(flags: u16) -> bool {
    flags & (1 << 3) != 0
}

fn decode_path(raw: &[u8], flags: u16) -> ZipResult<String> {
    if is_utf8(flags) {
        Ok(std::str::from_utf8(raw)?.to_owned())
    } else {
        let decoded: Cow<str> = Cow::borrow_from_cp437(raw, &CP437_CONTROL);
        Ok(decoded.into_owned())
    }
}

impl Entry {
    /// Builds an [`Entry`] from its central directory record.
    pub(crate) fn from_cde(cde: &CentralDirectoryEntry, is_last: bool) -> ZipResult<Self> {
        let name = decode_path(cde.path, cde.flags)?;

        if cde.disk_number != 0 {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: file {} claims to be on disk {}",
                name, cde.disk_number,
            )));
        }

        let mut size = cde.uncompressed_size as u64;
        let mut compressed_size = cde.compressed_size as u64;
        let mut header_offset = cde.header_offset as u64;
        parse_zip64_extra_field(
            cde.extra_field,
            &mut size,
            &mut compressed_size,
            Some(&mut header_offset),
        )?;

        Ok(Self {
            name,
            size,
            compressed_size,
            compression_method: CompressionMethod::from_u16(cde.compression_method),
            crc32: cde.crc32,
            encrypted: is_encrypted(cde.flags),
            last_modified: parse_msdos(cde.last_modified_time, cde.last_modified_date),
            version_made_by: cde.version_made_by,
            external_attributes: cde.external_file_attributes,
            is_last,
            header_offset,
        })
    }
}

/// Converts an MS-DOS date and time, or `None` if the fields are nonsense
/// (zeroed timestamps are common).
fn parse_msdos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)?.and_hms_opt(hours, minutes, seconds)
}

/// Walks the "extra field" of a header, replacing saturated 32-bit values
/// with their 64-bit counterparts from the Zip64 extended information field.
fn parse_zip64_extra_field(
    mut extra_field: &[u8],
    size: &mut u64,
    compressed_size: &mut u64,
    header_offset: Option<&mut u64>,
) -> ZipResult<()> {
    // 4.5.1 ... Each header MUST consist of:
    //
    //     Header ID - 2 bytes
    //     Data Size - 2 bytes
    let mut header_offset = header_offset;
    while extra_field.len() >= 4 {
        let kind = read_u16(&mut extra_field)?;
        let field_len = read_u16(&mut extra_field)? as usize;
        let mut field = take(&mut extra_field, field_len)?;

        // Zip64 extended information extra field
        if kind == 0x0001 {
            if *size == u32::MAX as u64 {
                *size = read_u64(&mut field)?;
            }
            if *compressed_size == u32::MAX as u64 {
                *compressed_size = read_u64(&mut field)?;
            }
            if let Some(offset) = header_offset.as_deref_mut() {
                if *offset == u32::MAX as u64 {
                    *offset = read_u64(&mut field)?;
                }
            }
        }
    }
    Ok(())
}
