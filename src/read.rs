//! Tools for reading a ZIP archive.
//!
//! A [`ZipArchive`] owns the archive's bytes (memory mapped or in a buffer)
//! and hands out its central directory one [`Entry`] at a time,
//! in the order the archive lists them.
//! Each entry's decompressed contents can then be read with [`ZipArchive::read()`].

use std::fs::File;
use std::io;
use std::ops::{Deref, Range};
use std::path::Path;
use std::sync::Arc;

use camino::Utf8Path;
use chrono::NaiveDateTime;
use flate2::read::DeflateDecoder;
use log::*;
use memmap2::Mmap;

use crate::arch::usize;
use crate::crc_reader::Crc32Reader;
use crate::result::*;
use crate::spec;

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The file is uncompressed
    None,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    /// This is the most common format used by ZIP archives.
    Deflate,
    /// The file is compressed with a yet-unsupported format.
    /// (The u16 indicates the internal format code.)
    Unsupported(u16),
}

/// Metadata for a file or directory in the archive,
/// retrieved from its central directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The entry's name inside the archive, `/`-separated.
    ///
    /// Nothing has been validated about it!
    /// It may be absolute, contain `..`, or be empty.
    pub name: String,

    /// Uncompressed size of the file in bytes
    pub size: u64,

    /// Compressed size of the file in bytes
    pub compressed_size: u64,

    /// Compression algorithm used to store the file
    pub compression_method: CompressionMethod,

    /// The CRC-32 of the decompressed file
    pub crc32: u32,

    /// True if the file is encrypted (decryption is unsupported)
    pub encrypted: bool,

    /// When the file was last modified, if the archive recorded a valid date
    pub last_modified: Option<NaiveDateTime>,

    /// "Version made by"; its upper byte names the system that wrote the entry.
    pub version_made_by: u16,

    /// Raw external file attributes.
    /// Unix archivers pack a `mode_t` into the upper 16 bits.
    pub external_attributes: u32,

    /// True if this is the final entry in the central directory
    pub is_last: bool,

    /// The offset to the local file header in the archive
    pub(crate) header_offset: u64,
}

impl Entry {
    /// The entry's name as a path
    pub fn path(&self) -> &Utf8Path {
        Utf8Path::new(&self.name)
    }

    /// The Unix `mode_t` from the upper half of the external attributes.
    /// Zero if the archiver didn't record one.
    pub fn unix_mode(&self) -> u32 {
        (self.external_attributes >> 16) & 0xFFFF
    }
}

/// The bytes of an archive.
enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for Backing {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Backing::Mapped(mapping) => mapping,
            Backing::Owned(bytes) => bytes,
        }
    }
}

/// A slice of the archive that keeps the archive alive,
/// so readers can outlive borrows of the [`ZipArchive`].
struct SharedSlice {
    backing: Arc<Backing>,
    range: Range<usize>,
}

impl AsRef<[u8]> for SharedSlice {
    fn as_ref(&self) -> &[u8] {
        &self.backing[self.range.clone()]
    }
}

/// Where to find things, as worked out from the end of central directory records.
struct Layout {
    /// Bytes of unrelated data in front of the archive
    archive_offset: usize,
    /// Offset of the central directory from the start of the archive
    central_directory_offset: usize,
    entries: u64,
    comment: Vec<u8>,
}

/// A ZIP archive to be read
pub struct ZipArchive {
    /// `None` once closed.
    backing: Option<Arc<Backing>>,
    archive_offset: usize,
    /// Where the next central directory entry starts, relative to the archive.
    next_record: usize,
    entries: u64,
    entries_read: u64,
    comment: Vec<u8>,
}

impl ZipArchive {
    /// Memory maps the ZIP archive at the given path.
    ///
    /// Data prepended to the archive (say, a self-extractor stub) is tolerated.
    pub fn open<P: AsRef<Path>>(path: P) -> ZipResult<Self> {
        let path = path.as_ref();
        info!("Memory mapping {}", path.display());
        let zip_file = File::open(path)?;
        // The usual mmap caveat: the file mustn't shrink while we hold the map.
        let mapping = unsafe { Mmap::map(&zip_file)? };
        let (archive, prepended) = Self::from_backing(Backing::Mapped(mapping))?;
        if prepended != 0 {
            warn!("{} is prepended with {prepended} bytes", path.display());
        }
        Ok(archive)
    }

    /// Reads a ZIP archive from an in-memory buffer.
    pub fn new(bytes: Vec<u8>) -> ZipResult<Self> {
        let (archive, archive_offset) = Self::with_prepended_data(bytes)?;
        if archive_offset != 0 {
            return Err(ZipError::PrependedWithUnknownBytes(archive_offset));
        }
        Ok(archive)
    }

    /// Like `ZipArchive::new()`, but allows arbitrary data to prepend the archive.
    /// Returns the ZipArchive and the number of bytes prepended to the archive.
    ///
    /// Since a ZIP archive's metadata sits at the back of the file,
    /// many formats consist of ZIP archives prepended with some other data.
    /// For example, a self-extracting archive is one with an executable in the front.
    pub fn with_prepended_data(bytes: Vec<u8>) -> ZipResult<(Self, usize)> {
        Self::from_backing(Backing::Owned(bytes))
    }

    fn from_backing(backing: Backing) -> ZipResult<(Self, usize)> {
        let layout = locate_central_directory(&backing)?;
        trace!(
            "{} entries at nominal offset {}",
            layout.entries,
            layout.central_directory_offset
        );
        let archive = ZipArchive {
            backing: Some(Arc::new(backing)),
            archive_offset: layout.archive_offset,
            next_record: layout.central_directory_offset,
            entries: layout.entries,
            entries_read: 0,
            comment: layout.comment,
        };
        Ok((archive, layout.archive_offset))
    }

    /// The number of entries the central directory claims to hold.
    pub fn len(&self) -> u64 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// The archive's comment, as raw bytes.
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// Parses and returns the next entry from the central directory,
    /// or `None` after the last one.
    ///
    /// No effort is made to deduplicate or otherwise validate entries.
    pub fn next_entry(&mut self) -> ZipResult<Option<Entry>> {
        let backing = self.backing.as_ref().ok_or(ZipError::Closed)?;
        if self.entries_read >= self.entries {
            return Ok(None);
        }

        let mut record = self
            .archive_offset
            .checked_add(self.next_record)
            .and_then(|start| backing.get(start..))
            .ok_or(ZipError::InvalidArchive(
                "Central directory entry out of bounds",
            ))?;
        let record_len = record.len();
        let dir_entry = spec::CentralDirectoryEntry::parse_and_consume(&mut record)?;
        trace!("{:?}", dir_entry);
        self.next_record += record_len - record.len();
        self.entries_read += 1;

        let entry = Entry::from_cde(&dir_entry, self.entries_read == self.entries)?;
        debug!("{:?}", entry);
        Ok(Some(entry))
    }

    /// Opens a reader over the decompressed contents of the given entry.
    ///
    /// The reader checks the entry's CRC-32 when it reaches the end,
    /// failing with an `InvalidData` I/O error on a mismatch.
    /// It holds its own reference to the archive's bytes,
    /// so it can be moved to another thread.
    pub fn read(&self, entry: &Entry) -> ZipResult<Box<dyn io::Read + Send>> {
        let backing = self.backing.as_ref().ok_or(ZipError::Closed)?;

        if entry.encrypted {
            return Err(ZipError::UnsupportedArchive(format!(
                "Can't read encrypted file {}",
                entry.name
            )));
        }

        let mut file_slice = self
            .archive_offset
            .checked_add(usize(entry.header_offset)?)
            .and_then(|start| backing.get(start..))
            .ok_or(ZipError::InvalidArchive("Local file header out of bounds"))?;
        let local_header = spec::LocalFileHeader::parse_and_consume(&mut file_slice)?;
        trace!("{:?}", local_header);
        if cfg!(feature = "check-local-metadata") && !local_header.matches(entry)? {
            return Err(ZipError::InvalidArchive(
                "Central directory entry doesn't match local file header",
            ));
        }

        let data_start = backing.len() - file_slice.len();
        let data_end = data_start
            .checked_add(usize(entry.compressed_size)?)
            .filter(|end| *end <= backing.len())
            .ok_or(ZipError::InvalidArchive("File data out of bounds"))?;
        debug!("Reading {} from {data_start}..{data_end}", entry.name);

        let contents = SharedSlice {
            backing: Arc::clone(backing),
            range: data_start..data_end,
        };
        make_reader(
            entry.compression_method,
            entry.crc32,
            io::Cursor::new(contents),
        )
    }

    /// Releases the archive's bytes.
    ///
    /// Readers already handed out keep working;
    /// everything else on this archive fails with [`ZipError::Closed`].
    pub fn close(&mut self) {
        if self.backing.take().is_some() {
            debug!("Closed archive after {} entries", self.entries_read);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.backing.is_none()
    }
}

/// Finds the central directory, going by the (Zip64) end of central directory record.
fn locate_central_directory(mapping: &[u8]) -> ZipResult<Layout> {
    let eocdr_posit = spec::find_eocdr(mapping)?;
    let eocdr = spec::EndOfCentralDirectory::parse(&mapping[eocdr_posit..])?;
    trace!("{:?}", eocdr);

    if eocdr.disk_number != eocdr.disk_with_central_directory {
        return Err(ZipError::UnsupportedArchive(format!(
            "No support for multi-disk archives: disk ({}) != disk with central directory ({})",
            eocdr.disk_number, eocdr.disk_with_central_directory
        )));
    }
    if eocdr.entries != eocdr.entries_on_this_disk {
        return Err(ZipError::UnsupportedArchive(format!(
            "No support for multi-disk archives: entries ({}) != entries this disk ({})",
            eocdr.entries, eocdr.entries_on_this_disk
        )));
    }
    let comment = eocdr.file_comment.to_vec();

    let locator_posit =
        eocdr_posit.checked_sub(spec::Zip64EndOfCentralDirectoryLocator::SIZE_IN_FILE);
    let locator = match locator_posit {
        Some(posit) => spec::Zip64EndOfCentralDirectoryLocator::parse(&mapping[posit..])?,
        None => None,
    };

    // Zip files can be prepended by arbitrary junk,
    // so all the stored positions might be off by some offset.
    if let (Some(locator), Some(locator_posit)) = (locator, locator_posit) {
        trace!("{:?}", locator);

        if eocdr.disk_number as u32 != locator.disk_with_central_directory {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: disk ({}) != disk with zip64 central directory ({})",
                eocdr.disk_number, locator.disk_with_central_directory
            )));
        }
        if locator.disks != 1 {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: Zip64 EOCDR locator reports {} disks",
                locator.disks
            )));
        }

        // Search for the zip64 EOCDR, from its nominal starting position
        // to the locator.
        let search_start = usize(locator.zip64_eocdr_offset)?;
        let search_space = mapping
            .get(search_start..locator_posit)
            .ok_or(ZipError::InvalidArchive(
                "Invalid Zip64 End Of Central Directory Record offset",
            ))?;
        // Since we're searching from the nominal offset,
        // the returned position is the archive offset.
        let archive_offset = spec::find_zip64_eocdr(search_space)?;
        let zip64_eocdr = spec::Zip64EndOfCentralDirectory::parse(&search_space[archive_offset..])?;
        trace!("{:?}", zip64_eocdr);

        if zip64_eocdr.disk_number != zip64_eocdr.disk_with_central_directory
            || zip64_eocdr.entries != zip64_eocdr.entries_on_this_disk
        {
            return Err(ZipError::UnsupportedArchive(String::from(
                "No support for multi-disk Zip64 archives",
            )));
        }

        Ok(Layout {
            archive_offset,
            central_directory_offset: usize(zip64_eocdr.central_directory_offset)?,
            entries: zip64_eocdr.entries,
            comment,
        })
    } else {
        // The offset is the actual position versus the stored one.
        let nominal_offset = usize(eocdr.central_directory_offset)?;
        let archive_offset = eocdr_posit
            .checked_sub(usize(eocdr.central_directory_size)?)
            .and_then(|actual| actual.checked_sub(nominal_offset))
            .ok_or(ZipError::InvalidArchive(
                "Invalid central directory size or offset",
            ))?;

        Ok(Layout {
            archive_offset,
            central_directory_offset: nominal_offset,
            entries: eocdr.entries as u64,
            comment,
        })
    }
}

/// Returns a boxed reader for a compressed file,
/// given its compression method and expected CRC.
fn make_reader<R: io::Read + Send + 'static>(
    compression_method: CompressionMethod,
    crc32: u32,
    reader: R,
) -> ZipResult<Box<dyn io::Read + Send>> {
    match compression_method {
        CompressionMethod::None => Ok(Box::new(Crc32Reader::new(reader, crc32))),
        CompressionMethod::Deflate => {
            let deflate_reader = DeflateDecoder::new(reader);
            Ok(Box::new(Crc32Reader::new(deflate_reader, crc32)))
        }
        CompressionMethod::Unsupported(method) => Err(ZipError::UnsupportedArchive(format!(
            "Compression method {method} not supported"
        ))),
    }
}
