//! Assembles small ZIP archives in memory,
//! with full control over the fields the extractor cares about.

#![allow(dead_code)]

use std::io::Write;

use flate2::write::DeflateEncoder;
use flate2::Compression;

/// "Version made by" for an entry written on Unix
pub const MADE_BY_UNIX: u16 = (3 << 8) | 30;
/// "Version made by" for an entry written on MS-DOS (or some Windows tools)
pub const MADE_BY_DOS: u16 = 20;

/// 1980-01-01
const DOS_DATE: u16 = (1 << 5) | 1;
/// Bit 11: UTF-8 names
const UTF8_FLAG: u16 = 1 << 11;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
pub struct ZipBuilder {
    data: Vec<u8>,
    central_directory: Vec<u8>,
    entries: u16,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A regular file with Unix mode 0644
    pub fn file(self, name: &str, contents: &[u8]) -> Self {
        self.file_with_mode(name, contents, 0o100644)
    }

    /// A regular file with the given Unix `mode_t`
    pub fn file_with_mode(self, name: &str, contents: &[u8], mode: u32) -> Self {
        self.raw(name, contents, MADE_BY_UNIX, mode << 16, true)
    }

    /// A directory with Unix mode 0755
    pub fn dir(self, name: &str) -> Self {
        self.raw(name, b"", MADE_BY_UNIX, 0o040755 << 16, false)
    }

    pub fn raw(
        mut self,
        name: &str,
        contents: &[u8],
        version_made_by: u16,
        external_attributes: u32,
        deflate: bool,
    ) -> Self {
        let crc = crc32fast::hash(contents);
        let (method, stored): (u16, Vec<u8>) = if deflate {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(contents).unwrap();
            (8, encoder.finish().unwrap())
        } else {
            (0, contents.to_vec())
        };
        let header_offset = self.data.len() as u32;

        let data = &mut self.data;
        put_u32(data, 0x04034b50);
        put_u16(data, 20); // version needed
        put_u16(data, UTF8_FLAG);
        put_u16(data, method);
        put_u16(data, 0); // time
        put_u16(data, DOS_DATE);
        put_u32(data, crc);
        put_u32(data, stored.len() as u32);
        put_u32(data, contents.len() as u32);
        put_u16(data, name.len() as u16);
        put_u16(data, 0); // extra field length
        data.extend_from_slice(name.as_bytes());
        data.extend_from_slice(&stored);

        let cd = &mut self.central_directory;
        put_u32(cd, 0x02014b50);
        put_u16(cd, version_made_by);
        put_u16(cd, 20); // version needed
        put_u16(cd, UTF8_FLAG);
        put_u16(cd, method);
        put_u16(cd, 0); // time
        put_u16(cd, DOS_DATE);
        put_u32(cd, crc);
        put_u32(cd, stored.len() as u32);
        put_u32(cd, contents.len() as u32);
        put_u16(cd, name.len() as u16);
        put_u16(cd, 0); // extra field length
        put_u16(cd, 0); // comment length
        put_u16(cd, 0); // disk number
        put_u16(cd, 0); // internal attributes
        put_u32(cd, external_attributes);
        put_u32(cd, header_offset);
        cd.extend_from_slice(name.as_bytes());

        self.entries += 1;
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.finish_with_comment(b"")
    }

    pub fn finish_with_comment(self, comment: &[u8]) -> Vec<u8> {
        let ZipBuilder {
            mut data,
            central_directory,
            entries,
        } = self;
        let cd_offset = data.len() as u32;
        data.extend_from_slice(&central_directory);

        put_u32(&mut data, 0x06054b50);
        put_u16(&mut data, 0); // this disk
        put_u16(&mut data, 0); // disk with central directory
        put_u16(&mut data, entries);
        put_u16(&mut data, entries);
        put_u32(&mut data, central_directory.len() as u32);
        put_u32(&mut data, cd_offset);
        put_u16(&mut data, comment.len() as u16);
        data.extend_from_slice(comment);
        data
    }

    /// Finishes with Zip64 end of central directory records,
    /// saturating the classic record's fields.
    pub fn finish_zip64(self) -> Vec<u8> {
        let ZipBuilder {
            mut data,
            central_directory,
            entries,
        } = self;
        let cd_offset = data.len() as u64;
        data.extend_from_slice(&central_directory);

        let zip64_eocdr_offset = data.len() as u64;
        put_u32(&mut data, 0x06064b50);
        put_u64(&mut data, 44); // size of the rest of the record
        put_u16(&mut data, MADE_BY_UNIX);
        put_u16(&mut data, 45); // version needed
        put_u32(&mut data, 0); // this disk
        put_u32(&mut data, 0); // disk with central directory
        put_u64(&mut data, entries as u64);
        put_u64(&mut data, entries as u64);
        put_u64(&mut data, central_directory.len() as u64);
        put_u64(&mut data, cd_offset);

        put_u32(&mut data, 0x07064b50);
        put_u32(&mut data, 0); // disk with zip64 EOCDR
        put_u64(&mut data, zip64_eocdr_offset);
        put_u32(&mut data, 1); // total disks

        put_u32(&mut data, 0x06054b50);
        put_u16(&mut data, 0);
        put_u16(&mut data, 0);
        put_u16(&mut data, u16::MAX);
        put_u16(&mut data, u16::MAX);
        put_u32(&mut data, u32::MAX);
        put_u32(&mut data, u32::MAX);
        put_u16(&mut data, 0);
        data
    }
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}
