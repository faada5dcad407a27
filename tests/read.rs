mod common;

use std::io::{self, Read};

use anyhow::Result;

use common::*;
use zextract::read::{CompressionMethod, ZipArchive};
use zextract::ZipError;

fn hello() -> ZipBuilder {
    ZipBuilder::new()
        .dir("hello/")
        .file("hello/hi.txt", b"hi there")
        .raw("hello/rip.txt", b"rest in peace", MADE_BY_UNIX, 0o100644 << 16, false)
}

fn read_all(archive: &mut ZipArchive) -> Result<Vec<(String, Vec<u8>)>> {
    let mut contents = Vec::new();
    while let Some(entry) = archive.next_entry()? {
        let mut buf = Vec::new();
        archive.read(&entry)?.read_to_end(&mut buf)?;
        contents.push((entry.name, buf));
    }
    Ok(contents)
}

#[test]
fn entries_in_order() -> Result<()> {
    init_logging();
    let mut archive = ZipArchive::new(hello().finish())?;
    assert_eq!(archive.len(), 3);

    let dir = archive.next_entry()?.unwrap();
    assert_eq!(dir.name, "hello/");
    assert_eq!(dir.unix_mode(), 0o040755);
    assert!(!dir.is_last);

    let hi = archive.next_entry()?.unwrap();
    assert_eq!(hi.path().file_name(), Some("hi.txt"));
    assert_eq!(hi.size, 8);
    assert_eq!(hi.compression_method, CompressionMethod::Deflate);
    assert_eq!(hi.crc32, crc32fast::hash(b"hi there"));
    assert!(hi.last_modified.is_some());
    assert!(!hi.is_last);

    let rip = archive.next_entry()?.unwrap();
    assert_eq!(rip.compression_method, CompressionMethod::None);
    assert_eq!(rip.compressed_size, rip.size);
    assert!(rip.is_last);

    assert!(archive.next_entry()?.is_none());
    // Still none, not an error.
    assert!(archive.next_entry()?.is_none());
    Ok(())
}

#[test]
fn contents() -> Result<()> {
    init_logging();
    let mut archive = ZipArchive::new(hello().finish())?;
    assert_eq!(
        read_all(&mut archive)?,
        [
            ("hello/".to_owned(), vec![]),
            ("hello/hi.txt".to_owned(), b"hi there".to_vec()),
            ("hello/rip.txt".to_owned(), b"rest in peace".to_vec()),
        ]
    );
    Ok(())
}

#[test]
fn readers_outlive_the_archive() -> Result<()> {
    init_logging();
    let mut archive = ZipArchive::new(hello().finish())?;
    archive.next_entry()?;
    let hi = archive.next_entry()?.unwrap();
    let mut reader = archive.read(&hi)?;
    drop(archive);

    let handle = std::thread::spawn(move || -> io::Result<String> {
        let mut s = String::new();
        reader.read_to_string(&mut s)?;
        Ok(s)
    });
    assert_eq!(handle.join().unwrap()?, "hi there");
    Ok(())
}

#[test]
fn closed_archives() -> Result<()> {
    init_logging();
    let mut archive = ZipArchive::new(hello().finish())?;
    let dir = archive.next_entry()?.unwrap();
    archive.close();
    assert!(archive.is_closed());

    assert!(matches!(archive.next_entry(), Err(ZipError::Closed)));
    assert!(matches!(archive.read(&dir), Err(ZipError::Closed)));
    // Closing twice is fine.
    archive.close();
    Ok(())
}

#[test]
fn prepended_data() -> Result<()> {
    init_logging();
    let stub = b"MZ pretend this is a self-extractor".to_vec();
    let mut bytes = stub.clone();
    bytes.extend(hello().finish());

    match ZipArchive::new(bytes.clone()) {
        Err(ZipError::PrependedWithUnknownBytes(n)) => assert_eq!(n, stub.len()),
        Err(other) => panic!("Got the wrong error for a prefixed archive: {other:?}"),
        Ok(_) => panic!("Strict parsing accepted a prefixed archive"),
    }

    let (mut archive, offset) = ZipArchive::with_prepended_data(bytes)?;
    assert_eq!(offset, stub.len());
    assert_eq!(read_all(&mut archive)?.len(), 3);
    Ok(())
}

#[test]
fn comments() -> Result<()> {
    init_logging();
    let archive = ZipArchive::new(hello().finish_with_comment(b"greetings, program"))?;
    assert_eq!(archive.comment(), b"greetings, program");
    assert!(!archive.is_empty());

    let empty = ZipArchive::new(ZipBuilder::new().finish())?;
    assert!(empty.is_empty());
    assert!(empty.comment().is_empty());
    Ok(())
}

#[test]
fn zip64() -> Result<()> {
    init_logging();
    let mut archive = ZipArchive::new(hello().finish_zip64())?;
    assert_eq!(archive.len(), 3);
    assert_eq!(read_all(&mut archive)?[2].1, b"rest in peace");

    let stub = vec![0xAB; 1000];
    let mut bytes = stub.clone();
    bytes.extend(hello().finish_zip64());
    let (mut archive, offset) = ZipArchive::with_prepended_data(bytes)?;
    assert_eq!(offset, stub.len());
    assert_eq!(read_all(&mut archive)?[1].1, b"hi there");
    Ok(())
}

#[test]
fn mismatched_local_header() -> Result<()> {
    init_logging();
    let mut bytes = ZipBuilder::new().file("aaa.txt", b"a").finish();
    // Rename the entry in its local header only
    bytes[30..33].copy_from_slice(b"bbb");

    let mut archive = ZipArchive::new(bytes)?;
    let entry = archive.next_entry()?.unwrap();
    assert_eq!(entry.name, "aaa.txt");
    assert!(matches!(
        archive.read(&entry),
        Err(ZipError::InvalidArchive(_))
    ));
    Ok(())
}

#[test]
fn truncated_central_directory() -> Result<()> {
    init_logging();
    let mut bytes = hello().finish();
    // Claim one more entry than there is.
    let entries_at = bytes.len() - 22 + 8;
    bytes[entries_at] += 1;
    bytes[entries_at + 2] += 1;

    let mut archive = ZipArchive::new(bytes)?;
    for _ in 0..3 {
        archive.next_entry()?;
    }
    assert!(matches!(
        archive.next_entry(),
        Err(ZipError::InvalidArchive(_))
    ));
    Ok(())
}
