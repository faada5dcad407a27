//! A reader that validates a CRC-32 checksum at EOF

use std::io::{self, Read};

use crc32fast::Hasher;

/// Passes reads through from `inner`, hashing as it goes,
/// and fails the read that hits EOF if the hash doesn't match `expected`.
pub struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    expected: u32,
}

impl<R> Crc32Reader<R> {
    pub fn new(inner: R, expected: u32) -> Crc32Reader<R> {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
            expected,
        }
    }

    fn actual(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        if count == 0 && !buf.is_empty() {
            let actual = self.actual();
            if actual != self.expected {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "CRC-32 mismatch: expected {:08x}, got {actual:08x}",
                        self.expected
                    ),
                ));
            }
        }
        self.hasher.update(&buf[..count]);
        Ok(count)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_input() {
        let mut buf = [0; 1];

        let mut reader = Crc32Reader::new(&b""[..], 0);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);

        let mut reader = Crc32Reader::new(&b""[..], 1);
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("CRC-32 mismatch"));
    }

    #[test]
    fn whole_stream() {
        let mut reader = Crc32Reader::new(&b"1234"[..], 0x9be3e0a3);
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"1234");
        // Keeps returning 0 after the end
        assert_eq!(reader.read(&mut [0; 4]).unwrap(), 0);
    }

    #[test]
    fn corrupt_stream() {
        let mut reader = Crc32Reader::new(&b"1235"[..], 0x9be3e0a3);
        assert!(io::copy(&mut reader, &mut io::sink()).is_err());
    }

    #[test]
    fn zero_length_reads_dont_check() {
        let mut buf = [0; 5];
        let mut reader = Crc32Reader::new(&b"1234"[..], 0x9be3e0a3);
        assert_eq!(reader.read(&mut buf[..0]).unwrap(), 0);
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
    }
}
