//! A reader adapter that validates a CRC-32 checksum at end of stream.

use std::io;
use std::io::prelude::*;

use crc32fast::Hasher;

/// Wraps a reader and fails the read that reaches EOF if the running CRC-32
/// does not match the expected value. Used for ZIP entry payloads, whose
/// central directory stores the checksum of the decompressed bytes.
pub(crate) struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    expected: u32,
}

impl<R> Crc32Reader<R> {
    pub(crate) fn new(inner: R, expected: u32) -> Crc32Reader<R> {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
            expected,
        }
    }

    fn matches(&self) -> bool {
        self.hasher.clone().finalize() == self.expected
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        if count == 0 {
            if !buf.is_empty() && !self.matches() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "CRC-32 mismatch",
                ));
            }
            return Ok(0);
        }
        self.hasher.update(&buf[..count]);
        Ok(count)
    }
}
