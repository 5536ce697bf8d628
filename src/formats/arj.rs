//! Code specific to the ARJ archive format.
//!
//! Reference: the `arj.txt` technical description shipped with ARJ itself.
//! An archive is a main header followed by local file headers, each a
//! little-endian "basic header" guarded by a CRC-32, with the compressed
//! data following immediately. A basic header size of zero marks the end
//! of the archive.
//!
//! Only method 0 ("stored") payloads can be handed out; the proprietary
//! compression methods 1-4 are reported but not decoded.

use std::io::{self, Read};

use super::{read_u16, read_u32};
use crate::attr::ArjHostOs;
use crate::result::{WalkError, WalkResult};

/// Every header starts with these two bytes (0xEA60 little-endian).
const HEADER_ID: [u8; 2] = [0x60, 0xea];
/// The basic header may not exceed this (from arj.txt).
const MAX_BASIC_HEADER: usize = 2600;

/// File type codes; everything that isn't a directory is file-like.
const FILE_TYPE_DIRECTORY: u8 = 3;
const FILE_TYPE_MAIN_HEADER: u8 = 2;

fn invalid(reason: impl Into<String>) -> WalkError {
    WalkError::InvalidArchive("arj", reason.into())
}

/// One local file header.
#[derive(Debug, Clone)]
pub(crate) struct ArjEntry {
    pub name: String,
    /// Host OS code the entry was archived under
    pub host_os: ArjHostOs,
    /// Compression method; 0 is "stored"
    pub method: u8,
    /// DOS date/time pair: date in the high word, time in the low
    pub date_time: u32,
    pub compressed_size: u64,
    pub original_size: u64,
    /// File access mode; UNIX mode bits when the host OS is UNIX-like.
    /// ARJ does not use the mode's upper nybble for the file type.
    pub file_mode: u16,
    pub is_directory: bool,
}

impl ArjEntry {
    pub(crate) fn dos_date(&self) -> u16 {
        (self.date_time >> 16) as u16
    }

    pub(crate) fn dos_time(&self) -> u16 {
        self.date_time as u16
    }
}

/// Sequential reader over the file entries of an ARJ archive.
///
/// Construction consumes and validates the archive's main header. After
/// [`ArjReader::next_entry`], the reader yields the entry's *stored* bytes
/// through [`Read`] when the method is 0; compressed entries can only be
/// skipped.
pub(crate) struct ArjReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> ArjReader<R> {
    pub(crate) fn new(mut inner: R) -> WalkResult<ArjReader<R>> {
        // The archive leads with its main header, same layout as a file
        // header but with file type 2 and no payload.
        let header = read_basic_header(&mut inner)?
            .ok_or_else(|| invalid("Archive starts with an end-of-archive marker"))?;
        if header.file_type != FILE_TYPE_MAIN_HEADER {
            return Err(invalid("Missing main archive header"));
        }
        Ok(ArjReader {
            inner,
            remaining: 0,
        })
    }

    /// Advances past the current entry's data to the next file header, or
    /// returns `None` at the end-of-archive marker.
    pub(crate) fn next_entry(&mut self) -> WalkResult<Option<ArjEntry>> {
        self.skip_current()?;

        let header = match read_basic_header(&mut self.inner)? {
            Some(h) => h,
            None => return Ok(None),
        };

        self.remaining = u64::from(header.compressed_size);
        Ok(Some(ArjEntry {
            name: header.name,
            host_os: ArjHostOs(header.host_os),
            method: header.method,
            date_time: header.date_time,
            compressed_size: u64::from(header.compressed_size),
            original_size: u64::from(header.original_size),
            file_mode: header.file_mode,
            is_directory: header.file_type == FILE_TYPE_DIRECTORY,
        }))
    }

    fn skip_current(&mut self) -> WalkResult<()> {
        let mut sink = [0u8; 512];
        while self.remaining > 0 {
            let step = sink.len().min(self.remaining as usize);
            let n = self
                .inner
                .read(&mut sink[..step])
                .map_err(WalkError::ArchiveIo)?;
            if n == 0 {
                return Err(invalid("Archive ends inside an entry"));
            }
            self.remaining -= n as u64;
        }
        Ok(())
    }
}

impl<R: Read> Read for ArjReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let limit = buf.len().min(self.remaining as usize);
        let n = self.inner.read(&mut buf[..limit])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

struct BasicHeader {
    host_os: u8,
    method: u8,
    file_type: u8,
    date_time: u32,
    compressed_size: u32,
    original_size: u32,
    file_mode: u16,
    name: String,
}

/// Reads one basic header, or `None` at the end-of-archive marker.
fn read_basic_header<R: Read>(inner: &mut R) -> WalkResult<Option<BasicHeader>> {
    // header id (main and local file header)   2 bytes  (0xEA60)
    // basic header size (0 = end of archive)   2 bytes
    let mut intro = [0u8; 4];
    inner.read_exact(&mut intro).map_err(WalkError::ArchiveIo)?;
    if intro[..2] != HEADER_ID {
        return Err(invalid("Bad header id"));
    }
    let basic_size = usize::from(u16::from_le_bytes([intro[2], intro[3]]));
    if basic_size == 0 {
        return Ok(None);
    }
    if basic_size > MAX_BASIC_HEADER {
        return Err(invalid(format!("Basic header of {basic_size} bytes")));
    }

    let mut basic = vec![0u8; basic_size];
    inner.read_exact(&mut basic).map_err(WalkError::ArchiveIo)?;

    // basic header crc32                       4 bytes
    let mut crc_bytes = [0u8; 4];
    inner
        .read_exact(&mut crc_bytes)
        .map_err(WalkError::ArchiveIo)?;
    if crc32fast::hash(&basic) != u32::from_le_bytes(crc_bytes) {
        return Err(invalid("Basic header CRC mismatch"));
    }

    // Fixed part of the basic header:
    //
    //   first_hdr_size   1 byte   (offset of the file name)
    //   archiver version 1 byte
    //   min version      1 byte
    //   host OS          1 byte
    //   arj flags        1 byte
    //   method           1 byte
    //   file type        1 byte
    //   reserved         1 byte
    //   date/time        4 bytes  (DOS format)
    //   compressed size  4 bytes
    //   original size    4 bytes
    //   original CRC     4 bytes
    //   entryname pos    2 bytes
    //   file access mode 2 bytes
    //   host data        2 bytes
    if basic.len() < 30 {
        return Err(invalid("Basic header too short"));
    }
    let first_hdr_size = usize::from(basic[0]);
    let host_os = basic[3];
    let method = basic[5];
    let file_type = basic[6];

    let mut fixed = &basic[8..];
    let date_time = read_u32(&mut fixed);
    let compressed_size = read_u32(&mut fixed);
    let original_size = read_u32(&mut fixed);
    let _original_crc = read_u32(&mut fixed);
    let _entryname_pos = read_u16(&mut fixed);
    let file_mode = read_u16(&mut fixed);

    // The file name is a NUL-terminated string at first_hdr_size.
    let name_area = basic
        .get(first_hdr_size..)
        .ok_or_else(|| invalid("Name offset beyond header"))?;
    let name_end = name_area
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(name_area.len());
    let name = String::from_utf8_lossy(&name_area[..name_end]).into_owned();

    // Extended headers follow the basic header: size, then data + CRC for
    // each, a size of zero ending the list. In practice nobody writes them.
    loop {
        let mut ext_size_bytes = [0u8; 2];
        inner
            .read_exact(&mut ext_size_bytes)
            .map_err(WalkError::ArchiveIo)?;
        let ext_size = usize::from(u16::from_le_bytes(ext_size_bytes));
        if ext_size == 0 {
            break;
        }
        let mut ext = vec![0u8; ext_size + 4];
        inner.read_exact(&mut ext).map_err(WalkError::ArchiveIo)?;
    }

    Ok(Some(BasicHeader {
        host_os,
        method,
        file_type,
        date_time,
        compressed_size,
        original_size,
        file_mode,
        name,
    }))
}
