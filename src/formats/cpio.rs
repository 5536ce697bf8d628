//! Code specific to the cpio archive format.
//!
//! Three of the classic on-disk dialects are handled: the "new ASCII"
//! format (magic `070701`), its CRC sibling (`070702`), and the old
//! portable ASCII ("odc") format (`070707`). All of them store a header of
//! fixed-width ASCII numbers, then the entry name, then the data; the new
//! formats pad header and data to four bytes. The archive ends with an
//! entry named `TRAILER!!!`.
//!
//! cpio stores the full UNIX mode word per entry, including the type
//! nybble, which is how entries are classified; HP-UX additionally used
//! 0x9 for its network special files.

use std::io::{self, Read};

use crate::attr::FileType;
use crate::result::{WalkError, WalkResult};

const MAGIC_NEW: &[u8; 6] = b"070701";
const MAGIC_NEW_CRC: &[u8; 6] = b"070702";
const MAGIC_ODC: &[u8; 6] = b"070707";
const TRAILER: &str = "TRAILER!!!";

fn invalid(reason: impl Into<String>) -> WalkError {
    WalkError::InvalidArchive("cpio", reason.into())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Dialect {
    /// "new ASCII", hex fields, 4-byte alignment
    New,
    /// new ASCII plus per-file checksum field
    NewCrc,
    /// old portable ASCII, octal fields, no alignment
    Odc,
}

/// One entry's header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CpioEntry {
    pub name: String,
    /// Full mode word: type nybble plus permission bits
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Modification time, seconds since the UNIX epoch
    pub mtime: i64,
    pub size: u64,
}

impl CpioEntry {
    /// Classifies the entry from its mode's type bits.
    pub(crate) fn file_type(&self) -> FileType {
        match self.mode & 0o170000 {
            0o140000 => FileType::Socket,
            0o120000 => FileType::SymbolicLink,
            0o110000 => FileType::Network,
            0o100000 => FileType::RegularFile,
            0o060000 => FileType::BlockDevice,
            0o040000 => FileType::Directory,
            0o020000 => FileType::CharacterDevice,
            0o010000 => FileType::Fifo,
            _ => FileType::Unknown,
        }
    }
}

/// Sequential reader over the entries of a cpio archive.
///
/// After [`CpioReader::next_entry`] returns a header, the reader itself
/// yields that entry's data through [`Read`]. Advancing skips anything
/// left unread, plus the dialect's padding.
pub(crate) struct CpioReader<R> {
    inner: R,
    dialect: Option<Dialect>,
    remaining: u64,
    /// Bytes of data padding due after the current entry
    trailing_pad: usize,
}

impl<R: Read> CpioReader<R> {
    pub(crate) fn new(inner: R) -> CpioReader<R> {
        CpioReader {
            inner,
            dialect: None,
            remaining: 0,
            trailing_pad: 0,
        }
    }

    /// Advances to the next entry, or returns `None` at the trailer.
    pub(crate) fn next_entry(&mut self) -> WalkResult<Option<CpioEntry>> {
        self.skip_current()?;

        let mut magic = [0u8; 6];
        self.inner
            .read_exact(&mut magic)
            .map_err(WalkError::ArchiveIo)?;
        let dialect = match &magic {
            m if m == MAGIC_NEW => Dialect::New,
            m if m == MAGIC_NEW_CRC => Dialect::NewCrc,
            m if m == MAGIC_ODC => Dialect::Odc,
            _ => return Err(invalid("Unrecognised magic number")),
        };
        // Dialects don't mix within one archive.
        match self.dialect {
            None => self.dialect = Some(dialect),
            Some(d) if d == dialect => {}
            Some(_) => return Err(invalid("Mixed dialects in one archive")),
        }

        let entry = match dialect {
            Dialect::New | Dialect::NewCrc => self.read_new_header()?,
            Dialect::Odc => self.read_odc_header()?,
        };

        if entry.name == TRAILER {
            self.remaining = 0;
            self.trailing_pad = 0;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// New ASCII header: thirteen 8-digit hex fields after the magic.
    ///
    ///   ino mode uid gid nlink mtime filesize devmajor devminor
    ///   rdevmajor rdevminor namesize check
    fn read_new_header(&mut self) -> WalkResult<CpioEntry> {
        let mut fields = [0u8; 13 * 8];
        self.inner
            .read_exact(&mut fields)
            .map_err(WalkError::ArchiveIo)?;
        let field = |i: usize| parse_radix(&fields[i * 8..(i + 1) * 8], 16);

        let mode = field(1)? as u32;
        let uid = field(2)? as u32;
        let gid = field(3)? as u32;
        let mtime = field(5)? as i64;
        let size = field(6)?;
        let name_size = crate::formats::usize(field(11)?)?;

        // Name (including its NUL); header plus name pads to four bytes.
        let name = self.read_name(name_size)?;
        let header_len = 6 + 13 * 8 + name_size;
        self.skip_bytes(pad_to(header_len, 4))?;

        self.remaining = size;
        self.trailing_pad = pad_to(size as usize, 4);
        Ok(CpioEntry {
            name,
            mode,
            uid,
            gid,
            mtime,
            size,
        })
    }

    /// Old portable ASCII header: octal fields of assorted widths.
    ///
    ///   dev[6] ino[6] mode[6] uid[6] gid[6] nlink[6] rdev[6]
    ///   mtime[11] namesize[6] filesize[11]
    fn read_odc_header(&mut self) -> WalkResult<CpioEntry> {
        let mut fields = [0u8; 6 * 7 + 11 + 6 + 11];
        self.inner
            .read_exact(&mut fields)
            .map_err(WalkError::ArchiveIo)?;
        let mut at = 0usize;
        let mut field = |width: usize| -> WalkResult<u64> {
            let v = parse_radix(&fields[at..at + width], 8);
            at += width;
            v
        };

        let _dev = field(6)?;
        let _ino = field(6)?;
        let mode = field(6)? as u32;
        let uid = field(6)? as u32;
        let gid = field(6)? as u32;
        let _nlink = field(6)?;
        let _rdev = field(6)?;
        let mtime = field(11)? as i64;
        let name_size = crate::formats::usize(field(6)?)?;
        let size = field(11)?;

        let name = self.read_name(name_size)?;
        self.remaining = size;
        self.trailing_pad = 0;
        Ok(CpioEntry {
            name,
            mode,
            uid,
            gid,
            mtime,
            size,
        })
    }

    /// Reads a NUL-terminated name field of the given total size.
    fn read_name(&mut self, name_size: usize) -> WalkResult<String> {
        if name_size == 0 {
            return Err(invalid("Zero-length name"));
        }
        let mut bytes = vec![0u8; name_size];
        self.inner
            .read_exact(&mut bytes)
            .map_err(WalkError::ArchiveIo)?;
        while bytes.last() == Some(&0) {
            bytes.pop();
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn skip_current(&mut self) -> WalkResult<()> {
        let total = self.remaining as usize + self.trailing_pad;
        self.skip_bytes(total)?;
        self.remaining = 0;
        self.trailing_pad = 0;
        Ok(())
    }

    fn skip_bytes(&mut self, mut count: usize) -> WalkResult<()> {
        let mut sink = [0u8; 512];
        while count > 0 {
            let step = sink.len().min(count);
            let n = self
                .inner
                .read(&mut sink[..step])
                .map_err(WalkError::ArchiveIo)?;
            if n == 0 {
                return Err(invalid("Archive ends inside an entry"));
            }
            count -= n;
        }
        Ok(())
    }
}

impl<R: Read> Read for CpioReader<R> {
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

/// How many bytes of padding bring `len` up to a multiple of `align`.
fn pad_to(len: usize, align: usize) -> usize {
    (align - len % align) % align
}

fn parse_radix(field: &[u8], radix: u32) -> WalkResult<u64> {
    let text = std::str::from_utf8(field)?;
    u64::from_str_radix(text.trim(), radix)
        .map_err(|_| invalid(format!("Bad numeric field '{text}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_entry(name: &str, mode: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC_NEW);
        let fields = [
            1,                        // ino
            mode as u64,              // mode
            1000,                     // uid
            100,                      // gid
            1,                        // nlink
            1_600_000_000,            // mtime
            data.len() as u64,        // filesize
            0,                        // devmajor
            0,                        // devminor
            0,                        // rdevmajor
            0,                        // rdevminor
            (name.len() + 1) as u64,  // namesize
            0,                        // check
        ];
        for f in fields {
            out.extend_from_slice(format!("{f:08x}").as_bytes());
        }
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out.extend_from_slice(data);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out
    }

    fn trailer() -> Vec<u8> {
        new_entry(TRAILER, 0, b"")
    }

    #[test]
    fn reads_new_ascii_entries() {
        let mut archive = new_entry("dir", 0o040755, b"");
        archive.extend_from_slice(&new_entry("dir/file.txt", 0o100644, b"payload"));
        archive.extend_from_slice(&trailer());

        let mut cpio = CpioReader::new(archive.as_slice());

        let dir = cpio.next_entry().unwrap().unwrap();
        assert_eq!(dir.name, "dir");
        assert_eq!(dir.file_type(), FileType::Directory);

        let file = cpio.next_entry().unwrap().unwrap();
        assert_eq!(file.name, "dir/file.txt");
        assert_eq!(file.file_type(), FileType::RegularFile);
        assert_eq!(file.size, 7);
        assert_eq!(file.uid, 1000);
        let mut data = Vec::new();
        cpio.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"payload");

        assert!(cpio.next_entry().unwrap().is_none());
    }

    #[test]
    fn classifies_special_files() {
        let entry = |mode| CpioEntry {
            name: "x".into(),
            mode,
            uid: 0,
            gid: 0,
            mtime: 0,
            size: 0,
        };
        assert_eq!(entry(0o120777).file_type(), FileType::SymbolicLink);
        assert_eq!(entry(0o060640).file_type(), FileType::BlockDevice);
        assert_eq!(entry(0o020640).file_type(), FileType::CharacterDevice);
        assert_eq!(entry(0o110644).file_type(), FileType::Network);
        assert_eq!(entry(0o010644).file_type(), FileType::Fifo);
        assert_eq!(entry(0o140755).file_type(), FileType::Socket);
        assert_eq!(entry(0o000644).file_type(), FileType::Unknown);
    }

    #[test]
    fn unread_data_is_skipped() {
        let mut archive = new_entry("a", 0o100644, b"some bytes here");
        archive.extend_from_slice(&new_entry("b", 0o100644, b"next"));
        archive.extend_from_slice(&trailer());

        let mut cpio = CpioReader::new(archive.as_slice());
        assert_eq!(cpio.next_entry().unwrap().unwrap().name, "a");
        // Read nothing; the next call must still land on "b".
        assert_eq!(cpio.next_entry().unwrap().unwrap().name, "b");
        let mut data = Vec::new();
        cpio.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"next");
        assert!(cpio.next_entry().unwrap().is_none());
    }

    #[test]
    fn rejects_unknown_magic() {
        let mut cpio = CpioReader::new(&b"071717rest"[..]);
        assert!(cpio.next_entry().is_err());
    }
}
