//! Code specific to the UNIX `ar` archive format.
//!
//! The format is charmingly plain: a global magic string, then for each
//! member a 60-byte ASCII header followed by the member's data, aligned to
//! two bytes. There is no standard way to store directories. GNU ar keeps
//! long member names in a `//` string table; BSD ar prepends them to the
//! member data (`#1/N`).

use std::io::{self, Read};

use crate::result::{WalkError, WalkResult};

/// Global header at the front of every archive
const GLOBAL_MAGIC: &[u8; 8] = b"!<arch>\n";
/// Terminates each member header
const HEADER_END: &[u8; 2] = b"`\n";

fn invalid(reason: impl Into<String>) -> WalkError {
    WalkError::InvalidArchive("ar", reason.into())
}

/// One member's header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ArEntry {
    pub name: String,
    /// Modification time, seconds since the UNIX epoch
    pub mtime: i64,
    pub uid: u32,
    pub gid: u32,
    /// Octal mode field; GNU ar stores the full mode including the type bits
    pub mode: u32,
    /// Payload size in bytes (after any BSD embedded name)
    pub size: u64,
}

/// Sequential reader over the members of an `ar` archive.
///
/// After [`ArReader::next_entry`] returns a member, the reader itself
/// yields that member's bytes through [`Read`], up to the member's size.
/// Advancing to the next member skips whatever was left unread.
pub(crate) struct ArReader<R> {
    inner: R,
    /// Unread payload bytes of the current member
    remaining: u64,
    /// True when the current member's size was odd (a '\n' pad follows)
    padded: bool,
    /// GNU long-name table from a `//` member, if one was present
    name_table: Vec<u8>,
}

impl<R: Read> ArReader<R> {
    pub(crate) fn new(mut inner: R) -> WalkResult<ArReader<R>> {
        let mut magic = [0u8; 8];
        inner.read_exact(&mut magic).map_err(WalkError::ArchiveIo)?;
        if &magic != GLOBAL_MAGIC {
            return Err(invalid("Missing global header"));
        }
        Ok(ArReader {
            inner,
            remaining: 0,
            padded: false,
            name_table: Vec::new(),
        })
    }

    /// Advances to the next member and returns its header, or `None` at the
    /// end of the archive.
    pub(crate) fn next_entry(&mut self) -> WalkResult<Option<ArEntry>> {
        loop {
            self.skip_current()?;

            let mut header = [0u8; 60];
            match read_exact_or_eof(&mut self.inner, &mut header)? {
                false => return Ok(None),
                true => {}
            }
            if &header[58..60] != HEADER_END {
                return Err(invalid("Bad member header terminator"));
            }

            let raw_name = trim_ascii(&header[..16]);
            let mtime = parse_dec(&header[16..28])? as i64;
            let uid = parse_dec(&header[28..34])? as u32;
            let gid = parse_dec(&header[34..40])? as u32;
            let mode = parse_oct(&header[40..48])?;
            let mut size = parse_dec(&header[48..58])?;

            self.remaining = size;
            self.padded = size % 2 == 1;

            // GNU name table: stash it and move on to the next member.
            if raw_name == b"//" {
                let mut table = vec![0u8; crate::formats::usize(size)?];
                self.inner
                    .read_exact(&mut table)
                    .map_err(WalkError::ArchiveIo)?;
                self.remaining = 0;
                if self.padded {
                    self.skip_current()?;
                }
                self.name_table = table;
                continue;
            }
            // Symbol lookup table; no file behind it.
            if raw_name == b"/" {
                continue;
            }

            let name = if let Some(rest) = strip_prefix(raw_name, b"#1/") {
                // BSD: the real name is the first N bytes of the data.
                let name_len = parse_dec(rest)?;
                if name_len > size {
                    return Err(invalid("BSD member name longer than member"));
                }
                let mut name_bytes = vec![0u8; crate::formats::usize(name_len)?];
                self.inner
                    .read_exact(&mut name_bytes)
                    .map_err(WalkError::ArchiveIo)?;
                size -= name_len;
                self.remaining = size;
                while name_bytes.last() == Some(&0) {
                    name_bytes.pop();
                }
                String::from_utf8_lossy(&name_bytes).into_owned()
            } else if let Some(rest) = strip_prefix(raw_name, b"/") {
                // GNU: "/N" indexes into the name table.
                let offset = crate::formats::usize(parse_dec(rest)?)?;
                let table = self.name_table.get(offset..).ok_or_else(|| {
                    invalid(format!("Name table offset {offset} out of range"))
                })?;
                let end = table
                    .iter()
                    .position(|&b| b == b'\n' || b == b'/')
                    .unwrap_or(table.len());
                String::from_utf8_lossy(&table[..end]).into_owned()
            } else {
                // GNU terminates inline names with '/', which plain ar
                // doesn't use; strip it either way.
                let name = trim_ascii(raw_name);
                let name = name.strip_suffix(b"/").unwrap_or(name);
                String::from_utf8_lossy(name).into_owned()
            };

            return Ok(Some(ArEntry {
                name,
                mtime,
                uid,
                gid,
                mode,
                size,
            }));
        }
    }

    fn skip_current(&mut self) -> WalkResult<()> {
        let mut to_skip = self.remaining + if self.padded { 1 } else { 0 };
        // The pad byte only exists if the member wasn't the last thing in
        // the file; tolerate EOF while skipping it.
        let mut sink = [0u8; 512];
        while to_skip > 0 {
            let step = sink.len().min(to_skip as usize);
            let n = self
                .inner
                .read(&mut sink[..step])
                .map_err(WalkError::ArchiveIo)?;
            if n == 0 {
                if to_skip == 1 && self.padded {
                    break;
                }
                return Err(invalid("Archive ends inside a member"));
            }
            to_skip -= n as u64;
        }
        self.remaining = 0;
        self.padded = false;
        Ok(())
    }
}

impl<R: Read> Read for ArReader<R> {
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

/// Like `read_exact`, but cleanly reports EOF at a member boundary.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> WalkResult<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read(&mut buf[filled..])
            .map_err(WalkError::ArchiveIo)?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            // A single stray '\n' of alignment padding may precede EOF.
            if filled == 1 && buf[0] == b'\n' {
                return Ok(false);
            }
            return Err(invalid("Archive ends inside a member header"));
        }
        filled += n;
    }
    Ok(true)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != b' ').unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| *b != b' ').map_or(start, |i| i + 1);
    &bytes[start..end]
}

fn strip_prefix<'a>(bytes: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    if bytes.len() > prefix.len() && &bytes[..prefix.len()] == prefix {
        Some(&bytes[prefix.len()..])
    } else {
        None
    }
}

fn parse_dec(field: &[u8]) -> WalkResult<u64> {
    let text = std::str::from_utf8(trim_ascii(field))?;
    if text.is_empty() {
        return Ok(0);
    }
    text.parse()
        .map_err(|_| invalid(format!("Bad decimal field '{text}'")))
}

fn parse_oct(field: &[u8]) -> WalkResult<u32> {
    let text = std::str::from_utf8(trim_ascii(field))?;
    if text.is_empty() {
        return Ok(0);
    }
    u32::from_str_radix(text, 8).map_err(|_| invalid(format!("Bad octal field '{text}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str, mode: &str, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(format!("{name:<16}").as_bytes());
        out.extend_from_slice(format!("{:<12}", 1_600_000_000u64).as_bytes());
        out.extend_from_slice(format!("{:<6}", 1000).as_bytes());
        out.extend_from_slice(format!("{:<6}", 100).as_bytes());
        out.extend_from_slice(format!("{mode:<8}").as_bytes());
        out.extend_from_slice(format!("{:<10}", data.len()).as_bytes());
        out.extend_from_slice(HEADER_END);
        out.extend_from_slice(data);
        if data.len() % 2 == 1 {
            out.push(b'\n');
        }
        out
    }

    #[test]
    fn reads_members_in_order() {
        let mut archive = GLOBAL_MAGIC.to_vec();
        archive.extend_from_slice(&member("hello.txt", "100644", b"hi!"));
        archive.extend_from_slice(&member("other", "100755", b"data"));

        let mut ar = ArReader::new(archive.as_slice()).unwrap();

        let first = ar.next_entry().unwrap().unwrap();
        assert_eq!(first.name, "hello.txt");
        assert_eq!(first.mode, 0o100644);
        assert_eq!(first.size, 3);
        assert_eq!(first.uid, 1000);
        let mut data = Vec::new();
        ar.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"hi!");

        let second = ar.next_entry().unwrap().unwrap();
        assert_eq!(second.name, "other");
        assert_eq!(second.mode, 0o100755);

        // Unread data is skipped when advancing.
        assert!(ar.next_entry().unwrap().is_none());
    }

    #[test]
    fn gnu_long_names() {
        let table = b"very-long-member-name.txt/\n";
        let mut archive = GLOBAL_MAGIC.to_vec();
        archive.extend_from_slice(&member("//", "", table));
        archive.extend_from_slice(&member("/0", "100644", b"x"));

        let mut ar = ArReader::new(archive.as_slice()).unwrap();
        let entry = ar.next_entry().unwrap().unwrap();
        assert_eq!(entry.name, "very-long-member-name.txt");
    }

    #[test]
    fn gnu_inline_names_lose_their_slash() {
        let mut archive = GLOBAL_MAGIC.to_vec();
        archive.extend_from_slice(&member("short/", "100644", b"x"));
        let mut ar = ArReader::new(archive.as_slice()).unwrap();
        assert_eq!(ar.next_entry().unwrap().unwrap().name, "short");
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(ArReader::new(&b"not an archive"[..]).is_err());
    }
}
