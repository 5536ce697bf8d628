//! Code specific to the 4.4BSD dump archive format.
//!
//! A dump tape is a sequence of 1 KiB records. Each segment starts with a
//! `spcl` header record carrying a magic number, a checksum, a segment type
//! and a copy of the inode being dumped; data blocks follow, with a
//! hole-map (`c_addr`) marking which blocks were actually written and which
//! are sparse. Directories are dumped before files, and their data blocks
//! hold `direct` records mapping names to inode numbers, which is the only
//! place the tape stores names at all.
//!
//! Segment types:
//!
//!   TS_TAPE   1   volume label
//!   TS_INODE  2   a file or directory, header + data blocks
//!   TS_BITS   3   bitmap of dumped inodes
//!   TS_ADDR   4   continuation of the previous TS_INODE's data
//!   TS_END    5   end of the dump
//!   TS_CLRI   6   bitmap of deleted inodes
//!
//! Little-endian records only (dumps written on little-endian hosts).

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read};

use crate::attr::FileType;
use crate::result::{WalkError, WalkResult};

/// Record size; everything on a dump tape is a multiple of this.
const TP_BSIZE: usize = 1024;
/// `c_magic` for the "new" dump format
const NFS_MAGIC: u32 = 60012;
/// Every valid record's 256 words sum to this
const CHECKSUM: i32 = 84446;
/// The root directory's inode number on FFS
const ROOT_INO: u32 = 2;

const TS_TAPE: i32 = 1;
const TS_INODE: i32 = 2;
const TS_BITS: i32 = 3;
const TS_ADDR: i32 = 4;
const TS_END: i32 = 5;
const TS_CLRI: i32 = 6;

fn invalid(reason: impl Into<String>) -> WalkError {
    WalkError::InvalidArchive("dump", reason.into())
}

/// One file or directory recovered from the tape.
#[derive(Debug, Clone)]
pub(crate) struct DumpEntry {
    #[allow(dead_code)]
    pub ino: u32,
    /// Path relative to the dumped filesystem's root, '/'-separated
    pub path: String,
    /// Full mode word, type nybble included
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl DumpEntry {
    /// Classifies the entry from the dump-specific type code in the mode's
    /// top nybble. Unlike generic UNIX modes, dump assigns 0xe to whiteout
    /// entries, so this resolves what [`FileType::from_mode`] cannot.
    pub(crate) fn file_type(&self) -> FileType {
        match (self.mode >> 12) & 0xf {
            0x1 => FileType::Fifo,
            0x2 => FileType::CharacterDevice,
            0x4 => FileType::Directory,
            0x6 => FileType::BlockDevice,
            0x8 => FileType::RegularFile,
            0xa => FileType::SymbolicLink,
            0xc => FileType::Socket,
            0xe => FileType::Whiteout,
            _ => FileType::Unknown,
        }
    }
}

/// A parsed `spcl` header record.
#[derive(Debug)]
struct Segment {
    kind: i32,
    ino: u32,
    mode: u16,
    size: u64,
    atime: i64,
    mtime: i64,
    ctime: i64,
    uid: u32,
    gid: u32,
    /// Hole map for the data blocks of this segment: true = block present
    addr: VecDeque<bool>,
}

impl Segment {
    fn parse(record: &[u8; TP_BSIZE]) -> WalkResult<Segment> {
        // struct spcl {
        //     int32_t   c_type;       /* record type */
        //     int32_t   c_date;       /* date of this dump */
        //     int32_t   c_ddate;      /* date of previous dump */
        //     int32_t   c_volume;     /* dump volume number */
        //     int32_t   c_tapea;      /* logical block of this record */
        //     ino_t     c_inumber;    /* number of inode */
        //     int32_t   c_magic;      /* magic number */
        //     int32_t   c_checksum;   /* record checksum */
        //     struct dinode c_dinode; /* ownership and mode of inode */
        //     int32_t   c_count;      /* number of valid c_addr entries */
        //     char      c_addr[];     /* 1 => data; 0 => hole */
        // };
        let magic = le32(record, 24) as u32;
        if magic != NFS_MAGIC {
            return Err(invalid("Bad record magic"));
        }
        let mut sum = 0i32;
        for word in 0..TP_BSIZE / 4 {
            sum = sum.wrapping_add(le32(record, word * 4));
        }
        if sum != CHECKSUM {
            return Err(invalid("Record checksum mismatch"));
        }

        let kind = le32(record, 0);
        let ino = le32(record, 20) as u32;

        // struct dinode at offset 32:
        //   u_int16_t di_mode;   int16_t di_nlink;  (u_int32_t di_u)
        //   u_int64_t di_size;
        //   int32_t di_atime/atspare, di_mtime/mtspare, di_ctime/ctspare;
        //   daddr_t di_db[12], di_ib[3];
        //   int32_t di_flags, di_blocks, di_gen;
        //   u_int32_t di_uid, di_gid;  int32_t di_spare[2];
        let mode = u16::from_le_bytes([record[32], record[33]]);
        let size = u64::from_le_bytes(
            record[40..48]
                .try_into()
                .expect("eight bytes for di_size"),
        );
        let atime = i64::from(le32(record, 48));
        let mtime = i64::from(le32(record, 56));
        let ctime = i64::from(le32(record, 64));
        let uid = le32(record, 144) as u32;
        let gid = le32(record, 148) as u32;

        let count = le32(record, 160).max(0) as usize;
        let count = count.min(TP_BSIZE - 164);
        let addr = record[164..164 + count].iter().map(|&b| b != 0).collect();

        Ok(Segment {
            kind,
            ino,
            mode,
            size,
            atime,
            mtime,
            ctime,
            uid,
            gid,
            addr,
        })
    }
}

fn le32(record: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(
        record[offset..offset + 4]
            .try_into()
            .expect("four bytes for i32"),
    )
}

/// Data state for the entry currently being read out.
struct EntryData {
    remaining: u64,
    blocks: VecDeque<bool>,
    buf: Box<[u8; TP_BSIZE]>,
    buf_pos: usize,
    buf_len: usize,
}

/// Sequential reader over the entries of a dump archive.
///
/// Directory segments are digested internally to learn the inode-to-name
/// mapping; every segment (directories included) is then surfaced as a
/// [`DumpEntry`], and file data is available through [`Read`] until the
/// next call to [`DumpReader::next_entry`]. Entries whose names never
/// appeared in any directory are dropped with a debug message.
pub(crate) struct DumpReader<R> {
    inner: R,
    names: HashMap<u32, (u32, String)>,
    current: Option<EntryData>,
    finished: bool,
}

impl<R: Read> DumpReader<R> {
    /// Consumes and validates the volume label.
    pub(crate) fn new(mut inner: R) -> WalkResult<DumpReader<R>> {
        let record = read_record(&mut inner)
            .map_err(WalkError::ArchiveIo)?
            .ok_or_else(|| invalid("Empty archive"))?;
        let label = Segment::parse(&record)?;
        if label.kind != TS_TAPE {
            return Err(invalid("Archive does not start with a volume label"));
        }
        Ok(DumpReader {
            inner,
            names: HashMap::new(),
            current: None,
            finished: false,
        })
    }

    pub(crate) fn next_entry(&mut self) -> WalkResult<Option<DumpEntry>> {
        if self.finished {
            return Ok(None);
        }
        self.drain_current()?;

        loop {
            let record = match read_record(&mut self.inner).map_err(WalkError::ArchiveIo)? {
                Some(r) => r,
                None => {
                    self.finished = true;
                    return Ok(None);
                }
            };
            let segment = Segment::parse(&record)?;

            match segment.kind {
                TS_END => {
                    self.finished = true;
                    return Ok(None);
                }
                TS_TAPE => continue,
                TS_BITS | TS_CLRI => {
                    // Bitmaps: c_count full blocks, no holes.
                    for _ in 0..segment.addr.len() {
                        read_record(&mut self.inner)
                            .map_err(WalkError::ArchiveIo)?
                            .ok_or_else(|| invalid("Archive ends inside a bitmap"))?;
                    }
                    continue;
                }
                TS_ADDR => {
                    // A continuation with nothing to continue; the archive
                    // is confused, but its blocks can still be stepped over.
                    log::debug!("stray TS_ADDR segment for inode {}", segment.ino);
                    for present in &segment.addr {
                        if *present {
                            read_record(&mut self.inner)
                                .map_err(WalkError::ArchiveIo)?
                                .ok_or_else(|| invalid("Archive ends inside data"))?;
                        }
                    }
                    continue;
                }
                TS_INODE => {
                    let entry_type = (segment.mode >> 12) & 0xf;
                    if entry_type == 0x4 {
                        // A directory: its data is the name map.
                        self.current = Some(EntryData::new(&segment));
                        let data = self.read_current_to_end(segment.size)?;
                        self.record_directory(segment.ino, &data);
                    } else {
                        self.current = Some(EntryData::new(&segment));
                    }

                    let path = match self.path_of(segment.ino) {
                        Some(p) => p,
                        None => {
                            log::debug!(
                                "dropping inode {} (no name on the tape for it)",
                                segment.ino
                            );
                            self.drain_current()?;
                            continue;
                        }
                    };
                    if path.is_empty() {
                        // The root directory itself; nothing to report.
                        continue;
                    }

                    return Ok(Some(DumpEntry {
                        ino: segment.ino,
                        path,
                        mode: segment.mode,
                        uid: segment.uid,
                        gid: segment.gid,
                        size: segment.size,
                        atime: segment.atime,
                        mtime: segment.mtime,
                        ctime: segment.ctime,
                    }));
                }
                other => return Err(invalid(format!("Unknown segment type {other}"))),
            }
        }
    }

    /// Registers the `direct` records of one directory's data.
    ///
    ///   struct direct {
    ///       u_int32_t d_ino;
    ///       u_int16_t d_reclen;
    ///       u_int8_t  d_type;
    ///       u_int8_t  d_namlen;
    ///       char      d_name[];
    ///   };
    fn record_directory(&mut self, dir_ino: u32, data: &[u8]) {
        let mut at = 0usize;
        while at + 8 <= data.len() {
            let ino = u32::from_le_bytes(data[at..at + 4].try_into().expect("d_ino"));
            let reclen = usize::from(u16::from_le_bytes(
                data[at + 4..at + 6].try_into().expect("d_reclen"),
            ));
            let namlen = usize::from(data[at + 7]);
            if reclen < 8 || at + reclen > data.len() {
                break;
            }
            if ino != 0 && at + 8 + namlen <= data.len() {
                let name = String::from_utf8_lossy(&data[at + 8..at + 8 + namlen]).into_owned();
                if name != "." && name != ".." {
                    self.names.entry(ino).or_insert((dir_ino, name));
                }
            }
            at += reclen;
        }
    }

    /// Rebuilds an inode's path by walking the name map up to the root.
    fn path_of(&self, ino: u32) -> Option<String> {
        if ino == ROOT_INO {
            return Some(String::new());
        }
        let mut parts: Vec<&str> = Vec::new();
        let mut at = ino;
        while at != ROOT_INO {
            let (parent, name) = self.names.get(&at)?;
            parts.push(name);
            if parts.len() > 512 {
                // A cycle in the name map; give up on this inode.
                return None;
            }
            at = *parent;
        }
        parts.reverse();
        Some(parts.join("/"))
    }

    fn read_current_to_end(&mut self, size_hint: u64) -> WalkResult<Vec<u8>> {
        let mut data = Vec::with_capacity(crate::formats::usize(size_hint.min(1 << 20))?);
        let mut buf = [0u8; TP_BSIZE];
        loop {
            let n = self.read(&mut buf).map_err(WalkError::ArchiveIo)?;
            if n == 0 {
                return Ok(data);
            }
            data.extend_from_slice(&buf[..n]);
        }
    }

    fn drain_current(&mut self) -> WalkResult<()> {
        let mut buf = [0u8; TP_BSIZE];
        while self.read(&mut buf).map_err(WalkError::ArchiveIo)? != 0 {}
        self.current = None;
        Ok(())
    }
}

impl EntryData {
    fn new(segment: &Segment) -> EntryData {
        EntryData {
            remaining: segment.size,
            blocks: segment.addr.clone(),
            buf: Box::new([0u8; TP_BSIZE]),
            buf_pos: 0,
            buf_len: 0,
        }
    }
}

impl<R: Read> Read for DumpReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(state) = self.current.as_mut() else {
            return Ok(0);
        };
        if state.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        if state.buf_pos >= state.buf_len {
            // Refill from the next data block. When this segment's hole map
            // runs out with bytes still owed, a TS_ADDR continuation record
            // follows in the stream.
            let present = loop {
                match state.blocks.pop_front() {
                    Some(p) => break p,
                    None => {
                        let record = read_record(&mut self.inner)?
                            .ok_or_else(|| other("archive ends inside file data"))?;
                        let segment = Segment::parse(&record).map_err(walk_to_io)?;
                        if segment.kind != TS_ADDR {
                            return Err(other("missing continuation segment"));
                        }
                        state.blocks = segment.addr;
                    }
                }
            };
            if present {
                let record =
                    read_record(&mut self.inner)?.ok_or_else(|| other("archive ends inside file data"))?;
                state.buf.copy_from_slice(&record);
            } else {
                state.buf.fill(0);
            }
            state.buf_pos = 0;
            state.buf_len = TP_BSIZE.min(state.remaining as usize);
        }

        let available = state.buf_len - state.buf_pos;
        let count = available.min(buf.len());
        buf[..count].copy_from_slice(&state.buf[state.buf_pos..state.buf_pos + count]);
        state.buf_pos += count;
        state.remaining -= count as u64;
        Ok(count)
    }
}

fn other(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("dump: {message}"))
}

fn walk_to_io(e: WalkError) -> io::Error {
    match e {
        WalkError::Io(io) | WalkError::ArchiveIo(io) => io,
        e => io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
    }
}

/// Reads one full record, or `None` at a clean EOF.
fn read_record<R: Read>(inner: &mut R) -> io::Result<Option<[u8; TP_BSIZE]>> {
    let mut record = [0u8; TP_BSIZE];
    let mut filled = 0;
    while filled < TP_BSIZE {
        let n = inner.read(&mut record[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(other("truncated record"));
        }
        filled += n;
    }
    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        kind: i32,
        ino: u32,
        mode: u16,
        size: u64,
        uid: u32,
        gid: u32,
        addr: &[u8],
    ) -> [u8; TP_BSIZE] {
        let mut r = [0u8; TP_BSIZE];
        r[0..4].copy_from_slice(&kind.to_le_bytes());
        r[20..24].copy_from_slice(&ino.to_le_bytes());
        r[24..28].copy_from_slice(&(NFS_MAGIC as i32).to_le_bytes());
        r[32..34].copy_from_slice(&mode.to_le_bytes());
        r[40..48].copy_from_slice(&size.to_le_bytes());
        r[48..52].copy_from_slice(&1_000_000i32.to_le_bytes()); // atime
        r[56..60].copy_from_slice(&2_000_000i32.to_le_bytes()); // mtime
        r[64..68].copy_from_slice(&3_000_000i32.to_le_bytes()); // ctime
        r[144..148].copy_from_slice(&uid.to_le_bytes());
        r[148..152].copy_from_slice(&gid.to_le_bytes());
        r[160..164].copy_from_slice(&(addr.len() as i32).to_le_bytes());
        r[164..164 + addr.len()].copy_from_slice(addr);

        // Make the 256 words sum to the checksum constant.
        let mut sum = 0i32;
        for word in 0..TP_BSIZE / 4 {
            sum = sum.wrapping_add(le32(&r, word * 4));
        }
        let fix = CHECKSUM.wrapping_sub(sum);
        r[28..32].copy_from_slice(&fix.to_le_bytes());
        r
    }

    fn direct(ino: u32, name: &str) -> Vec<u8> {
        let namlen = name.len();
        let reclen = (8 + namlen + 3) & !3;
        let mut d = Vec::new();
        d.extend_from_slice(&ino.to_le_bytes());
        d.extend_from_slice(&(reclen as u16).to_le_bytes());
        d.push(0); // d_type, unused here
        d.push(namlen as u8);
        d.extend_from_slice(name.as_bytes());
        while d.len() < reclen {
            d.push(0);
        }
        d
    }

    fn build_archive() -> Vec<u8> {
        let mut tape = Vec::new();
        tape.extend_from_slice(&record(TS_TAPE, 0, 0, 0, 0, 0, &[]));

        // Root directory (ino 2) naming one file.
        let mut root_data = direct(2, ".");
        root_data.extend_from_slice(&direct(2, ".."));
        root_data.extend_from_slice(&direct(5, "hello.txt"));
        let mut block = [0u8; TP_BSIZE];
        block[..root_data.len()].copy_from_slice(&root_data);
        tape.extend_from_slice(&record(
            TS_INODE,
            2,
            0o040755,
            root_data.len() as u64,
            0,
            0,
            &[1],
        ));
        tape.extend_from_slice(&block);

        // The file itself: one data block, one hole block.
        let mut data_block = [0u8; TP_BSIZE];
        data_block[..5].copy_from_slice(b"hello");
        tape.extend_from_slice(&record(
            TS_INODE,
            5,
            0o100644,
            (TP_BSIZE + 3) as u64,
            1000,
            100,
            &[1, 0],
        ));
        tape.extend_from_slice(&data_block);

        tape.extend_from_slice(&record(TS_END, 0, 0, 0, 0, 0, &[]));
        tape
    }

    #[test]
    fn reads_files_with_names_and_holes() {
        let tape = build_archive();
        let mut dump = DumpReader::new(tape.as_slice()).unwrap();

        let entry = dump.next_entry().unwrap().unwrap();
        assert_eq!(entry.path, "hello.txt");
        assert_eq!(entry.file_type(), FileType::RegularFile);
        assert_eq!(entry.uid, 1000);
        assert_eq!(entry.gid, 100);
        assert_eq!(entry.size, (TP_BSIZE + 3) as u64);

        let mut data = Vec::new();
        dump.read_to_end(&mut data).unwrap();
        assert_eq!(data.len(), TP_BSIZE + 3);
        assert_eq!(&data[..5], b"hello");
        // The second block was a hole.
        assert_eq!(&data[TP_BSIZE..], &[0, 0, 0]);

        assert!(dump.next_entry().unwrap().is_none());
    }

    #[test]
    fn whiteouts_resolve_from_the_dump_type_code() {
        let entry = DumpEntry {
            ino: 9,
            path: "gone".into(),
            mode: 0xe000,
            uid: 0,
            gid: 0,
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
        };
        assert_eq!(entry.file_type(), FileType::Whiteout);
    }

    #[test]
    fn bad_checksums_are_rejected() {
        let mut tape = build_archive();
        tape[30] ^= 0x55;
        assert!(DumpReader::new(tape.as_slice()).is_err());
    }
}
