//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here, and the walk-facing extractor in
//! `extract::zip`. Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT

use chrono::{DateTime, Utc};
use codepage_437::{BorrowFromCp437, CP437_CONTROL};
use memchr::memmem;

use super::{msdos_datetime, read_u16, read_u32, read_u64, unix_timestamp};
use crate::result::{WalkError, WalkResult};

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

fn invalid(reason: &'static str) -> WalkError {
    WalkError::InvalidArchive("zip", reason.to_owned())
}

/// The OS family a file in the archive was compressed on.
/// Used to decode additional metadata like permissions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ZipPlatform {
    Dos,
    Unix,
    Unknown,
}

impl ZipPlatform {
    pub(crate) fn from_version_made_by(version: u16) -> ZipPlatform {
        // 4.4.2.1 The upper byte indicates the compatibility of the file
        // attribute information. If the external file attributes are
        // compatible with MS-DOS and can be read by PKZIP for DOS version
        // 2.04g then this value will be zero.
        //
        // 4.4.2.2 The current mappings are:
        //
        //  0 - MS-DOS and OS/2 (FAT / VFAT / FAT32 file systems)
        //  3 - UNIX            19 - OS X (Darwin)   [and many others]
        match version >> 8 {
            0 | 14 => ZipPlatform::Dos,
            3 | 19 => ZipPlatform::Unix,
            _ => ZipPlatform::Unknown,
        }
    }
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive; provides offsets for finding the
/// central directory, along with lots of stuff that stopped being relevant
/// when we stopped breaking ZIP archives onto multiple floppies.
#[derive(Debug)]
pub(crate) struct EndOfCentralDirectory<'a> {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    #[allow(dead_code)]
    pub file_comment: &'a [u8],
}

impl<'a> EndOfCentralDirectory<'a> {
    pub(crate) fn parse(mut eocdr: &'a [u8]) -> WalkResult<Self> {
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

        // Assert the magic instead of checking for it
        // because the search should have found it.
        debug_assert_eq!(eocdr[..4], EOCDR_MAGIC);
        if eocdr.len() < 22 {
            return Err(invalid("Truncated End Of Central Directory Record"));
        }
        eocdr = &eocdr[4..];
        let disk_number = read_u16(&mut eocdr);
        let disk_with_central_directory = read_u16(&mut eocdr);
        let entries_on_this_disk = read_u16(&mut eocdr);
        let entries = read_u16(&mut eocdr);
        let central_directory_size = read_u32(&mut eocdr);
        let central_directory_offset = read_u32(&mut eocdr);
        let comment_length = usize::from(read_u16(&mut eocdr));
        if eocdr.len() < comment_length {
            return Err(invalid("Truncated End Of Central Directory Record"));
        }
        let file_comment = &eocdr[..comment_length];

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

/// Searches backward through `mapping` to find the
/// End of central directory record.
///
/// It should be right at the end of the file,
/// but its variable size means we can't jump to a known offset.
pub(crate) fn find_eocdr(mapping: &[u8]) -> WalkResult<usize> {
    memmem::rfind(mapping, &EOCDR_MAGIC)
        .ok_or_else(|| invalid("Couldn't find End Of Central Directory Record"))
}

/// Data from the Zip64 end of central directory locator
///
/// On Zip64 files this immediately precedes the End of central directory
/// record and tells us where to find the Zip64 end of central directory.
#[derive(Debug)]
pub(crate) struct Zip64EocdrLocator {
    pub disk_with_central_directory: u32,
    pub zip64_eocdr_offset: u64,
    pub disks: u32,
}

impl Zip64EocdrLocator {
    pub(crate) fn parse(mut mapping: &[u8]) -> Option<Self> {
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
        if mapping.len() < Self::size_in_file() || mapping[..4] != ZIP64_EOCDR_LOCATOR_MAGIC {
            return None;
        }
        mapping = &mapping[4..];
        let disk_with_central_directory = read_u32(&mut mapping);
        let zip64_eocdr_offset = read_u64(&mut mapping);
        let disks = read_u32(&mut mapping);

        Some(Self {
            disk_with_central_directory,
            zip64_eocdr_offset,
            disks,
        })
    }

    pub(crate) fn size_in_file() -> usize {
        20
    }
}

/// Data from the Zip64 end of central directory record
#[derive(Debug)]
pub(crate) struct Zip64Eocdr {
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub entries_on_this_disk: u64,
    pub entries: u64,
    #[allow(dead_code)]
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
}

impl Zip64Eocdr {
    pub(crate) fn parse(mut eocdr: &[u8]) -> WalkResult<Self> {
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
        debug_assert_eq!(eocdr[..4], ZIP64_EOCDR_MAGIC);
        if eocdr.len() < 56 {
            return Err(invalid("Truncated Zip64 End Of Central Directory Record"));
        }
        eocdr = &eocdr[4..];
        let _eocdr_size = read_u64(&mut eocdr);
        let _source_version = read_u16(&mut eocdr);
        let _minimum_extract_version = read_u16(&mut eocdr);
        let disk_number = read_u32(&mut eocdr);
        let disk_with_central_directory = read_u32(&mut eocdr);
        let entries_on_this_disk = read_u64(&mut eocdr);
        let entries = read_u64(&mut eocdr);
        let central_directory_size = read_u64(&mut eocdr);
        let central_directory_offset = read_u64(&mut eocdr);

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
/// The slice should start at the Zip64 EOCDR's nominal location, but we
/// might have to search since ZIP archives can have arbitrary junk up front.
pub(crate) fn find_zip64_eocdr(mapping: &[u8]) -> WalkResult<usize> {
    memmem::find(mapping, &ZIP64_EOCDR_MAGIC)
        .ok_or_else(|| invalid("Couldn't find Zip64 End Of Central Directory Record"))
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumed to be CP437.
fn is_utf8(flags: u16) -> bool {
    // Bit 11: Language encoding flag (EFS).  If this bit is set,
    //         the filename and comment fields for this file
    //         MUST be encoded using UTF-8. (see APPENDIX D)
    flags & (1 << 11) != 0
}

/// Extracts the "is this file encrypted?" bit from the 16-bit flags field.
fn is_encrypted(flags: u16) -> bool {
    // Bit 0: If set, indicates that the file is encrypted
    flags & 1 != 0
}

fn decode_text(bytes: &[u8], utf8: bool) -> WalkResult<String> {
    if utf8 {
        Ok(std::str::from_utf8(bytes)?.to_owned())
    } else {
        let text: std::borrow::Cow<'_, str> = std::borrow::Cow::borrow_from_cp437(bytes, &CP437_CONTROL);
        Ok(text.into_owned())
    }
}

/// Per-entry metadata assembled from a central directory entry and its
/// extra fields.
#[derive(Debug, Clone)]
pub(crate) struct ZipEntry {
    /// The path as stored: '/'-separated, trailing '/' on directories.
    pub name: String,
    /// Uncompressed size in bytes
    pub size: u64,
    /// Compressed size in bytes
    pub compressed_size: u64,
    /// Raw compression method code (0 = stored, 8 = deflate, 12 = bzip2)
    pub method: u16,
    /// CRC-32 of the decompressed payload
    pub crc32: u32,
    /// True if the entry is encrypted (decryption is unsupported)
    pub encrypted: bool,
    /// Platform the external attributes speak for
    pub platform: ZipPlatform,
    /// Raw external file attributes
    pub external_attributes: u32,
    /// Modification time; an extended-timestamp field wins over MS-DOS
    pub last_modified: DateTime<Utc>,
    /// Access time, when an extended-timestamp field provides one
    pub last_accessed: Option<DateTime<Utc>>,
    /// Creation time, when an extended-timestamp field provides one
    pub created: Option<DateTime<Utc>>,
    /// Owner/group IDs from the Info-ZIP "new UNIX" field
    pub uid: Option<u64>,
    pub gid: Option<u64>,
    /// Entry comment, when non-empty
    pub comment: Option<String>,
    /// Offset of the local file header in the archive
    pub header_offset: u64,
}

impl ZipEntry {
    /// Builds entry metadata from a central directory entry.
    pub(crate) fn from_central_directory(cde: &CentralDirectoryEntry<'_>) -> WalkResult<ZipEntry> {
        let utf8 = is_utf8(cde.flags);
        let name = decode_text(cde.path, utf8)?;

        if cde.disk_number != 0 {
            return Err(WalkError::UnsupportedArchive(format!(
                "no support for multi-disk archives: file '{}' claims to be on disk {}",
                name, cde.disk_number,
            )));
        }

        let comment = if cde.file_comment.is_empty() {
            None
        } else {
            Some(decode_text(cde.file_comment, utf8)?)
        };

        let mut entry = ZipEntry {
            name,
            size: u64::from(cde.uncompressed_size),
            compressed_size: u64::from(cde.compressed_size),
            method: cde.compression_method,
            crc32: cde.crc32,
            encrypted: is_encrypted(cde.flags),
            platform: ZipPlatform::from_version_made_by(cde.source_version),
            external_attributes: cde.external_file_attributes,
            last_modified: msdos_datetime(cde.last_modified_date, cde.last_modified_time),
            last_accessed: None,
            created: None,
            uid: None,
            gid: None,
            comment,
            header_offset: u64::from(cde.header_offset),
        };

        parse_extra_field(&mut entry, cde.extra_field)?;
        Ok(entry)
    }

    /// The UNIX mode word, if the entry carries one.
    ///
    /// This library does _not_ try to convert DOS attribute bits into
    /// roughly-equivalent UNIX modes or do other cross-OS handwaving.
    pub(crate) fn unix_mode(&self) -> Option<u32> {
        // 4.4.15: The mapping of the external attributes is host-system
        // dependent. On UNIX hosts the mode lives in the high 16 bits.
        match self.platform {
            ZipPlatform::Unix => Some(self.external_attributes >> 16),
            _ => None,
        }
    }

    /// The DOS attribute byte, for entries written on DOS-family hosts.
    pub(crate) fn dos_attribute_field(&self) -> Option<u32> {
        match self.platform {
            ZipPlatform::Dos => Some(self.external_attributes & 0xff),
            _ => None,
        }
    }

    pub(crate) fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    pub(crate) fn is_unix_symlink(&self) -> bool {
        matches!(self.unix_mode(), Some(mode) if mode & 0xf000 == 0xa000)
    }
}

/// Data from a central directory entry
///
/// Each of these records contains information about one file or folder
/// stored in the ZIP archive.
#[derive(Debug)]
pub(crate) struct CentralDirectoryEntry<'a> {
    pub source_version: u16,
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
    pub file_comment: &'a [u8],
}

impl<'a> CentralDirectoryEntry<'a> {
    pub(crate) fn parse_and_consume(entry: &mut &'a [u8]) -> WalkResult<Self> {
        // 4.3.12  Central directory structure:
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
        if entry.len() < 46 || entry[..4] != CENTRAL_DIRECTORY_MAGIC {
            return Err(invalid("Invalid central directory entry"));
        }
        *entry = &entry[4..];
        let source_version = read_u16(entry);
        let _minimum_extract_version = read_u16(entry);
        let flags = read_u16(entry);
        let compression_method = read_u16(entry);
        let last_modified_time = read_u16(entry);
        let last_modified_date = read_u16(entry);
        let crc32 = read_u32(entry);
        let compressed_size = read_u32(entry);
        let uncompressed_size = read_u32(entry);
        let path_length = usize::from(read_u16(entry));
        let extra_field_length = usize::from(read_u16(entry));
        let file_comment_length = usize::from(read_u16(entry));
        let disk_number = read_u16(entry);
        let _internal_file_attributes = read_u16(entry);
        let external_file_attributes = read_u32(entry);
        let header_offset = read_u32(entry);
        if entry.len() < path_length + extra_field_length + file_comment_length {
            return Err(invalid("Truncated central directory entry"));
        }
        let (path, remaining) = entry.split_at(path_length);
        let (extra_field, remaining) = remaining.split_at(extra_field_length);
        let (file_comment, remaining) = remaining.split_at(file_comment_length);
        *entry = remaining;

        Ok(Self {
            source_version,
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
            file_comment,
        })
    }
}

/// Parses the "extra fields" found in central directory entries.
///
/// We care about Zip64 data (64-bit sizes and offsets), the extended
/// timestamp field, and the Info-ZIP "new UNIX" owner field.
fn parse_extra_field(entry: &mut ZipEntry, mut extra_field: &[u8]) -> WalkResult<()> {
    // 4.5.1 ... the following structure MUST be used for all programs
    // storing data in this field:
    //
    //     header1+data1 + header2+data2 . . .
    //
    // Each header MUST consist of:
    //
    //     Header ID - 2 bytes
    //     Data Size - 2 bytes
    while extra_field.len() >= 4 {
        let kind = read_u16(&mut extra_field);
        let field_len = usize::from(read_u16(&mut extra_field));
        if extra_field.len() < field_len {
            return Err(invalid("Truncated extra field"));
        }
        let (mut data, rest) = extra_field.split_at(field_len);
        extra_field = rest;

        match kind {
            // Zip64 extended information extra field.
            // Fields are present only when the 32-bit value overflowed.
            0x0001 => {
                if entry.size == u64::from(u32::MAX) && data.len() >= 8 {
                    entry.size = read_u64(&mut data);
                }
                if entry.compressed_size == u64::from(u32::MAX) && data.len() >= 8 {
                    entry.compressed_size = read_u64(&mut data);
                }
                if entry.header_offset == u64::from(u32::MAX) && data.len() >= 8 {
                    entry.header_offset = read_u64(&mut data);
                }
            }
            // Extended timestamp (Info-ZIP "UT"): a flags byte, then UNIX
            // seconds for each time whose flag bit is set. The central
            // directory copy usually carries only the modification time,
            // whatever the flags promise, so stop at the data we have.
            0x5455 => {
                if data.is_empty() {
                    continue;
                }
                let flags = data[0];
                data = &data[1..];
                if flags & 0x01 != 0 && data.len() >= 4 {
                    entry.last_modified = unix_timestamp(i64::from(read_u32(&mut data) as i32));
                }
                if flags & 0x02 != 0 && data.len() >= 4 {
                    entry.last_accessed =
                        Some(unix_timestamp(i64::from(read_u32(&mut data) as i32)));
                }
                if flags & 0x04 != 0 && data.len() >= 4 {
                    entry.created = Some(unix_timestamp(i64::from(read_u32(&mut data) as i32)));
                }
            }
            // Info-ZIP New Unix ("ux"): version, then variable-width UID
            // and GID, little-endian.
            0x7875 => {
                if data.len() < 2 {
                    continue;
                }
                let _version = data[0];
                let uid_len = usize::from(data[1]);
                data = &data[2..];
                if data.len() < uid_len + 1 {
                    continue;
                }
                entry.uid = Some(int_of_width(&data[..uid_len]));
                let gid_len = usize::from(data[uid_len]);
                data = &data[uid_len + 1..];
                if data.len() < gid_len {
                    continue;
                }
                entry.gid = Some(int_of_width(&data[..gid_len]));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Little-endian integer of 1..=8 bytes, as the "ux" field stores IDs.
fn int_of_width(bytes: &[u8]) -> u64 {
    let mut value = 0u64;
    for (i, b) in bytes.iter().take(8).enumerate() {
        value |= u64::from(*b) << (8 * i);
    }
    value
}

/// Data from a local file header
///
/// Each file's contents are preceded by one of these. They allow streaming
/// decompression without the central directory, but we only use them to
/// find where the payload starts.
#[derive(Debug)]
pub(crate) struct LocalFileHeader<'a> {
    #[allow(dead_code)]
    pub flags: u16,
    pub compression_method: u16,
    #[allow(dead_code)]
    pub crc32: u32,
    pub path: &'a [u8],
    #[allow(dead_code)]
    pub extra_field: &'a [u8],
}

impl<'a> LocalFileHeader<'a> {
    pub(crate) fn parse_and_consume(header: &mut &'a [u8]) -> WalkResult<Self> {
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
        if header.len() < 30 || header[..4] != LOCAL_FILE_HEADER_MAGIC {
            return Err(invalid("Invalid local file header"));
        }
        *header = &header[4..];
        let _minimum_extract_version = read_u16(header);
        let flags = read_u16(header);
        let compression_method = read_u16(header);
        let _last_modified_time = read_u16(header);
        let _last_modified_date = read_u16(header);
        let crc32 = read_u32(header);
        let _compressed_size = read_u32(header);
        let _uncompressed_size = read_u32(header);
        let path_length = usize::from(read_u16(header));
        let extra_field_length = usize::from(read_u16(header));
        if header.len() < path_length + extra_field_length {
            return Err(invalid("Truncated local file header"));
        }
        let (path, remaining) = header.split_at(path_length);
        let (extra_field, remaining) = remaining.split_at(extra_field_length);
        *header = remaining;

        Ok(Self {
            flags,
            compression_method,
            crc32,
            path,
            extra_field,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_entry() -> ZipEntry {
        ZipEntry {
            name: "f".to_owned(),
            size: 1,
            compressed_size: 1,
            method: 0,
            crc32: 0,
            encrypted: false,
            platform: ZipPlatform::Unknown,
            external_attributes: 0,
            last_modified: unix_timestamp(0),
            last_accessed: None,
            created: None,
            uid: None,
            gid: None,
            comment: None,
            header_offset: 0,
        }
    }

    #[test]
    fn platform_codes() {
        assert_eq!(ZipPlatform::from_version_made_by(0x0014), ZipPlatform::Dos);
        assert_eq!(ZipPlatform::from_version_made_by(0x0314), ZipPlatform::Unix);
        assert_eq!(
            ZipPlatform::from_version_made_by(0x0714),
            ZipPlatform::Unknown
        );
    }

    #[test]
    fn unix_mode_and_symlinks() {
        let mut entry = bare_entry();
        entry.platform = ZipPlatform::Unix;
        entry.external_attributes = 0o120777 << 16;
        assert_eq!(entry.unix_mode(), Some(0o120777));
        assert!(entry.is_unix_symlink());
        assert!(!entry.is_dir());

        entry.platform = ZipPlatform::Dos;
        assert_eq!(entry.unix_mode(), None);
        assert!(!entry.is_unix_symlink());
    }

    #[test]
    fn extended_timestamp_field() {
        let mut entry = bare_entry();
        // "UT", 5 bytes, mtime only
        let mut field = Vec::new();
        field.extend_from_slice(&0x5455u16.to_le_bytes());
        field.extend_from_slice(&5u16.to_le_bytes());
        field.push(0x01);
        field.extend_from_slice(&1_600_000_000u32.to_le_bytes());
        parse_extra_field(&mut entry, &field).unwrap();
        assert_eq!(entry.last_modified, unix_timestamp(1_600_000_000));
        assert_eq!(entry.last_accessed, None);
    }

    #[test]
    fn info_zip_unix_ids() {
        let mut entry = bare_entry();
        // "ux": version 1, 4-byte uid 1000, 4-byte gid 100
        let mut field = Vec::new();
        field.extend_from_slice(&0x7875u16.to_le_bytes());
        field.extend_from_slice(&11u16.to_le_bytes());
        field.push(1);
        field.push(4);
        field.extend_from_slice(&1000u32.to_le_bytes());
        field.push(4);
        field.extend_from_slice(&100u32.to_le_bytes());
        parse_extra_field(&mut entry, &field).unwrap();
        assert_eq!(entry.uid, Some(1000));
        assert_eq!(entry.gid, Some(100));
    }
}
