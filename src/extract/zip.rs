//! Extraction of ZIP archives.
//!
//! ZIP is a random-access format: a central directory at the back of the
//! file tells us where everything lives, and each file is compressed
//! independently. The archive is memory-mapped (on-disk archives directly,
//! nested ones after a spill to a temporary file) and the central directory
//! walked from the mapping.
//!
//! Since a ZIP's metadata sits at the back, many formats are ZIP archives
//! prepended with other data — self-extracting archives put an executable
//! up front. Prepended data is tolerated here; all stored offsets are
//! corrected by the observed displacement.

use std::fs::File;
use std::io::Read;

use camino::Utf8Path;
use flate2::read::DeflateDecoder;
use log::{debug, trace};
use memmap2::Mmap;

use super::{demote_failure, resolve_entry_path, with_random_access, Extractor};
use crate::attr::{Attr, AttrValue, Attributes, ContainerFormat, DosAttributes, FileType, UnixPermissions};
use crate::crc::Crc32Reader;
use crate::formats::usize;
use crate::formats::zip::{
    find_eocdr, find_zip64_eocdr, CentralDirectoryEntry, EndOfCentralDirectory, LocalFileHeader,
    Zip64Eocdr, Zip64EocdrLocator, ZipEntry,
};
use crate::result::{WalkError, WalkResult};
use crate::walk::{EntrySource, WalkOperation};

pub struct ZipExtractor;

impl Extractor for ZipExtractor {
    fn extensions(&self) -> &'static [&'static str] {
        &["zip"]
    }

    fn modified_file_type(&self) -> FileType {
        FileType::Archive
    }

    fn extract(
        &self,
        op: &mut WalkOperation<'_>,
        extension: &str,
        fs_path: Option<&std::path::Path>,
        display_path: &Utf8Path,
        source: &mut EntrySource<'_>,
        archive_attr: &Attributes,
    ) -> WalkResult<()> {
        debug!("reading ZIP archive '{display_path}'");
        let result = with_random_access(extension, fs_path, source, |path| {
            let file = File::open(path).map_err(WalkError::ArchiveIo)?;
            let mapping = unsafe { Mmap::map(&file).map_err(WalkError::ArchiveIo)? };
            extract_mapped(op, display_path, &mapping)
        });
        demote_failure(op, display_path, archive_attr, result)
    }
}

fn extract_mapped(
    op: &mut WalkOperation<'_>,
    display_path: &Utf8Path,
    mapping: &[u8],
) -> WalkResult<()> {
    let catalog = ZipCatalog::open(mapping)?;
    for entry in &catalog.entries {
        let entry_path = resolve_entry_path(display_path, &entry.name);
        debug!("file in .zip: {entry_path}");

        let mut attr = Attributes::new();
        attr.put(
            Attr::InArchive,
            Some(AttrValue::Format(ContainerFormat::Zip)),
        );

        let mut mode = 0u32;
        if let Some(unix_mode) = entry.unix_mode() {
            mode = unix_mode;
            attr.put(
                Attr::UnixPermissions,
                Some(AttrValue::Permissions(UnixPermissions::from_mode(mode))),
            );
        }
        if let Some(field) = entry.dos_attribute_field() {
            attr.put(Attr::Dos, Some(AttrValue::Dos(DosAttributes::from_field(field))));
        }

        attr.put(Attr::Size, Some(AttrValue::Size(entry.size)));
        attr.put(
            Attr::LastModifiedTime,
            Some(AttrValue::Time(entry.last_modified)),
        );
        if let Some(accessed) = entry.last_accessed {
            attr.put(Attr::LastAccessTime, Some(AttrValue::Time(accessed)));
        }
        if let Some(created) = entry.created {
            attr.put(Attr::CreationTime, Some(AttrValue::Time(created)));
        }
        if let Some(uid) = entry.uid {
            attr.put(Attr::UserId, Some(AttrValue::Id(uid)));
        }
        if let Some(gid) = entry.gid {
            attr.put(Attr::GroupId, Some(AttrValue::Id(gid)));
        }
        if let Some(comment) = &entry.comment {
            attr.put(Attr::Comment, Some(AttrValue::Text(comment.clone())));
        }
        attr.put(Attr::Checksum, Some(AttrValue::Checksum(u64::from(entry.crc32))));

        let entry_type = if entry.is_dir() {
            FileType::Directory
        } else if entry.is_unix_symlink() {
            FileType::SymbolicLink
        } else if mode != 0 {
            // If a UNIX mode exists, it may carry a file type itself.
            FileType::from_mode(mode)
        } else {
            FileType::RegularFile
        };
        attr.put(Attr::Type, Some(AttrValue::Type(entry_type)));

        match catalog.reader_for(entry) {
            Ok(Some(mut reader)) => {
                op.filter_archive_entry(
                    &entry_path,
                    &mut EntrySource::Stream(&mut reader),
                    attr,
                )?;
            }
            Ok(None) => {
                op.filter_archive_entry(&entry_path, &mut EntrySource::None, attr)?;
            }
            Err(e) => {
                let mut source = EntrySource::Unavailable(format!(
                    "cannot read '{}' from '{}': {e}",
                    entry.name, display_path
                ));
                op.filter_archive_entry(&entry_path, &mut source, attr)?;
            }
        }
    }
    Ok(())
}

/// A parsed central directory over a mapped archive.
struct ZipCatalog<'a> {
    /// The archive, starting at its real first byte (any prepended data
    /// stripped off).
    mapping: &'a [u8],
    entries: Vec<ZipEntry>,
}

impl<'a> ZipCatalog<'a> {
    /// Locates and parses the central directory.
    fn open(mut mapping: &'a [u8]) -> WalkResult<ZipCatalog<'a>> {
        let eocdr_posit = find_eocdr(mapping)?;
        let eocdr = EndOfCentralDirectory::parse(&mapping[eocdr_posit..])?;
        trace!("{eocdr:?}");

        if eocdr.disk_number != eocdr.disk_with_central_directory {
            return Err(WalkError::UnsupportedArchive(format!(
                "no support for multi-disk archives: disk ({}) != disk with central directory ({})",
                eocdr.disk_number, eocdr.disk_with_central_directory
            )));
        }
        if eocdr.entries != eocdr.entries_on_this_disk {
            return Err(WalkError::UnsupportedArchive(format!(
                "no support for multi-disk archives: entries ({}) != entries this disk ({})",
                eocdr.entries, eocdr.entries_on_this_disk
            )));
        }

        let nominal_central_directory_offset: u64;
        let entry_count: u64;

        // ZIP files can be prepended by arbitrary junk, so all the stored
        // positions might be off. Work out the displacement.
        let archive_offset;

        let locator_posit = eocdr_posit.checked_sub(Zip64EocdrLocator::size_in_file());
        let zip64_locator = locator_posit.and_then(|p| Zip64EocdrLocator::parse(&mapping[p..]));
        if let Some(locator) = zip64_locator {
            trace!("{locator:?}");

            if u32::from(eocdr.disk_number) != locator.disk_with_central_directory {
                return Err(WalkError::UnsupportedArchive(format!(
                    "no support for multi-disk archives: disk ({}) != disk with zip64 central directory ({})",
                    eocdr.disk_number, locator.disk_with_central_directory
                )));
            }
            if locator.disks != 1 {
                return Err(WalkError::UnsupportedArchive(format!(
                    "no support for multi-disk archives: Zip64 EOCDR locator reports {} disks",
                    locator.disks
                )));
            }

            // Search for the Zip64 EOCDR from its nominal position to the
            // end of where it could be. Since the search starts at the
            // stored offset, the position found *is* the displacement.
            let search_start = usize(locator.zip64_eocdr_offset)?;
            let search_end = locator_posit.ok_or_else(|| {
                WalkError::InvalidArchive(
                    "zip",
                    "Too small for Zip64 End Of Central Directory Record".to_owned(),
                )
            })?;
            if search_start > search_end {
                return Err(WalkError::InvalidArchive(
                    "zip",
                    "Zip64 End Of Central Directory Record offset out of range".to_owned(),
                ));
            }
            let search_space = &mapping[search_start..search_end];

            let zip64_eocdr_posit = find_zip64_eocdr(search_space)?;
            archive_offset = zip64_eocdr_posit;
            let zip64_eocdr = Zip64Eocdr::parse(&search_space[zip64_eocdr_posit..])?;
            trace!("{zip64_eocdr:?}");

            if zip64_eocdr.disk_number != zip64_eocdr.disk_with_central_directory
                || zip64_eocdr.entries != zip64_eocdr.entries_on_this_disk
            {
                return Err(WalkError::UnsupportedArchive(
                    "no support for multi-disk archives (zip64)".to_owned(),
                ));
            }

            nominal_central_directory_offset = zip64_eocdr.central_directory_offset;
            entry_count = zip64_eocdr.entries;
        } else {
            // The displacement is the actual position versus the stored one.
            let actual_posit = eocdr_posit.checked_sub(usize(eocdr.central_directory_size)?);
            let nominal_offset = usize(eocdr.central_directory_offset)?;
            archive_offset = actual_posit
                .and_then(|off| off.checked_sub(nominal_offset))
                .ok_or_else(|| {
                    WalkError::InvalidArchive(
                        "zip",
                        "Invalid central directory size or offset".to_owned(),
                    )
                })?;
            nominal_central_directory_offset = eocdr.central_directory_offset.into();
            entry_count = eocdr.entries.into();
        }

        mapping = &mapping[archive_offset..];
        trace!("{entry_count} entries at nominal offset {nominal_central_directory_offset}");

        let cd_start = usize(nominal_central_directory_offset)?;
        if cd_start > mapping.len() {
            return Err(WalkError::InvalidArchive(
                "zip",
                "Central directory offset out of range".to_owned(),
            ));
        }
        let mut central_directory = &mapping[cd_start..];

        let mut entries = Vec::with_capacity(usize(entry_count)?.min(1 << 16));
        for _ in 0..entry_count {
            let dir_entry = CentralDirectoryEntry::parse_and_consume(&mut central_directory)?;
            trace!("{dir_entry:?}");

            let entry = ZipEntry::from_central_directory(&dir_entry)?;
            debug!("{entry:?}");
            entries.push(entry);
        }

        Ok(ZipCatalog { mapping, entries })
    }

    /// Builds a decompressing reader for one entry's payload.
    ///
    /// `Ok(None)` means the entry has no payload of its own (a directory).
    /// Failure covers encryption and unsupported compression methods; the
    /// entry is still reportable, just not readable.
    fn reader_for(&self, entry: &ZipEntry) -> WalkResult<Option<Box<dyn Read + 'a>>> {
        if entry.is_dir() {
            return Ok(None);
        }
        if entry.encrypted {
            return Err(WalkError::UnsupportedArchive(format!(
                "can't read encrypted file '{}'",
                entry.name
            )));
        }

        let header_start = usize(entry.header_offset)?;
        if header_start > self.mapping.len() {
            return Err(WalkError::InvalidArchive(
                "zip",
                "Local header offset out of range".to_owned(),
            ));
        }
        let mut file_slice = &self.mapping[header_start..];
        let local_header = LocalFileHeader::parse_and_consume(&mut file_slice)?;
        trace!("{local_header:?}");
        if local_header.compression_method != entry.method
            || local_header.path != entry.name.as_bytes()
        {
            debug!(
                "local file header disagrees with the central directory for '{}'",
                entry.name
            );
        }

        let compressed_size = usize(entry.compressed_size)?;
        if compressed_size > file_slice.len() {
            return Err(WalkError::InvalidArchive(
                "zip",
                "Entry data runs past the end of the archive".to_owned(),
            ));
        }
        let data = &file_slice[..compressed_size];

        // 4.4.5: compression method. Deflate is near-universal; stored and
        // bzip2 turn up often enough to matter.
        let reader: Box<dyn Read + 'a> = match entry.method {
            0 => Box::new(Crc32Reader::new(data, entry.crc32)),
            8 => Box::new(Crc32Reader::new(DeflateDecoder::new(data), entry.crc32)),
            12 => Box::new(Crc32Reader::new(
                bzip2::read::BzDecoder::new(data),
                entry.crc32,
            )),
            other => {
                return Err(WalkError::UnsupportedArchive(format!(
                    "compression method {other} is not supported (entry '{}')",
                    entry.name
                )))
            }
        };
        Ok(Some(reader))
    }
}
