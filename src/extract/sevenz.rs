//! Extraction of 7z archives, via the `sevenz-rust` crate.
//!
//! 7z has no streaming mode worth speaking of — solid blocks and the
//! trailing header require random access — so nested archives go through
//! the spill shim.
//!
//! A 7z quirk worth knowing: entries can be *anti-items*, deletion markers
//! used by incremental backup sets. They surface as
//! [`FileType::Whiteout`].

use std::io::Read;

use camino::Utf8Path;
use log::debug;
use sevenz_rust::{Password, SevenZReader};

use super::{demote_failure, resolve_entry_path, with_random_access, Extractor};
use crate::attr::{
    Attr, AttrValue, Attributes, ContainerFormat, DosAttributes, FileType, UnixPermissions,
};
use crate::formats::unix_timestamp;
use crate::result::{WalkError, WalkResult};
use crate::walk::{EntrySource, WalkOperation};

/// Seconds between the NT epoch (1601-01-01) and the UNIX epoch.
const NT_TO_UNIX_SECS: i64 = 11_644_473_600;

pub struct SevenZExtractor;

impl Extractor for SevenZExtractor {
    fn extensions(&self) -> &'static [&'static str] {
        &["7z"]
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
        debug!("reading 7Z archive '{display_path}'");
        let result = with_random_access(extension, fs_path, source, |path| {
            let mut archive = SevenZReader::open(path, Password::empty())
                .map_err(|e| WalkError::InvalidArchive("7z", e.to_string()))?;

            // Errors from the walk itself (an aborting consumer, say) must
            // come back out as themselves, not wrapped as archive trouble.
            let mut walk_error = None;
            let iteration = archive.for_each_entries(|entry, reader| {
                match process_entry(op, display_path, entry, reader) {
                    Ok(()) => Ok(true),
                    Err(e) => {
                        walk_error = Some(e);
                        Ok(false)
                    }
                }
            });
            if let Some(e) = walk_error {
                return Err(e);
            }
            iteration.map_err(|e| WalkError::InvalidArchive("7z", e.to_string()))?;
            Ok(())
        });
        demote_failure(op, display_path, archive_attr, result)
    }
}

fn process_entry(
    op: &mut WalkOperation<'_>,
    display_path: &Utf8Path,
    entry: &sevenz_rust::SevenZArchiveEntry,
    reader: &mut dyn Read,
) -> WalkResult<()> {
    let entry_path = resolve_entry_path(display_path, entry.name());
    debug!("entry in .7z: {entry_path}");

    let mut attr = Attributes::new();
    attr.put(
        Attr::InArchive,
        Some(AttrValue::Format(ContainerFormat::SevenZ)),
    );
    attr.put(Attr::Size, Some(AttrValue::Size(entry.size())));

    if entry.has_creation_date {
        attr.put(
            Attr::CreationTime,
            Some(AttrValue::Time(nt_timestamp(entry.creation_date.into()))),
        );
    }
    if entry.has_access_date {
        attr.put(
            Attr::LastAccessTime,
            Some(AttrValue::Time(nt_timestamp(entry.access_date.into()))),
        );
    }
    if entry.has_last_modified_date {
        attr.put(
            Attr::LastModifiedTime,
            Some(AttrValue::Time(nt_timestamp(
                entry.last_modified_date.into(),
            ))),
        );
    }
    if entry.has_crc {
        attr.put(Attr::Checksum, Some(AttrValue::Checksum(entry.crc)));
    }

    // The Windows attribute word does double duty: DOS flags in the low
    // byte, and (for archives written on UNIX) a full UNIX mode in the
    // upper 16 bits.
    let mut unix_mode = 0u32;
    if entry.has_windows_attributes {
        let windows = entry.windows_attributes;
        attr.put(Attr::Dos, Some(AttrValue::Dos(DosAttributes::from_field(windows))));
        unix_mode = windows >> 16;
        if unix_mode != 0 {
            attr.put(
                Attr::UnixPermissions,
                Some(AttrValue::Permissions(UnixPermissions::from_mode(unix_mode))),
            );
        }
    }

    let entry_type = if entry.is_anti_item() {
        FileType::Whiteout
    } else if entry.is_directory() {
        FileType::Directory
    } else if unix_mode & 0xf000 != 0 {
        FileType::from_mode(unix_mode)
    } else {
        FileType::RegularFile
    };
    attr.put(Attr::Type, Some(AttrValue::Type(entry_type)));

    if entry.is_directory() || entry.is_anti_item() {
        op.filter_archive_entry(&entry_path, &mut EntrySource::None, attr)
    } else {
        op.filter_archive_entry(&entry_path, &mut EntrySource::Stream(reader), attr)
    }
}

/// NT file times count 100 ns ticks from 1601-01-01.
fn nt_timestamp(ticks: u64) -> chrono::DateTime<chrono::Utc> {
    let seconds = (ticks / 10_000_000) as i64 - NT_TO_UNIX_SECS;
    unix_timestamp(seconds)
}
