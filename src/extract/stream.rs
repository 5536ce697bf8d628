//! Extraction of sequential ("stream") archive formats: tar first and
//! foremost, plus ar, arj, cpio and dump.
//!
//! The non-tar formats are mostly of historical value; they also come with
//! sharp edges (ar has no directories, ARJ data is usually compressed with
//! methods nobody documents). For tar this extractor only handles the
//! uncompressed format; `.tar.gz` and friends pass through
//! [`super::SingleFileDecompressor`] first.
//!
//! All entries of one container share its underlying stream. The engine's
//! [`EntrySource::Stream`] hands consumers a bounded view of it, so a
//! consumer can neither read past its entry nor invalidate the stream for
//! the entries that follow.

use std::io::{BufReader, Read};

use camino::Utf8Path;
use log::{debug, warn};

use super::{demote_failure, resolve_entry_path, Extractor};
use crate::attr::{Attr, AttrValue, Attributes, ContainerFormat, FileType, UnixPermissions};
use crate::formats::ar::ArReader;
use crate::formats::arj::ArjReader;
use crate::formats::cpio::CpioReader;
use crate::formats::dump::DumpReader;
use crate::formats::{msdos_datetime, unix_timestamp};
use crate::result::{WalkError, WalkResult};
use crate::walk::{EntrySource, WalkOperation};

pub struct StreamArchiveExtractor;

impl Extractor for StreamArchiveExtractor {
    fn extensions(&self) -> &'static [&'static str] {
        &["a", "ar", "arj", "cpio", "dump", "tar"]
    }

    fn modified_file_type(&self) -> FileType {
        FileType::Archive
    }

    fn extract(
        &self,
        op: &mut WalkOperation<'_>,
        extension: &str,
        _fs_path: Option<&std::path::Path>,
        display_path: &Utf8Path,
        source: &mut EntrySource<'_>,
        archive_attr: &Attributes,
    ) -> WalkResult<()> {
        debug!("reading streamed archive '{display_path}'");

        let result = (|| {
            let reader = BufReader::new(source.open().map_err(WalkError::ArchiveIo)?);
            match extension.to_ascii_lowercase().as_str() {
                "tar" => extract_tar(op, display_path, reader),
                "a" | "ar" => extract_ar(op, display_path, reader),
                "arj" => extract_arj(op, display_path, reader),
                "cpio" => extract_cpio(op, display_path, reader),
                "dump" => extract_dump(op, display_path, reader),
                other => Err(WalkError::Config(format!(
                    "stream archive extractor cannot handle the extension '{other}'"
                ))),
            }
        })();
        demote_failure(op, display_path, archive_attr, result)
    }
}

fn extract_tar<R: Read>(
    op: &mut WalkOperation<'_>,
    display_path: &Utf8Path,
    reader: R,
) -> WalkResult<()> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries().map_err(WalkError::ArchiveIo)? {
        let mut entry = entry.map_err(WalkError::ArchiveIo)?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let entry_path = resolve_entry_path(display_path, &name);
        debug!("file in archive: {entry_path}");

        // PAX extended headers may carry sub-second access/creation times
        // that the ustar header cannot.
        let mut access_time = None;
        let mut creation_time = None;
        if let Ok(Some(pax)) = entry.pax_extensions() {
            for extension in pax.flatten() {
                match extension.key() {
                    Ok("atime") => access_time = parse_pax_seconds(extension.value_bytes()),
                    Ok("ctime") => creation_time = parse_pax_seconds(extension.value_bytes()),
                    _ => {}
                }
            }
        }

        let header = entry.header();
        let mut attr = Attributes::new();
        attr.put(
            Attr::InArchive,
            Some(AttrValue::Format(ContainerFormat::Tar)),
        );
        if let Ok(mtime) = header.mtime() {
            attr.put(
                Attr::LastModifiedTime,
                Some(AttrValue::Time(unix_timestamp(mtime as i64))),
            );
        }
        if let Ok(size) = header.size() {
            attr.put(Attr::Size, Some(AttrValue::Size(size)));
        }
        if let Ok(uid) = header.uid() {
            attr.put(Attr::UserId, Some(AttrValue::Id(uid)));
        }
        if let Ok(gid) = header.gid() {
            attr.put(Attr::GroupId, Some(AttrValue::Id(gid)));
        }
        if let Ok(Some(user)) = header.username() {
            if !user.is_empty() {
                attr.put(Attr::UserName, Some(AttrValue::Text(user.to_owned())));
            }
        }
        if let Ok(Some(group)) = header.groupname() {
            if !group.is_empty() {
                attr.put(Attr::GroupName, Some(AttrValue::Text(group.to_owned())));
            }
        }
        if let Ok(mode) = header.mode() {
            attr.put(
                Attr::UnixPermissions,
                Some(AttrValue::Permissions(UnixPermissions::from_mode(mode))),
            );
        }
        if let Some(gnu) = header.as_gnu() {
            if access_time.is_none() {
                access_time = gnu.atime().ok().map(|t| unix_timestamp(t as i64));
            }
            if creation_time.is_none() {
                creation_time = gnu.ctime().ok().map(|t| unix_timestamp(t as i64));
            }
        }
        if let Some(atime) = access_time {
            attr.put(Attr::LastAccessTime, Some(AttrValue::Time(atime)));
        }
        if let Some(ctime) = creation_time {
            attr.put(Attr::CreationTime, Some(AttrValue::Time(ctime)));
        }

        let kind = header.entry_type();
        let entry_type = if kind.is_dir() {
            FileType::Directory
        } else if kind.is_symlink() {
            FileType::SymbolicLink
        } else if kind.is_block_special() {
            FileType::BlockDevice
        } else if kind.is_character_special() {
            FileType::CharacterDevice
        } else if kind.is_fifo() {
            FileType::Fifo
        } else if kind.is_hard_link() {
            FileType::HardLink
        } else if kind.is_file() || kind.is_gnu_sparse() {
            FileType::RegularFile
        } else {
            FileType::Unknown
        };
        attr.put(Attr::Type, Some(AttrValue::Type(entry_type)));

        op.filter_archive_entry(&entry_path, &mut EntrySource::Stream(&mut entry), attr)?;
    }
    Ok(())
}

/// PAX stores times as decimal seconds, possibly fractional.
fn parse_pax_seconds(value: &[u8]) -> Option<chrono::DateTime<chrono::Utc>> {
    let text = std::str::from_utf8(value).ok()?;
    let seconds = text.parse::<f64>().ok()?;
    Some(unix_timestamp(seconds as i64))
}

fn extract_ar<R: Read>(
    op: &mut WalkOperation<'_>,
    display_path: &Utf8Path,
    reader: R,
) -> WalkResult<()> {
    let mut ar = ArReader::new(reader)?;
    while let Some(member) = ar.next_entry()? {
        let entry_path = resolve_entry_path(display_path, &member.name);
        debug!("file in archive: {entry_path}");

        let mut attr = Attributes::new();
        attr.put(Attr::InArchive, Some(AttrValue::Format(ContainerFormat::Ar)));
        attr.put(
            Attr::LastModifiedTime,
            Some(AttrValue::Time(unix_timestamp(member.mtime))),
        );
        attr.put(Attr::Size, Some(AttrValue::Size(member.size)));
        attr.put(Attr::UserId, Some(AttrValue::Id(u64::from(member.uid))));
        attr.put(Attr::GroupId, Some(AttrValue::Id(u64::from(member.gid))));
        attr.put(
            Attr::UnixPermissions,
            Some(AttrValue::Permissions(UnixPermissions::from_mode(
                member.mode,
            ))),
        );
        // ar has no directories; GNU ar stores the full mode word, so the
        // type nybble is the best classification available.
        attr.put(
            Attr::Type,
            Some(AttrValue::Type(FileType::from_mode(member.mode))),
        );

        op.filter_archive_entry(&entry_path, &mut EntrySource::Stream(&mut ar), attr)?;
    }
    Ok(())
}

fn extract_arj<R: Read>(
    op: &mut WalkOperation<'_>,
    display_path: &Utf8Path,
    reader: R,
) -> WalkResult<()> {
    let mut arj = ArjReader::new(reader)?;
    while let Some(entry) = arj.next_entry()? {
        let entry_path = resolve_entry_path(display_path, &entry.name);
        debug!("file in archive: {entry_path}");

        let mut attr = Attributes::new();
        attr.put(
            Attr::InArchive,
            Some(AttrValue::Format(ContainerFormat::Arj)),
        );
        attr.put(
            Attr::LastModifiedTime,
            Some(AttrValue::Time(msdos_datetime(
                entry.dos_date(),
                entry.dos_time(),
            ))),
        );
        attr.put(Attr::Size, Some(AttrValue::Size(entry.original_size)));
        attr.put(Attr::ArjHostOs, Some(AttrValue::ArjHost(entry.host_os)));
        if entry.host_os.is_unix() {
            attr.put(
                Attr::UnixPermissions,
                Some(AttrValue::Permissions(UnixPermissions::from_mode(
                    u32::from(entry.file_mode),
                ))),
            );
        }
        // ARJ does not use the mode's upper nybble for the file type, at
        // least not in the conventional UNIX fashion, so the directory flag
        // is all we classify from.
        let entry_type = if entry.is_directory {
            FileType::Directory
        } else {
            FileType::RegularFile
        };
        attr.put(Attr::Type, Some(AttrValue::Type(entry_type)));

        if entry.method == 0 {
            op.filter_archive_entry(&entry_path, &mut EntrySource::Stream(&mut arj), attr)?;
        } else {
            // Still report the entry; its bytes just aren't available.
            warn!("couldn't read '{entry_path}' from archive '{display_path}'");
            let mut source = EntrySource::Unavailable(format!(
                "ARJ compression method {} is not supported (entry '{}' in '{}')",
                entry.method, entry.name, display_path,
            ));
            op.filter_archive_entry(&entry_path, &mut source, attr)?;
        }
    }
    Ok(())
}

fn extract_cpio<R: Read>(
    op: &mut WalkOperation<'_>,
    display_path: &Utf8Path,
    reader: R,
) -> WalkResult<()> {
    let mut cpio = CpioReader::new(reader);
    while let Some(entry) = cpio.next_entry()? {
        let entry_path = resolve_entry_path(display_path, &entry.name);
        debug!("file in archive: {entry_path}");

        let mut attr = Attributes::new();
        attr.put(
            Attr::InArchive,
            Some(AttrValue::Format(ContainerFormat::Cpio)),
        );
        attr.put(
            Attr::LastModifiedTime,
            Some(AttrValue::Time(unix_timestamp(entry.mtime))),
        );
        attr.put(Attr::Size, Some(AttrValue::Size(entry.size)));
        attr.put(Attr::UserId, Some(AttrValue::Id(u64::from(entry.uid))));
        attr.put(Attr::GroupId, Some(AttrValue::Id(u64::from(entry.gid))));
        attr.put(
            Attr::UnixPermissions,
            Some(AttrValue::Permissions(UnixPermissions::from_mode(
                entry.mode,
            ))),
        );
        attr.put(Attr::Type, Some(AttrValue::Type(entry.file_type())));

        op.filter_archive_entry(&entry_path, &mut EntrySource::Stream(&mut cpio), attr)?;
    }
    Ok(())
}

fn extract_dump<R: Read>(
    op: &mut WalkOperation<'_>,
    display_path: &Utf8Path,
    reader: R,
) -> WalkResult<()> {
    let mut dump = DumpReader::new(reader)?;
    while let Some(entry) = dump.next_entry()? {
        let entry_path = resolve_entry_path(display_path, &entry.path);
        debug!("file in archive: {entry_path}");

        let mut attr = Attributes::new();
        attr.put(
            Attr::InArchive,
            Some(AttrValue::Format(ContainerFormat::Dump)),
        );
        attr.put(
            Attr::CreationTime,
            Some(AttrValue::Time(unix_timestamp(entry.ctime))),
        );
        attr.put(
            Attr::LastAccessTime,
            Some(AttrValue::Time(unix_timestamp(entry.atime))),
        );
        attr.put(
            Attr::LastModifiedTime,
            Some(AttrValue::Time(unix_timestamp(entry.mtime))),
        );
        attr.put(Attr::Size, Some(AttrValue::Size(entry.size)));
        attr.put(Attr::UserId, Some(AttrValue::Id(u64::from(entry.uid))));
        attr.put(Attr::GroupId, Some(AttrValue::Id(u64::from(entry.gid))));
        attr.put(
            Attr::UnixPermissions,
            Some(AttrValue::Permissions(UnixPermissions::from_mode(
                u32::from(entry.mode),
            ))),
        );
        // The dump type code distinguishes whiteouts, which a generic mode
        // lookup cannot.
        attr.put(Attr::Type, Some(AttrValue::Type(entry.file_type())));

        op.filter_archive_entry(&entry_path, &mut EntrySource::Stream(&mut dump), attr)?;
    }
    Ok(())
}
