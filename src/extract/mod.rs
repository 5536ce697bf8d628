//! Container extractors and the machinery they share.
//!
//! Each extractor claims a set of file extensions and, when the engine
//! meets a matching file, re-enters the engine for every entry the
//! container holds. Five are built in:
//!
//! * [`StreamArchiveExtractor`] — sequential formats (tar, ar, arj, cpio, dump)
//! * [`ZipExtractor`] — ZIP central directories
//! * [`SevenZExtractor`] — 7z
//! * [`RarExtractor`] — RAR, by shelling out to `unrar`
//! * [`SingleFileDecompressor`] — gzip, bzip2, xz, zstd and friends
//!
//! The formats agree on '/' as the in-archive directory separator: the ZIP
//! spec mandates forward slashes outright, the tar standard stores names
//! "separated by slashes", and 7z normalises to POSIX separators. The
//! remaining formats are UNIX-born and do the same.

mod decompress;
mod rar;
mod sevenz;
mod stream;
mod zip;

use std::io;
use std::path::Path as StdPath;

use camino::{Utf8Path, Utf8PathBuf};

pub use decompress::SingleFileDecompressor;
pub use rar::RarExtractor;
pub use sevenz::SevenZExtractor;
pub use stream::StreamArchiveExtractor;
pub use zip::ZipExtractor;

use crate::attr::{Attributes, FileType};
use crate::result::{WalkError, WalkResult};
use crate::walk::{EntrySource, WalkOperation};

/// A reader for one family of container formats.
///
/// `extract` must call back into the engine (via
/// [`WalkOperation::filter_entry`] or
/// [`WalkOperation::filter_archive_entry`]) once per contained entry;
/// nested containers recurse automatically from there.
pub trait Extractor {
    /// The file extensions this extractor should be applied to.
    /// Matching is case-insensitive; the matched extension is passed to
    /// `extract` in its original case.
    fn extensions(&self) -> &'static [&'static str];

    /// What a matching file reclassifies as: [`FileType::Archive`] or
    /// [`FileType::CompressedFile`].
    fn modified_file_type(&self) -> FileType;

    /// Walks the container's entries.
    ///
    /// `fs_path` is the container's on-disk location, absent when it arrived
    /// as a stream nested in another container. On container-level failure,
    /// implementations report through the engine's error handler and return
    /// the crate's skip signal, so the engine can fall back to treating the
    /// file as an ordinary leaf.
    fn extract(
        &self,
        op: &mut WalkOperation<'_>,
        extension: &str,
        fs_path: Option<&StdPath>,
        display_path: &Utf8Path,
        source: &mut EntrySource<'_>,
        archive_attr: &Attributes,
    ) -> WalkResult<()>;
}

/// The extractor set a fresh [`crate::Walker`] starts with.
pub(crate) fn default_extractors() -> Vec<Box<dyn Extractor>> {
    vec![
        Box::new(RarExtractor::new()),
        Box::new(SevenZExtractor),
        Box::new(SingleFileDecompressor::new()),
        Box::new(StreamArchiveExtractor),
        Box::new(ZipExtractor),
    ]
}

/// Runs `f` against an on-disk copy of the container.
///
/// Random-access formats (ZIP, 7Z, RAR) need to seek, which a stream nested
/// inside another container can't do. When no `fs_path` is available the
/// stream is spilled to a uniquely-named temporary file first; the file is
/// removed on every exit path, including panics, when the guard drops.
pub(crate) fn with_random_access<T>(
    extension: &str,
    fs_path: Option<&StdPath>,
    source: &mut EntrySource<'_>,
    f: impl FnOnce(&StdPath) -> WalkResult<T>,
) -> WalkResult<T> {
    match fs_path {
        Some(path) => f(path),
        None => {
            let mut spill = tempfile::Builder::new()
                .prefix("spelunk-")
                .suffix(&format!(".{}", extension.to_ascii_lowercase()))
                .tempfile()
                .map_err(WalkError::ArchiveIo)?;
            io::copy(
                &mut source.open().map_err(WalkError::ArchiveIo)?,
                spill.as_file_mut(),
            )
            .map_err(WalkError::ArchiveIo)?;
            f(spill.path())
        }
    }
}

/// Converts a container-level failure into the skip signal, after giving
/// the error handler its say. Failures that are *not* container-level
/// (a consumer bailing out, an aborting handler) pass through untouched.
pub(crate) fn demote_failure(
    op: &mut WalkOperation<'_>,
    display_path: &Utf8Path,
    archive_attr: &Attributes,
    result: WalkResult<()>,
) -> WalkResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_archive_failure() => {
            let message = format!("could not extract archive '{display_path}': {e}");
            op.handle_error(display_path, archive_attr, &message, Some(e))?;
            Err(WalkError::SkippedArchive)
        }
        Err(e) => Err(e),
    }
}

/// Splits a container entry name on '/' and appends the pieces to the
/// container's display path. Empty and "." segments vanish; ".." is kept
/// verbatim (reported paths never resolve it).
pub(crate) fn resolve_entry_path(base: &Utf8Path, name: &str) -> Utf8PathBuf {
    let mut path = base.to_path_buf();
    for segment in name.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        path.push(segment);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_paths_resolve_against_the_container() {
        let base = Utf8Path::new("box.zip");
        assert_eq!(resolve_entry_path(base, "a/b.txt"), "box.zip/a/b.txt");
        assert_eq!(resolve_entry_path(base, "dir/"), "box.zip/dir");
        assert_eq!(resolve_entry_path(base, "./x"), "box.zip/x");
        assert_eq!(resolve_entry_path(base, "a//b"), "box.zip/a/b");
    }

    #[test]
    fn default_set_covers_the_builtin_extensions() {
        let extractors = default_extractors();
        let mut extensions: Vec<&str> = extractors
            .iter()
            .flat_map(|e| e.extensions().iter().copied())
            .collect();
        extensions.sort_unstable();
        for expected in ["tar", "zip", "7z", "rar", "gz", "cpio", "arj", "dump", "a", "ar"] {
            assert!(extensions.contains(&expected), "missing {expected}");
        }
    }
}
