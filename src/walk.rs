//! The recursive traversal engine.
//!
//! Some moderately tangled recursion happens here. An outline:
//!
//! ```text
//! run()
//! |
//! +-- walk_fs_tree()               (walkdir over a directory)
//!     |
//!     +-- filter_entry()
//!         |
//!         +-- Extractor::extract()
//!         |   [various implementations]
//!         |   |
//!         |   +-- filter_entry()
//!         |   |   |
//!         |   |   ... [recurse]
//!         |   |or
//!         |   +-- walk_fs_tree()   (RAR's unpacked temp dir)
//!         |       |
//!         |       ... [recurse]
//!         |
//!         +-- consumer
//! ```
//!
//! `filter_entry` is the single chokepoint: every candidate — filesystem
//! file, directory, or archive member at any nesting depth — passes through
//! it for depth gating, exclusion checks, extractor dispatch and delivery.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path as StdPath;

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, error};

use crate::attr::{Attr, AttrValue, Attributes, FileType, UnixPermissions};
use crate::extract::Extractor;
use crate::result::{WalkError, WalkResult};
use crate::Walker;

/// Where an entry's bytes come from, if anywhere.
///
/// [`EntrySource::open`] hands out a reader that borrows the source, so the
/// borrow checker enforces the contract that the reader is only valid for
/// the duration of the consumer call. Entries inside sequential archives
/// share the enclosing archive's stream; the bounded `&mut` view keeps a
/// consumer from dragging it past the entry or tearing it down.
pub enum EntrySource<'a> {
    /// An on-disk file, opened anew for each request.
    Path(&'a StdPath),
    /// A bounded view of an enclosing archive's stream.
    Stream(&'a mut (dyn Read + 'a)),
    /// No byte stream at all (directories, sockets, whiteouts, ...).
    None,
    /// The containing archive reported the entry unreadable; `open` fails
    /// with this message.
    Unavailable(String),
}

impl EntrySource<'_> {
    /// Opens the entry for reading. May fail immediately (missing file,
    /// unreadable archive member) or on the first read.
    pub fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
        match self {
            EntrySource::Path(p) => Ok(Box::new(File::open(p)?)),
            EntrySource::Stream(r) => Ok(Box::new(&mut **r)),
            EntrySource::None => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "entry has no byte stream",
            )),
            EntrySource::Unavailable(message) => Err(io::Error::new(
                io::ErrorKind::Other,
                message.clone(),
            )),
        }
    }

    /// False for entries that are metadata-only.
    pub fn has_stream(&self) -> bool {
        !matches!(self, EntrySource::None)
    }
}

/// Receives each kept entry: `(display path, byte source, attributes)`.
/// Returning an error aborts the traversal.
pub type Consumer<'a> =
    dyn FnMut(&Utf8Path, &mut EntrySource<'_>, &Attributes) -> WalkResult<()> + 'a;

/// Receives each recoverable failure: `(display path, attributes, message,
/// cause)`. Returning `Ok` resumes the walk at the next sibling; returning
/// an error aborts.
pub type ErrorHandler<'a> =
    dyn FnMut(&Utf8Path, &Attributes, &str, Option<WalkError>) -> WalkResult<()> + 'a;

/// One traversal in flight: configuration, callbacks, and the state that
/// must not leak between walks (the exclusion memos). Extractors re-enter
/// the engine through [`WalkOperation::filter_entry`] and
/// [`WalkOperation::walk_fs_tree`].
pub struct WalkOperation<'w> {
    options: &'w Walker,
    registry: HashMap<String, &'w dyn Extractor>,
    consumer: &'w mut Consumer<'w>,
    on_error: &'w mut ErrorHandler<'w>,
    /// Display-path prefixes known to be excluded
    excluded_subpaths: HashSet<Utf8PathBuf>,
    /// Display-path prefixes known to have survived the exclusion patterns
    non_excluded_subpaths: HashSet<Utf8PathBuf>,
    root_depth: usize,
}

impl<'w> WalkOperation<'w> {
    pub(crate) fn new(
        options: &'w Walker,
        consumer: &'w mut Consumer<'w>,
        on_error: &'w mut ErrorHandler<'w>,
    ) -> WalkOperation<'w> {
        // The extension registry is rebuilt per walk, so mutating the
        // extractor set between walks takes effect without bookkeeping.
        let mut registry = HashMap::new();
        for extractor in &options.extractors {
            for extension in extractor.extensions() {
                registry.insert(extension.to_ascii_lowercase(), extractor.as_ref());
            }
        }
        WalkOperation {
            options,
            registry,
            consumer,
            on_error,
            excluded_subpaths: HashSet::new(),
            non_excluded_subpaths: HashSet::new(),
            root_depth: 0,
        }
    }

    pub(crate) fn run(&mut self, root: &Utf8Path) -> WalkResult<()> {
        self.root_depth = root.components().count();
        self.walk_fs_tree(root.as_std_path(), root, None)
    }

    /// Logs a failure and routes it to the installed error handler, whose
    /// verdict (continue or abort) is the return value.
    pub fn handle_error(
        &mut self,
        path: &Utf8Path,
        attr: &Attributes,
        message: &str,
        cause: Option<WalkError>,
    ) -> WalkResult<()> {
        match &cause {
            Some(e) => error!("{message}: {e}"),
            None => error!("{message}"),
        }
        (self.on_error)(path, attr, message, cause)
    }

    /// Walks a directory tree on the local filesystem, reporting every entry
    /// under a display prefix. Used for the walk root and again for trees
    /// that external tools unpack into temporary directories; `decorate`
    /// lets the latter stamp extra attributes (archive provenance) onto
    /// every entry.
    pub fn walk_fs_tree(
        &mut self,
        fs_root: &StdPath,
        display_root: &Utf8Path,
        decorate: Option<&dyn Fn(&mut Attributes)>,
    ) -> WalkResult<()> {
        let prefix_depth = display_root
            .components()
            .count()
            .saturating_sub(self.root_depth);

        let mut walk = walkdir::WalkDir::new(fs_root).follow_links(self.options.follow_links);
        if self.options.max_depth != usize::MAX {
            // Entries below this would only be dropped by the depth gate.
            walk = walk.max_depth(self.options.max_depth.saturating_sub(prefix_depth));
        }

        let mut iter = walk.into_iter();
        while let Some(next) = iter.next() {
            let dirent = match next {
                Ok(d) => d,
                Err(e) => {
                    let display = e
                        .path()
                        .and_then(|p| self.display_path_for(fs_root, display_root, p).ok())
                        .unwrap_or_else(|| display_root.to_owned());
                    self.handle_error(
                        &display,
                        &Attributes::new(),
                        &format!("cannot visit '{display}'"),
                        Some(WalkError::Io(e.into())),
                    )?;
                    continue;
                }
            };

            let display = match self.display_path_for(fs_root, display_root, dirent.path()) {
                Ok(d) => d,
                Err(e) => {
                    self.handle_error(
                        display_root,
                        &Attributes::new(),
                        "cannot represent a file name in the display path",
                        Some(e),
                    )?;
                    continue;
                }
            };

            let metadata = match dirent.metadata() {
                Ok(m) => m,
                Err(e) => {
                    self.handle_error(
                        &display,
                        &Attributes::new(),
                        &format!("cannot read attributes of '{display}'"),
                        Some(WalkError::Io(e.into())),
                    )?;
                    continue;
                }
            };

            if metadata.is_dir() {
                // Exclusions prune whole filesystem subtrees here; archive
                // entries get the same treatment from the per-entry prefix
                // check in filter_entry.
                if self.options.exclusions.iter().any(|m| m.matches(&display)) {
                    debug!("pruning excluded directory '{display}'");
                    self.excluded_subpaths.insert(display);
                    iter.skip_current_dir();
                    continue;
                }
                self.non_excluded_subpaths.insert(display.clone());

                let mut attr = self.read_fs_attributes(&metadata);
                if let Some(decorate) = decorate {
                    decorate(&mut attr);
                }
                self.filter_entry(
                    Some(dirent.path()),
                    &display,
                    &display,
                    &mut EntrySource::None,
                    attr,
                )?;
            } else {
                let mut attr = self.read_fs_attributes(&metadata);
                if let Some(decorate) = decorate {
                    decorate(&mut attr);
                }
                let fs_path = dirent.path();
                self.filter_entry(
                    Some(fs_path),
                    &display,
                    &display,
                    &mut EntrySource::Path(fs_path),
                    attr,
                )?;
            }
        }
        Ok(())
    }

    /// Derives an entry's display path: the path relative to the walked
    /// tree, appended to the tree's display prefix.
    fn display_path_for(
        &self,
        fs_root: &StdPath,
        display_root: &Utf8Path,
        entry: &StdPath,
    ) -> WalkResult<Utf8PathBuf> {
        let relative = entry.strip_prefix(fs_root).unwrap_or(entry);
        if relative.as_os_str().is_empty() {
            return Ok(display_root.to_owned());
        }
        let relative = Utf8Path::from_path(relative)
            .ok_or_else(|| WalkError::NonUtf8Path(relative.to_path_buf()))?;
        Ok(display_root.join(relative))
    }

    /// Assembles the attribute bundle for an on-disk entry.
    fn read_fs_attributes(&self, metadata: &std::fs::Metadata) -> Attributes {
        let mut attr = Attributes::new();

        if let Ok(created) = metadata.created() {
            attr.put(Attr::CreationTime, Some(AttrValue::Time(created.into())));
        }
        if let Ok(accessed) = metadata.accessed() {
            attr.put(Attr::LastAccessTime, Some(AttrValue::Time(accessed.into())));
        }
        if let Ok(modified) = metadata.modified() {
            attr.put(
                Attr::LastModifiedTime,
                Some(AttrValue::Time(modified.into())),
            );
        }
        attr.put(Attr::Size, Some(AttrValue::Size(metadata.len())));

        let file_type = metadata.file_type();
        let entry_type = if file_type.is_dir() {
            FileType::Directory
        } else if file_type.is_file() {
            FileType::RegularFile
        } else if file_type.is_symlink() {
            FileType::SymbolicLink
        } else {
            self.special_file_type(metadata)
        };
        attr.put(Attr::Type, Some(AttrValue::Type(entry_type)));

        #[cfg(unix)]
        if self.options.unix_attributes {
            use std::os::unix::fs::MetadataExt;
            attr.put(
                Attr::UnixPermissions,
                Some(AttrValue::Permissions(UnixPermissions::from_mode(
                    metadata.mode(),
                ))),
            );
            attr.put(Attr::UserId, Some(AttrValue::Id(u64::from(metadata.uid()))));
            attr.put(
                Attr::GroupId,
                Some(AttrValue::Id(u64::from(metadata.gid()))),
            );
        }

        #[cfg(windows)]
        if self.options.dos_attributes {
            use std::os::windows::fs::MetadataExt;
            attr.put(
                Attr::Dos,
                Some(AttrValue::Dos(crate::attr::DosAttributes::from_field(
                    metadata.file_attributes(),
                ))),
            );
        }

        attr
    }

    #[cfg(unix)]
    fn special_file_type(&self, metadata: &std::fs::Metadata) -> FileType {
        use std::os::unix::fs::MetadataExt;
        FileType::from_mode(metadata.mode())
    }

    #[cfg(not(unix))]
    fn special_file_type(&self, _metadata: &std::fs::Metadata) -> FileType {
        FileType::Unknown
    }

    /// Re-entry point for extractors whose entries have no separate match
    /// path or filesystem presence.
    pub fn filter_archive_entry(
        &mut self,
        display_path: &Utf8Path,
        source: &mut EntrySource<'_>,
        attr: Attributes,
    ) -> WalkResult<()> {
        self.filter_entry(None, display_path, display_path, source, attr)
    }

    /// Inspects one candidate entry: decides whether to report it, whether
    /// to recurse into it with an extractor, or whether to drop it.
    ///
    /// * `fs_path` — physical location, for extractors that want random
    ///   access; absent for entries inside containers.
    /// * `match_path` — the path patterns and extension lookup see. Usually
    ///   the display path, but a decompressor substitutes the virtual
    ///   uncompressed name here.
    /// * `display_path` — what the consumer sees.
    pub fn filter_entry(
        &mut self,
        fs_path: Option<&StdPath>,
        match_path: &Utf8Path,
        display_path: &Utf8Path,
        source: &mut EntrySource<'_>,
        mut attr: Attributes,
    ) -> WalkResult<()> {
        debug!("filtering '{display_path}' (match path '{match_path}')");

        let depth = display_path
            .components()
            .count()
            .saturating_sub(self.root_depth);
        if depth > self.options.max_depth {
            debug!("'{display_path}' exceeds max depth {}", self.options.max_depth);
            return Ok(());
        }

        // The filesystem walker already prunes excluded directories, but
        // containers emit their entries flat, so every prefix of the match
        // path is re-checked here. Both verdicts are memoised to spare the
        // matcher on runs of siblings; behaviour is identical without the
        // memos, just slower.
        let mut prefix = Utf8PathBuf::new();
        for component in match_path.components() {
            prefix.push(component.as_str());
            if self.non_excluded_subpaths.contains(&prefix) {
                continue;
            }
            let excluded = self.excluded_subpaths.contains(&prefix)
                || self.options.exclusions.iter().any(|m| m.matches(&prefix));
            if excluded {
                debug!("excluding '{match_path}': prefix '{prefix}' is excluded");
                self.excluded_subpaths.insert(prefix);
                return Ok(());
            }
            self.non_excluded_subpaths.insert(prefix.clone());
        }

        // Extension-based extractor assignment. Archive files are no longer
        // "regular files" for our purposes; they reclassify as ARCHIVE or
        // COMPRESSED_FILE. The extension keeps its original case for the
        // extractor itself (some formats are case-sensitive about it).
        let mut assigned: Option<(&dyn Extractor, &str)> = None;
        if attr.is_type(&[FileType::RegularFile]) {
            if let Some(extension) = match_path.extension() {
                if let Some(extractor) = self.registry.get(&extension.to_ascii_lowercase()) {
                    let extractor = *extractor;
                    attr.put(
                        Attr::Type,
                        Some(AttrValue::Type(extractor.modified_file_type())),
                    );
                    assigned = Some((extractor, extension));
                }
            }
        }

        let entry_type = attr.file_type().unwrap_or(FileType::Unknown);
        if self.options.shows_file_type(entry_type) {
            if self.options.inclusions.is_empty() {
                debug!("including '{display_path}' by default");
                (self.consumer)(display_path, source, &attr)?;
            } else if self
                .options
                .inclusions
                .iter()
                .any(|m| m.matches(match_path))
            {
                debug!("including '{display_path}' by pattern");
                (self.consumer)(display_path, source, &attr)?;
            } else {
                debug!("excluding '{display_path}': no inclusion matches");
            }
        } else {
            debug!("excluding '{display_path}': type '{entry_type}' not reported");
        }

        if let Some((extractor, extension)) = assigned {
            if self.options.recurse_into_archives {
                // Containers are recursed into even when not themselves
                // reported, consistent with directories.
                match extractor.extract(self, extension, fs_path, display_path, source, &attr) {
                    Err(WalkError::SkippedArchive) => {
                        debug!("skipping archive extraction for '{display_path}'");
                    }
                    other => other?,
                }
            }
        }
        Ok(())
    }
}
