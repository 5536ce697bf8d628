//! spelunk walks a directory tree and keeps going where most walkers stop:
//! straight into archives. ZIP, tar, 7z, cpio — and compressed files, and
//! archives *inside* archives — are traversed as if they were directories,
//! with each discovered entry delivered to a callback along with a lazy
//! byte source and whatever metadata its container recorded.
//!
//! ```no_run
//! use spelunk::walker;
//!
//! # fn main() -> spelunk::WalkResult<()> {
//! walker()
//!     .include("*.rs")?
//!     .exclude("target")?
//!     .walk("projects", |path, source, attr| {
//!         println!("{path} ({} bytes)", attr.size().unwrap_or(0));
//!         let mut reader = source.open()?;
//!         // Read away! The reader is only valid inside this callback.
//!         # let _ = &mut reader;
//!         Ok(())
//!     })
//! # }
//! ```
//!
//! A file like `reports.zip/2024/data.tar.gz` inside a walked directory is
//! reported under the display path
//! `reports.zip/2024/data.tar.gz/data.tar/...` — path components cross
//! archive boundaries, and in-archive segments always use `/`.
//!
//! The same traversal can be materialised as a tree:
//!
//! ```no_run
//! # fn main() -> spelunk::WalkResult<()> {
//! let tree = spelunk::walker().make_tree("projects")?;
//! for child in tree.root().children() {
//!     println!("{}", child.name());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! By default only regular files are reported; [`Walker::file_types`] and
//! friends widen or narrow that. Reporting and recursion are independent:
//! directories and archives are traversed whether or not they are reported
//! themselves.

pub mod attr;
pub mod extract;
pub mod pattern;
pub mod result;
pub mod tree;
pub mod walk;

mod crc;
mod formats;

use std::cell::RefCell;
use std::collections::BTreeSet;

use camino::Utf8Path;

pub use attr::{
    ArjHostOs, Attr, AttrValue, Attributes, ContainerFormat, DosAttributes, FileType, GzipHostFs,
    UnixPermissions,
};
pub use extract::{
    Extractor, RarExtractor, SevenZExtractor, SingleFileDecompressor, StreamArchiveExtractor,
    ZipExtractor,
};
pub use pattern::PathPattern;
pub use result::{WalkError, WalkResult};
pub use tree::{ErrorRecord, FileTree, FileTreeNode};
pub use walk::{EntrySource, WalkOperation};

/// Starts building a traversal. Equivalent to [`Walker::new`].
pub fn walker() -> Walker {
    Walker::new()
}

/// Configuration builder and entry point for traversals.
///
/// All configuration methods chain; the fallible ones (pattern compilation,
/// file-type selection) sit naturally behind `?`.
pub struct Walker {
    pub(crate) max_depth: usize,
    pub(crate) recurse_into_archives: bool,
    pub(crate) follow_links: bool,
    pub(crate) unix_attributes: bool,
    #[cfg_attr(not(windows), allow(dead_code))]
    pub(crate) dos_attributes: bool,
    pub(crate) inclusions: Vec<PathPattern>,
    pub(crate) exclusions: Vec<PathPattern>,
    file_types: Option<BTreeSet<FileType>>,
    inverted_file_types: bool,
    pub(crate) extractors: Vec<Box<dyn Extractor>>,
}

impl Default for Walker {
    fn default() -> Walker {
        Walker::new()
    }
}

impl Walker {
    pub fn new() -> Walker {
        Walker {
            max_depth: usize::MAX,
            recurse_into_archives: true,
            follow_links: false,
            unix_attributes: true,
            dos_attributes: false,
            inclusions: Vec::new(),
            exclusions: Vec::new(),
            file_types: None,
            inverted_file_types: false,
            extractors: extract::default_extractors(),
        }
    }

    /// The number of directory levels to visit, counting archive files as
    /// directories (unless [`Walker::recurse_into_archives`] is off).
    /// Anything nested more deeply is skipped. `0` means just the path
    /// passed to [`Walker::walk`] itself.
    pub fn max_depth(mut self, depth: usize) -> Walker {
        self.max_depth = depth;
        self
    }

    /// Whether to treat archive files like directories (the default).
    /// When off, archives are reported as ordinary leaves.
    pub fn recurse_into_archives(mut self, recurse: bool) -> Walker {
        self.recurse_into_archives = recurse;
        self
    }

    /// Whether to follow symbolic links outside of archives (off by
    /// default). Symlinks *within* archives are never followed, regardless.
    pub fn follow_links(mut self, follow: bool) -> Walker {
        self.follow_links = follow;
        self
    }

    /// Whether to read UNIX metadata (permissions, owner and group IDs)
    /// for filesystem entries (on by default). Entries inside archives get
    /// this information from their container whenever it's there, whatever
    /// this setting says.
    pub fn unix_attributes(mut self, read: bool) -> Walker {
        self.unix_attributes = read;
        self
    }

    /// Whether to read DOS attribute flags for filesystem entries (off by
    /// default; only meaningful on Windows hosts).
    pub fn dos_attributes(mut self, read: bool) -> Walker {
        self.dos_attributes = read;
        self
    }

    /// Adds an inclusion glob. With no inclusions, everything that survives
    /// the exclusions is reported; with some, only matching paths are.
    pub fn include(mut self, glob: &str) -> WalkResult<Walker> {
        self.inclusions.push(PathPattern::new(glob)?);
        Ok(self)
    }

    /// Adds a prebuilt inclusion matcher.
    pub fn include_matcher(mut self, pattern: PathPattern) -> Walker {
        self.inclusions.push(pattern);
        self
    }

    /// Adds an exclusion glob. Exclusions always win: a path matching one
    /// (or whose ancestor matches one) is never reported, and excluded
    /// directories are never descended into.
    pub fn exclude(mut self, glob: &str) -> WalkResult<Walker> {
        self.exclusions.push(PathPattern::new(glob)?);
        Ok(self)
    }

    /// Adds a prebuilt exclusion matcher.
    pub fn exclude_matcher(mut self, pattern: PathPattern) -> Walker {
        self.exclusions.push(pattern);
        self
    }

    /// Reports only the given file types. This does not limit recursion;
    /// directories and archives are still descended into regardless.
    ///
    /// The default (with no call to `file_types`, [`Walker::file_types_except`]
    /// or [`Walker::all_file_types`]) is to report regular files only.
    /// Inclusive and exclusive selections cannot be mixed.
    pub fn file_types(self, types: impl IntoIterator<Item = FileType>) -> WalkResult<Walker> {
        self.select_file_types(false, types)
    }

    /// Reports every file type *except* the given ones. Cannot be mixed
    /// with [`Walker::file_types`].
    pub fn file_types_except(
        self,
        types: impl IntoIterator<Item = FileType>,
    ) -> WalkResult<Walker> {
        self.select_file_types(true, types)
    }

    /// Reports every file type.
    pub fn all_file_types(mut self) -> Walker {
        self.file_types = Some(BTreeSet::new());
        self.inverted_file_types = true;
        self
    }

    fn select_file_types(
        mut self,
        inverted: bool,
        types: impl IntoIterator<Item = FileType>,
    ) -> WalkResult<Walker> {
        if self.file_types.is_some() && self.inverted_file_types != inverted {
            return Err(WalkError::Config(
                "cannot mix file_types(), file_types_except() and all_file_types()".to_owned(),
            ));
        }
        let set = self.file_types.get_or_insert_with(BTreeSet::new);
        self.inverted_file_types = inverted;
        set.extend(types);
        Ok(self)
    }

    /// Replaces the default extractor set.
    pub fn extract_with(
        mut self,
        extractors: impl IntoIterator<Item = Box<dyn Extractor>>,
    ) -> Walker {
        self.extractors = extractors.into_iter().collect();
        self
    }

    pub(crate) fn shows_file_type(&self, file_type: FileType) -> bool {
        match &self.file_types {
            Some(selected) => selected.contains(&file_type) != self.inverted_file_types,
            None => file_type == FileType::RegularFile,
        }
    }

    /// Traverses the tree rooted at `root`, handing each kept entry to
    /// `consume`. Any error — I/O, a broken archive, or one returned by
    /// the consumer — aborts the walk.
    ///
    /// If `root` is a directory or an archive, its contents are traversed;
    /// a regular file is the sole result of its own "traversal".
    pub fn walk<C>(&self, root: impl AsRef<Utf8Path>, consume: C) -> WalkResult<()>
    where
        C: FnMut(&Utf8Path, &mut EntrySource<'_>, &Attributes) -> WalkResult<()>,
    {
        self.walk_with(root, consume, |path, _attr, message, cause| {
            Err(WalkError::Aborted {
                path: path.to_owned(),
                message: message.to_owned(),
                source: cause.map(Box::new),
            })
        })
    }

    /// Like [`Walker::walk`], but recoverable failures are routed to
    /// `on_error`, which can record them and let the walk continue at the
    /// next sibling (return `Ok`), or abort (return `Err`).
    pub fn walk_with<C, H>(
        &self,
        root: impl AsRef<Utf8Path>,
        mut consume: C,
        mut on_error: H,
    ) -> WalkResult<()>
    where
        C: FnMut(&Utf8Path, &mut EntrySource<'_>, &Attributes) -> WalkResult<()>,
        H: FnMut(&Utf8Path, &Attributes, &str, Option<WalkError>) -> WalkResult<()>,
    {
        let mut operation = WalkOperation::new(self, &mut consume, &mut on_error);
        operation.run(root.as_ref())
    }

    /// Runs the traversal and materialises it as a [`FileTree`].
    /// Recoverable errors end up in the tree's error list instead of
    /// aborting.
    pub fn make_tree(&self, root: impl AsRef<Utf8Path>) -> WalkResult<FileTree> {
        let root = root.as_ref();
        let tree = RefCell::new(FileTree::new(root));
        self.walk_with(
            root,
            |path, _source, attr| tree.borrow_mut().add_path(path, attr),
            |path, _attr, message, cause| {
                // The duplicate-path error is the tree builder's own,
                // escaped back through the walker; recording it would bury
                // a bug, so it aborts instead.
                if let Some(WalkError::DuplicatePath(p)) = cause {
                    return Err(WalkError::DuplicatePath(p));
                }
                tree.borrow_mut().add_error(path, message, cause);
                Ok(())
            },
        )?;
        Ok(tree.into_inner())
    }
}
