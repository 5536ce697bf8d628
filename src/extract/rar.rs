//! Extraction of RAR archives by invoking the external `unrar` tool.
//!
//! RAR is proprietary and not served well by the crate ecosystem,
//! especially RAR5, so the archive is unpacked into a fresh temporary
//! directory by `unrar x` (extract with paths) and the unpacked tree walked
//! with the engine's own filesystem walker, every entry stamped as coming
//! from the archive. Absence of the tool shows up as an I/O failure on the
//! first RAR archive met.
//!
//! The tool's stdout is read after the process exits; an archive chatty
//! enough to fill the pipe stalls the tool and runs into the timeout.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use camino::Utf8Path;
use log::debug;

use super::{demote_failure, with_random_access, Extractor};
use crate::attr::{Attr, AttrValue, Attributes, ContainerFormat, FileType};
use crate::result::{WalkError, WalkResult};
use crate::walk::{EntrySource, WalkOperation};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RarExtractor {
    timeout: Duration,
}

impl RarExtractor {
    pub fn new() -> RarExtractor {
        RarExtractor {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the default 30 s wait for the external tool.
    pub fn with_timeout(timeout: Duration) -> RarExtractor {
        RarExtractor { timeout }
    }
}

impl Default for RarExtractor {
    fn default() -> RarExtractor {
        RarExtractor::new()
    }
}

impl Extractor for RarExtractor {
    fn extensions(&self) -> &'static [&'static str] {
        &["rar"]
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
        debug!("reading RAR archive '{display_path}'");
        let result = with_random_access(extension, fs_path, source, |path| {
            self.unpack_and_walk(op, path, display_path)
        });
        demote_failure(op, display_path, archive_attr, result)
    }
}

impl RarExtractor {
    fn unpack_and_walk(
        &self,
        op: &mut WalkOperation<'_>,
        archive: &std::path::Path,
        display_path: &Utf8Path,
    ) -> WalkResult<()> {
        // The temp dir guard removes the whole tree on every exit path.
        let unpack_dir = tempfile::Builder::new()
            .prefix("spelunk-rar")
            .tempdir()
            .map_err(WalkError::ArchiveIo)?;

        let archive = archive.canonicalize().map_err(WalkError::ArchiveIo)?;
        debug!(
            "running 'unrar x {}' in {}",
            archive.display(),
            unpack_dir.path().display()
        );
        let mut child = Command::new("unrar")
            .arg("x")
            .arg(&archive)
            .current_dir(unpack_dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(WalkError::ArchiveIo)?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait().map_err(WalkError::ArchiveIo)? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(WalkError::ArchiveIo(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!(
                        "unrar timed out after {} s on '{display_path}'",
                        self.timeout.as_secs()
                    ),
                )));
            }
            std::thread::sleep(Duration::from_millis(50));
        };

        if let Some(mut stdout) = child.stdout.take() {
            let mut output = String::new();
            let _ = stdout.read_to_string(&mut output);
            debug!("unrar output for '{display_path}':\n{output}");
        }

        if !status.success() {
            return Err(WalkError::ArchiveIo(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("unrar exited with {status} on '{display_path}'"),
            )));
        }

        // Walk the unpacked tree as if it were a subtree of the archive.
        op.walk_fs_tree(
            unpack_dir.path(),
            display_path,
            Some(&|attr: &mut Attributes| {
                attr.put(
                    Attr::InArchive,
                    Some(AttrValue::Format(ContainerFormat::Rar)),
                );
            }),
        )
    }
}
