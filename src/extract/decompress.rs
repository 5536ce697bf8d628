//! Extraction of the uncompressed form of singly-compressed files: gzip,
//! bzip2, xz and the rest of the family that wraps exactly one payload.
//! Multi-file containers (zip, 7z, rar) and tar itself are someone else's
//! job; this extractor frequently *feeds* the tar extractor, though, since
//! `.tar.gz`/`.tgz` et al. decompress into a tarball.
//!
//! Extensions with ambiguous framing (`lz4` block vs. framed, the snappy
//! zoo, lzip, lzop) go through magic-byte sniffing. Codecs without a usable
//! decoder — compress(1)'s `.Z`, lzip, lzop, and the raw LZ4/snappy block
//! forms — are recognised but reported as unsupported, which the engine
//! turns into "treat the file as an opaque leaf".

use std::io::{BufReader, Read};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::{GzDecoder, ZlibDecoder};
use log::debug;

use super::{demote_failure, resolve_entry_path, Extractor};
use crate::attr::{Attr, AttrValue, Attributes, ContainerFormat, FileType, GzipHostFs};
use crate::formats::unix_timestamp;
use crate::result::{WalkError, WalkResult};
use crate::walk::{EntrySource, WalkOperation};

/// Sniffing needs this many bytes of lookahead at most.
const MAGIC_LEN: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Codec {
    Brotli,
    Bzip2,
    Gzip,
    Lzma,
    Xz,
    Zstandard,
    Lz4Framed,
    SnappyFramed,
    Zlib,
    /// compress(1). Recognised, but no decoder exists in the ecosystem.
    Z,
    /// Resolved by looking at the stream's magic bytes.
    Autodetect,
}

impl Codec {
    fn container_format(self) -> ContainerFormat {
        match self {
            Codec::Brotli => ContainerFormat::Brotli,
            Codec::Bzip2 => ContainerFormat::Bzip2,
            Codec::Gzip => ContainerFormat::Gzip,
            Codec::Lzma => ContainerFormat::Lzma,
            Codec::Xz => ContainerFormat::Xz,
            Codec::Zstandard => ContainerFormat::Zstandard,
            Codec::Lz4Framed => ContainerFormat::Lz4Framed,
            Codec::SnappyFramed => ContainerFormat::SnappyFramed,
            Codec::Zlib => ContainerFormat::Zlib,
            Codec::Z => ContainerFormat::Z,
            Codec::Autodetect => ContainerFormat::Unknown,
        }
    }
}

pub struct SingleFileDecompressor {
    extension_map: Vec<(&'static str, Codec)>,
    /// Extensions that are shorthand for `.tar.*`; the derived name gets a
    /// `.tar` suffix so the tar extractor picks the payload up.
    combined_tar: &'static [&'static str],
}

impl SingleFileDecompressor {
    pub fn new() -> SingleFileDecompressor {
        SingleFileDecompressor {
            extension_map: vec![
                ("tb2", Codec::Bzip2),
                ("tbz", Codec::Bzip2),
                ("tbz2", Codec::Bzip2),
                ("tz2", Codec::Bzip2),
                ("taz", Codec::Gzip),
                ("tgz", Codec::Gzip),
                ("tlz", Codec::Lzma),
                ("txz", Codec::Xz),
                ("tz", Codec::Z),
                // "taz" and "taZ" are different!
                ("taZ", Codec::Z),
                ("tzst", Codec::Zstandard),
                ("br", Codec::Brotli),
                ("bz2", Codec::Bzip2),
                ("gz", Codec::Gzip),
                ("lzma", Codec::Lzma),
                ("xz", Codec::Xz),
                ("z", Codec::Z),
                ("zst", Codec::Zstandard),
                // Both framed and block variants exist for lz4 and snappy,
                // and snappy can't make its mind up on a file extension.
                ("lz4", Codec::Autodetect),
                ("snappy", Codec::Autodetect),
                ("snz", Codec::Autodetect),
                ("sz", Codec::Autodetect),
                // Rarely standalone, but cheap to recognise.
                ("deflate", Codec::Autodetect),
                // Lzip and lzop: sniffed so the user at least learns what
                // the file is, even though neither can be decoded.
                ("lz", Codec::Autodetect),
                ("lzo", Codec::Autodetect),
            ],
            combined_tar: &[
                "tb2", "tbz", "tbz2", "tz2", "taz", "tgz", "tlz", "txz", "tz", "tzst",
            ],
        }
    }

    fn codec_for(&self, extension: &str) -> Option<Codec> {
        // Exact match first: the one place extension case matters.
        self.extension_map
            .iter()
            .find(|(e, _)| *e == extension)
            .or_else(|| {
                let lower = extension.to_ascii_lowercase();
                self.extension_map.iter().find(|(e, _)| *e == lower)
            })
            .map(|(_, codec)| *codec)
    }
}

impl Default for SingleFileDecompressor {
    fn default() -> SingleFileDecompressor {
        SingleFileDecompressor::new()
    }
}

impl Extractor for SingleFileDecompressor {
    fn extensions(&self) -> &'static [&'static str] {
        &[
            "tb2", "tbz", "tbz2", "tz2", "taz", "tgz", "tlz", "txz", "tz", "taZ", "tzst", "br",
            "bz2", "gz", "lzma", "xz", "z", "zst", "lz4", "snappy", "snz", "sz", "deflate", "lz",
            "lzo",
        ]
    }

    fn modified_file_type(&self) -> FileType {
        FileType::CompressedFile
    }

    fn extract(
        &self,
        op: &mut WalkOperation<'_>,
        extension: &str,
        _fs_path: Option<&std::path::Path>,
        display_path: &Utf8Path,
        source: &mut EntrySource<'_>,
        attr: &Attributes,
    ) -> WalkResult<()> {
        debug!("decompressing file '{display_path}'");

        let result = (|| {
            let codec = self.codec_for(extension).ok_or_else(|| {
                WalkError::Config(format!(
                    "single-file decompressor cannot handle the extension '{extension}'"
                ))
            })?;

            let reader = BufReader::new(source.open().map_err(WalkError::ArchiveIo)?);
            let (codec, reader) = resolve_codec(codec, reader)?;
            let mut decoder: Box<dyn Read + '_>;

            // The uncompressed view inherits the compressed file's
            // attributes, with the compression format recorded, the type
            // reset, and the size dropped (we can't know it without reading
            // the whole stream).
            let mut uncompressed_attr = attr.clone();
            uncompressed_attr.put(
                Attr::InArchive,
                Some(AttrValue::Format(codec.container_format())),
            );
            uncompressed_attr.put(Attr::Type, Some(AttrValue::Type(FileType::RegularFile)));
            uncompressed_attr.put(Attr::Size, None);

            decoder = match codec {
                Codec::Brotli => Box::new(brotli::Decompressor::new(reader, 8 * 1024)),
                Codec::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
                Codec::Gzip => {
                    let gz = GzDecoder::new(reader);
                    return self.emit_gzip(op, display_path, extension, gz, uncompressed_attr);
                }
                Codec::Lzma => {
                    let stream = xz2::stream::Stream::new_lzma_decoder(u64::MAX)
                        .map_err(|e| WalkError::InvalidArchive("lzma", e.to_string()))?;
                    Box::new(xz2::read::XzDecoder::new_stream(reader, stream))
                }
                Codec::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
                Codec::Zstandard => Box::new(
                    zstd::stream::read::Decoder::new(reader).map_err(WalkError::ArchiveIo)?,
                ),
                Codec::Lz4Framed => Box::new(lz4_flex::frame::FrameDecoder::new(reader)),
                Codec::SnappyFramed => Box::new(snap::read::FrameDecoder::new(reader)),
                Codec::Zlib => Box::new(ZlibDecoder::new(reader)),
                Codec::Z => {
                    return Err(WalkError::UnsupportedArchive(
                        "no decoder is available for compress(1) (.Z) data".to_owned(),
                    ))
                }
                Codec::Autodetect => unreachable!("resolved before decoding"),
            };

            let (match_path, virtual_display) =
                self.derived_paths(display_path, extension, None);
            op.filter_entry(
                None,
                &match_path,
                &virtual_display,
                &mut EntrySource::Stream(&mut *decoder),
                uncompressed_attr,
            )
        })();
        demote_failure(op, display_path, attr, result)
    }
}

impl SingleFileDecompressor {
    /// Gzip is the one codec with metadata of its own (RFC 1952): an mtime,
    /// the host filesystem, an optional comment, and sometimes the
    /// payload's original file name, which then becomes part of the path.
    fn emit_gzip<R: Read>(
        &self,
        op: &mut WalkOperation<'_>,
        display_path: &Utf8Path,
        extension: &str,
        mut gz: GzDecoder<R>,
        mut uncompressed_attr: Attributes,
    ) -> WalkResult<()> {
        // The decoder parses the gzip header on its first read, so pull one
        // byte through before asking for metadata, and hand that byte back
        // at the front of the payload.
        let mut first = [0u8; 1];
        let peeked = gz.read(&mut first).map_err(WalkError::ArchiveIo)?;

        let mut inner_name = None;
        if let Some(header) = gz.header() {
            // Gzip stores whole seconds; zero means "not recorded", but the
            // original behaviour of stamping the epoch then is kept.
            uncompressed_attr.put(
                Attr::LastModifiedTime,
                Some(AttrValue::Time(unix_timestamp(i64::from(header.mtime())))),
            );
            uncompressed_attr.put(
                Attr::GzipHostFs,
                Some(AttrValue::GzipHost(GzipHostFs(header.operating_system()))),
            );
            if let Some(comment) = header.comment() {
                uncompressed_attr.put(
                    Attr::Comment,
                    Some(AttrValue::Text(
                        String::from_utf8_lossy(comment).into_owned(),
                    )),
                );
            }
            inner_name = header
                .filename()
                .map(|name| String::from_utf8_lossy(name).into_owned());
        }

        let (match_path, virtual_display) =
            self.derived_paths(display_path, extension, inner_name.as_deref());
        let mut payload = std::io::Cursor::new(first[..peeked].to_vec()).chain(gz);
        op.filter_entry(
            None,
            &match_path,
            &virtual_display,
            &mut EntrySource::Stream(&mut payload),
            uncompressed_attr,
        )
    }

    /// Works out the virtual uncompressed entry's match and display paths.
    ///
    /// A name stored inside the stream is trusted and shown. Otherwise the
    /// name is derived from the compressed one by dropping the extension
    /// (re-adding `.tar` for the combined shorthands), and only the match
    /// path uses it — the user keeps seeing the compressed name.
    fn derived_paths(
        &self,
        display_path: &Utf8Path,
        extension: &str,
        inner_name: Option<&str>,
    ) -> (Utf8PathBuf, Utf8PathBuf) {
        if let Some(name) = inner_name {
            let named = resolve_entry_path(display_path, name);
            return (named.clone(), named);
        }

        let file_name = display_path.file_name().unwrap_or_default();
        let mut derived = match file_name.rfind('.') {
            Some(dot) => file_name[..dot].to_owned(),
            None => file_name.to_owned(),
        };
        if self
            .combined_tar
            .contains(&extension.to_ascii_lowercase().as_str())
        {
            derived.push_str(".tar");
        }
        (display_path.join(derived), display_path.to_owned())
    }
}

/// Peeks at the stream's first bytes to pin down an ambiguous codec.
fn resolve_codec<'r, R: Read + 'r>(
    codec: Codec,
    mut reader: BufReader<R>,
) -> WalkResult<(Codec, Box<dyn Read + 'r>)> {
    if codec != Codec::Autodetect {
        return Ok((codec, Box::new(reader)));
    }

    let mut head = [0u8; MAGIC_LEN];
    let mut filled = 0;
    while filled < MAGIC_LEN {
        let n = reader
            .read(&mut head[filled..])
            .map_err(WalkError::ArchiveIo)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    let magic = &head[..filled];
    let rest = std::io::Cursor::new(head[..filled].to_vec()).chain(reader);

    let detected = sniff_magic(magic)?;
    Ok((detected, Box::new(rest)))
}

fn sniff_magic(magic: &[u8]) -> WalkResult<Codec> {
    let starts = |prefix: &[u8]| magic.len() >= prefix.len() && &magic[..prefix.len()] == prefix;

    if starts(&[0x1f, 0x8b]) {
        return Ok(Codec::Gzip);
    }
    if starts(b"BZh") {
        return Ok(Codec::Bzip2);
    }
    if starts(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
        return Ok(Codec::Xz);
    }
    if starts(&[0x28, 0xb5, 0x2f, 0xfd]) {
        return Ok(Codec::Zstandard);
    }
    if starts(&[0x04, 0x22, 0x4d, 0x18]) {
        return Ok(Codec::Lz4Framed);
    }
    if starts(&[0xff, 0x06, 0x00, 0x00, b's', b'N', b'a', b'P', b'p', b'Y']) {
        return Ok(Codec::SnappyFramed);
    }
    if starts(&[0x5d, 0x00]) {
        return Ok(Codec::Lzma);
    }
    if starts(&[0x1f, 0x9d]) {
        return Err(WalkError::UnsupportedArchive(
            "compress(1) (.Z) data is recognised but cannot be decoded".to_owned(),
        ));
    }
    if starts(b"LZIP") {
        return Err(WalkError::UnsupportedArchive(
            "lzip data is recognised but cannot be decoded".to_owned(),
        ));
    }
    if starts(&[0x89, b'L', b'Z', b'O']) {
        return Err(WalkError::UnsupportedArchive(
            "lzop data is recognised but cannot be decoded".to_owned(),
        ));
    }
    // zlib: 0x78 followed by a byte making the 16-bit header divisible
    // by 31.
    if magic.len() >= 2 && magic[0] == 0x78 {
        let header = u16::from(magic[0]) << 8 | u16::from(magic[1]);
        if header % 31 == 0 {
            return Ok(Codec::Zlib);
        }
    }
    Err(WalkError::UnsupportedArchive(
        "unrecognised compression format".to_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_lookup_is_case_aware() {
        let d = SingleFileDecompressor::new();
        assert_eq!(d.codec_for("gz"), Some(Codec::Gzip));
        assert_eq!(d.codec_for("GZ"), Some(Codec::Gzip));
        // The Z/gzip split hangs on exact case.
        assert_eq!(d.codec_for("taz"), Some(Codec::Gzip));
        assert_eq!(d.codec_for("taZ"), Some(Codec::Z));
        assert_eq!(d.codec_for("nope"), None);
    }

    #[test]
    fn combined_tar_names_regain_their_extension() {
        let d = SingleFileDecompressor::new();
        let (match_path, display) = d.derived_paths(Utf8Path::new("R/pkg.tgz"), "tgz", None);
        assert_eq!(match_path, "R/pkg.tgz/pkg.tar");
        assert_eq!(display, "R/pkg.tgz");

        let (match_path, display) = d.derived_paths(Utf8Path::new("R/notes.gz"), "gz", None);
        assert_eq!(match_path, "R/notes.gz/notes");
        assert_eq!(display, "R/notes.gz");
    }

    #[test]
    fn stored_names_take_over_the_display_path() {
        let d = SingleFileDecompressor::new();
        let (match_path, display) =
            d.derived_paths(Utf8Path::new("R/x.tar.gz"), "gz", Some("x.tar"));
        assert_eq!(match_path, "R/x.tar.gz/x.tar");
        assert_eq!(display, "R/x.tar.gz/x.tar");
    }

    #[test]
    fn magic_sniffing() {
        assert_eq!(sniff_magic(&[0x1f, 0x8b, 0x08]).unwrap(), Codec::Gzip);
        assert_eq!(sniff_magic(b"BZh91AY").unwrap(), Codec::Bzip2);
        assert_eq!(
            sniff_magic(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]).unwrap(),
            Codec::Xz
        );
        assert_eq!(
            sniff_magic(&[0x28, 0xb5, 0x2f, 0xfd, 0x00]).unwrap(),
            Codec::Zstandard
        );
        assert_eq!(
            sniff_magic(&[0x04, 0x22, 0x4d, 0x18]).unwrap(),
            Codec::Lz4Framed
        );
        assert_eq!(sniff_magic(&[0x78, 0x9c]).unwrap(), Codec::Zlib);
        assert!(sniff_magic(&[0x1f, 0x9d]).is_err());
        assert!(sniff_magic(b"random").is_err());
    }
}
