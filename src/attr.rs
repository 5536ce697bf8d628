//! The per-entry attribute bundle and its value vocabulary.
//!
//! Different containers record wildly different metadata: tar has user and
//! group names, ZIP has DOS timestamps and (sometimes) UNIX modes, ARJ
//! remembers which operating system wrote each entry, 7z can carry deletion
//! markers. Rather than model that variety with a trait hierarchy, every
//! entry carries an [`Attributes`] bundle: an ordered map from [`Attr`] keys
//! to [`AttrValue`]s. Readers pick out what they care about and ignore the
//! rest, and new formats can stamp the existing keys without touching the
//! traversal engine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

/// The kind of entry found in a filesystem or archive.
///
/// Archive files (`.zip`, `.tar`, ...) and individually-compressed files
/// (`.gz`, `.bz2`, ...) get their own categories, distinct from
/// `RegularFile`: the walker treats them more like directories than files
/// (though they are not strictly directories either, of course).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileType {
    RegularFile,
    CompressedFile,
    Archive,
    Directory,
    SymbolicLink,
    HardLink,
    BlockDevice,
    CharacterDevice,
    Fifo,
    Socket,
    /// A deletion marker, as stored by 7z ("anti-item") and BSD dump.
    Whiteout,
    /// HP-UX network special file
    Network,
    /// Solaris door
    Door,
    /// Solaris event port
    EventPort,
    Unknown,
}

impl FileType {
    /// Decodes the file type implied by a UNIX mode word. The high 4 bits of
    /// a 16-bit mode encode a type on UNIX systems, and in archive formats
    /// that make room for one; the low 12 bits carry permissions.
    ///
    /// This is not the sole way of identifying a type. It only applies to
    /// UNIX-flavoured metadata, and only to a subset of types; formats with
    /// their own type codes (tar typeflags, dump codes) use those instead.
    pub fn from_mode(mode: u32) -> FileType {
        match mode & 0xf000 {
            // Generic UNIX file types:
            0x1000 => FileType::Fifo,
            0x2000 => FileType::CharacterDevice,
            0x4000 => FileType::Directory,
            0x6000 => FileType::BlockDevice,
            0x8000 => FileType::RegularFile,
            0xa000 => FileType::SymbolicLink,
            0xc000 => FileType::Socket,

            // HP-UX-specific:
            0x9000 => FileType::Network,

            // Solaris-specific:
            0xd000 => FileType::Door,

            // 0xe000 is claimed by both Solaris event ports and dump
            // whiteouts; neither can be told apart from the mode alone, so
            // callers that know the format stamp those types directly.
            _ => FileType::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FileType::RegularFile => "regular file",
            FileType::CompressedFile => "compressed file",
            FileType::Archive => "archive",
            FileType::Directory => "directory",
            FileType::SymbolicLink => "symbolic link",
            FileType::HardLink => "hard link",
            FileType::BlockDevice => "block device",
            FileType::CharacterDevice => "character device",
            FileType::Fifo => "FIFO pipe",
            FileType::Socket => "socket",
            FileType::Whiteout => "whiteout/anti-item",
            FileType::Network => "network (HP-UX)",
            FileType::Door => "door (Solaris)",
            FileType::EventPort => "event port (Solaris)",
            FileType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A set of UNIX-style file permissions: read/write/execute for user, group
/// and others, plus the set-UID, set-GID and sticky bits. Only the low 12
/// bits of a mode word are kept; the type nybble is consumed by
/// [`FileType::from_mode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UnixPermissions(u16);

impl UnixPermissions {
    /// Extracts the permission flags from the lower 12 bits of a mode value.
    /// (The other bits are ignored.)
    pub fn from_mode(mode: u32) -> UnixPermissions {
        UnixPermissions((mode & 0o7777) as u16)
    }

    /// Parses the nine-character `rwxrwxrwx` form, with `s`/`S` in the user-
    /// and group-execute positions encoding set-UID/set-GID (capital meaning
    /// the execute bit is absent) and `t`/`T` in the other-execute position
    /// encoding the sticky bit. An optional leading file-type character is
    /// accepted and ignored; any other length is rejected.
    pub fn parse(s: &str) -> Result<UnixPermissions, crate::result::WalkError> {
        let ch: Vec<char> = match s.chars().count() {
            9 => s.chars().collect(),
            10 => s.chars().skip(1).collect(),
            _ => {
                return Err(crate::result::WalkError::Config(format!(
                    "incorrect permission format: '{s}'"
                )))
            }
        };

        let mut mode = 0u16;
        // User permissions (including set-UID)
        if ch[0] == 'r' {
            mode |= 0o400;
        }
        if ch[1] == 'w' {
            mode |= 0o200;
        }
        match ch[2] {
            'x' => mode |= 0o100,
            'S' => mode |= 0o4000,
            's' => mode |= 0o4100,
            _ => {}
        }
        // Group permissions (including set-GID)
        if ch[3] == 'r' {
            mode |= 0o040;
        }
        if ch[4] == 'w' {
            mode |= 0o020;
        }
        match ch[5] {
            'x' => mode |= 0o010,
            'S' => mode |= 0o2000,
            's' => mode |= 0o2010,
            _ => {}
        }
        // Other permissions (including the sticky bit)
        if ch[6] == 'r' {
            mode |= 0o004;
        }
        if ch[7] == 'w' {
            mode |= 0o002;
        }
        match ch[8] {
            'x' => mode |= 0o001,
            'T' => mode |= 0o1000,
            't' => mode |= 0o1001,
            _ => {}
        }
        Ok(UnixPermissions(mode))
    }

    pub fn mode(self) -> u16 {
        self.0
    }

    pub fn user_readable(self) -> bool {
        self.0 & 0o400 != 0
    }
    pub fn user_writable(self) -> bool {
        self.0 & 0o200 != 0
    }
    pub fn user_executable(self) -> bool {
        self.0 & 0o100 != 0
    }
    pub fn group_readable(self) -> bool {
        self.0 & 0o040 != 0
    }
    pub fn group_writable(self) -> bool {
        self.0 & 0o020 != 0
    }
    pub fn group_executable(self) -> bool {
        self.0 & 0o010 != 0
    }
    pub fn other_readable(self) -> bool {
        self.0 & 0o004 != 0
    }
    pub fn other_writable(self) -> bool {
        self.0 & 0o002 != 0
    }
    pub fn other_executable(self) -> bool {
        self.0 & 0o001 != 0
    }
    pub fn sticky(self) -> bool {
        self.0 & 0o1000 != 0
    }
    pub fn set_gid(self) -> bool {
        self.0 & 0o2000 != 0
    }
    pub fn set_uid(self) -> bool {
        self.0 & 0o4000 != 0
    }
}

impl fmt::Display for UnixPermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = ['-'; 9];
        if self.user_readable() {
            out[0] = 'r';
        }
        if self.user_writable() {
            out[1] = 'w';
        }
        out[2] = match (self.set_uid(), self.user_executable()) {
            (true, true) => 's',
            (true, false) => 'S',
            (false, true) => 'x',
            (false, false) => '-',
        };
        if self.group_readable() {
            out[3] = 'r';
        }
        if self.group_writable() {
            out[4] = 'w';
        }
        out[5] = match (self.set_gid(), self.group_executable()) {
            (true, true) => 's',
            (true, false) => 'S',
            (false, true) => 'x',
            (false, false) => '-',
        };
        if self.other_readable() {
            out[6] = 'r';
        }
        if self.other_writable() {
            out[7] = 'w';
        }
        out[8] = match (self.sticky(), self.other_executable()) {
            (true, true) => 't',
            (true, false) => 'T',
            (false, true) => 'x',
            (false, false) => '-',
        };
        for c in out {
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// The basic DOS/Windows attribute flags: read-only, hidden, system and
/// archive. The raw field is kept so that unknown flags survive a round
/// trip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DosAttributes(u32);

impl DosAttributes {
    pub fn from_field(field: u32) -> DosAttributes {
        DosAttributes(field)
    }

    pub fn field(self) -> u32 {
        self.0
    }

    pub fn read_only(self) -> bool {
        self.0 & 0x01 != 0
    }
    pub fn hidden(self) -> bool {
        self.0 & 0x02 != 0
    }
    pub fn system(self) -> bool {
        self.0 & 0x04 != 0
    }
    pub fn archive(self) -> bool {
        self.0 & 0x20 != 0
    }
}

impl fmt::Display for DosAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            if self.archive() { 'A' } else { '-' },
            if self.system() { 'S' } else { '-' },
            if self.hidden() { 'H' } else { '-' },
            if self.read_only() { 'R' } else { '-' },
        )
    }
}

/// The container (or compression) format an entry was read from.
/// Presence of the [`Attr::InArchive`] attribute is the canonical signal
/// that an entry came from inside a container at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerFormat {
    Ar,
    Arj,
    Cpio,
    Dump,
    Rar,
    SevenZ,
    Tar,
    Zip,
    Brotli,
    Bzip2,
    Gzip,
    Lzma,
    Lz4Block,
    Lz4Framed,
    SnappyFramed,
    SnappyRaw,
    Xz,
    Z,
    Zlib,
    Zstandard,
    Unknown,
}

impl ContainerFormat {
    pub fn label(self) -> &'static str {
        match self {
            ContainerFormat::Ar => "ar",
            ContainerFormat::Arj => "arj",
            ContainerFormat::Cpio => "cpio",
            ContainerFormat::Dump => "dump",
            ContainerFormat::Rar => "rar",
            ContainerFormat::SevenZ => "7z",
            ContainerFormat::Tar => "tar",
            ContainerFormat::Zip => "zip",
            ContainerFormat::Brotli => "brotli",
            ContainerFormat::Bzip2 => "bzip2",
            ContainerFormat::Gzip => "gzip",
            ContainerFormat::Lzma => "lzma",
            ContainerFormat::Lz4Block => "lz4 (block)",
            ContainerFormat::Lz4Framed => "lz4 (framed)",
            ContainerFormat::SnappyFramed => "snappy (framed)",
            ContainerFormat::SnappyRaw => "snappy (raw)",
            ContainerFormat::Xz => "xz",
            ContainerFormat::Z => "z (compress)",
            ContainerFormat::Zlib => "zlib",
            ContainerFormat::Zstandard => "zstandard",
            ContainerFormat::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The "host OS" code an ARJ archive records for each entry.
/// Unknown codes are preserved as-is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArjHostOs(pub u8);

impl ArjHostOs {
    pub const MSDOS: ArjHostOs = ArjHostOs(0);
    pub const UNIX: ArjHostOs = ArjHostOs(2);
    pub const NEXT: ArjHostOs = ArjHostOs(8);

    pub fn code(self) -> u8 {
        self.0
    }

    pub fn label(self) -> &'static str {
        match self.0 {
            0 => "MSDOS",
            1 => "PRIMOS",
            2 => "UNIX",
            3 => "AMIGA",
            4 => "MAC-OS",
            5 => "OS/2",
            6 => "APPLE GS",
            7 => "ATARI ST",
            8 => "NEXT",
            9 => "VAX VMS",
            10 => "WIN95",
            11 => "WIN32",
            _ => "unknown",
        }
    }

    /// ARJ stores UNIX-style mode bits only for these hosts.
    pub fn is_unix(self) -> bool {
        self == ArjHostOs::UNIX || self == ArjHostOs::NEXT
    }
}

impl fmt::Display for ArjHostOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The "operating system" (really, filesystem) code a gzip stream records
/// about its origin (RFC 1952, OS field).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GzipHostFs(pub u8);

impl GzipHostFs {
    pub fn code(self) -> u8 {
        self.0
    }

    pub fn label(self) -> &'static str {
        match self.0 {
            0 => "FAT",
            1 => "Amiga",
            2 => "VMS/OpenVMS",
            3 => "Unix",
            4 => "VM/CMS",
            5 => "Atari TOS",
            6 => "HPFS",
            7 => "Macintosh",
            8 => "Z-System",
            9 => "CP/M",
            10 => "TOPS-20",
            11 => "NTFS",
            12 => "QDOS",
            13 => "Acorn RISCOS",
            _ => "unknown",
        }
    }
}

impl fmt::Display for GzipHostFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Keys into an [`Attributes`] bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attr {
    /// File type; see [`FileType`].
    Type,
    /// File creation time.
    CreationTime,
    /// File access time.
    LastAccessTime,
    /// File modification time.
    LastModifiedTime,
    /// File size in bytes (uncompressed, where applicable).
    Size,
    /// In UNIX archives/filesystems, the username of the file's owner.
    UserName,
    /// In UNIX archives/filesystems, the name of the file's group.
    GroupName,
    /// In UNIX archives/filesystems, the ID of the file's owner.
    UserId,
    /// In UNIX archives/filesystems, the ID of the file's group.
    GroupId,
    /// Permission flags (read/write/execute, set-ID, sticky).
    UnixPermissions,
    /// DOS/Windows attribute flags.
    Dos,
    /// The containing archive's format. Present iff the entry came from
    /// inside a container.
    InArchive,
    /// In ARJ archives, the host OS the entry was created under.
    ArjHostOs,
    /// In gzip streams, the host filesystem of origin.
    GzipHostFs,
    /// An archive-stored checksum; the algorithm depends on the format.
    Checksum,
    /// A free-form comment, notably from ZIP entries and gzip headers.
    Comment,
}

impl Attr {
    pub fn label(self) -> &'static str {
        match self {
            Attr::Type => "file type",
            Attr::CreationTime => "creation time",
            Attr::LastAccessTime => "last access time",
            Attr::LastModifiedTime => "last modified time",
            Attr::Size => "size",
            Attr::UserName => "user name",
            Attr::GroupName => "group name",
            Attr::UserId => "user ID",
            Attr::GroupId => "group ID",
            Attr::UnixPermissions => "UNIX permissions",
            Attr::Dos => "DOS attributes",
            Attr::InArchive => "archive",
            Attr::ArjHostOs => "ARJ host OS",
            Attr::GzipHostFs => "GZIP host FS",
            Attr::Checksum => "checksum",
            Attr::Comment => "comment",
        }
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A value stored under some [`Attr`] key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AttrValue {
    Type(FileType),
    Time(DateTime<Utc>),
    Size(u64),
    Id(u64),
    Text(String),
    Permissions(UnixPermissions),
    Dos(DosAttributes),
    Format(ContainerFormat),
    ArjHost(ArjHostOs),
    GzipHost(GzipHostFs),
    Checksum(u64),
}

/// A bundle of file attribute metadata.
///
/// Putting `None` removes a key, so "absent" and "never set" are the same
/// state. Equality and hashing are structural over the underlying map.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Attributes {
    map: BTreeMap<Attr, AttrValue>,
}

impl Attributes {
    pub fn new() -> Attributes {
        Attributes::default()
    }

    /// Stores `value` under `attr`; `None` removes any existing value.
    pub fn put(&mut self, attr: Attr, value: Option<AttrValue>) {
        match value {
            Some(v) => {
                self.map.insert(attr, v);
            }
            None => {
                self.map.remove(&attr);
            }
        }
    }

    pub fn get(&self, attr: Attr) -> Option<&AttrValue> {
        self.map.get(&attr)
    }

    pub fn has(&self, attr: Attr) -> bool {
        self.map.contains_key(&attr)
    }

    /// Returns the stored value, or one built on demand when absent.
    pub fn get_or(&self, attr: Attr, default: impl FnOnce() -> AttrValue) -> AttrValue {
        self.map.get(&attr).cloned().unwrap_or_else(default)
    }

    /// True if the bundle's type is any of `types`.
    pub fn is_type(&self, types: &[FileType]) -> bool {
        match self.file_type() {
            Some(actual) => types.contains(&actual),
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Attr, &AttrValue)> {
        self.map.iter().map(|(k, v)| (*k, v))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    // Typed projections. Each returns None when the key is absent
    // (or, defensively, holds a value of the wrong shape).

    pub fn file_type(&self) -> Option<FileType> {
        match self.get(Attr::Type) {
            Some(AttrValue::Type(t)) => Some(*t),
            _ => None,
        }
    }

    pub fn size(&self) -> Option<u64> {
        match self.get(Attr::Size) {
            Some(AttrValue::Size(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.time(Attr::CreationTime)
    }

    pub fn last_access_time(&self) -> Option<DateTime<Utc>> {
        self.time(Attr::LastAccessTime)
    }

    pub fn last_modified_time(&self) -> Option<DateTime<Utc>> {
        self.time(Attr::LastModifiedTime)
    }

    fn time(&self, attr: Attr) -> Option<DateTime<Utc>> {
        match self.get(attr) {
            Some(AttrValue::Time(t)) => Some(*t),
            _ => None,
        }
    }

    pub fn user_name(&self) -> Option<&str> {
        self.text(Attr::UserName)
    }

    pub fn group_name(&self) -> Option<&str> {
        self.text(Attr::GroupName)
    }

    pub fn comment(&self) -> Option<&str> {
        self.text(Attr::Comment)
    }

    fn text(&self, attr: Attr) -> Option<&str> {
        match self.get(attr) {
            Some(AttrValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<u64> {
        self.id(Attr::UserId)
    }

    pub fn group_id(&self) -> Option<u64> {
        self.id(Attr::GroupId)
    }

    fn id(&self, attr: Attr) -> Option<u64> {
        match self.get(attr) {
            Some(AttrValue::Id(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn unix_permissions(&self) -> Option<UnixPermissions> {
        match self.get(Attr::UnixPermissions) {
            Some(AttrValue::Permissions(p)) => Some(*p),
            _ => None,
        }
    }

    pub fn dos_attributes(&self) -> Option<DosAttributes> {
        match self.get(Attr::Dos) {
            Some(AttrValue::Dos(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn in_archive(&self) -> Option<ContainerFormat> {
        match self.get(Attr::InArchive) {
            Some(AttrValue::Format(a)) => Some(*a),
            _ => None,
        }
    }

    pub fn arj_host_os(&self) -> Option<ArjHostOs> {
        match self.get(Attr::ArjHostOs) {
            Some(AttrValue::ArjHost(h)) => Some(*h),
            _ => None,
        }
    }

    pub fn gzip_host_fs(&self) -> Option<GzipHostFs> {
        match self.get(Attr::GzipHostFs) {
            Some(AttrValue::GzipHost(h)) => Some(*h),
            _ => None,
        }
    }

    pub fn checksum(&self) -> Option<u64> {
        match self.get(Attr::Checksum) {
            Some(AttrValue::Checksum(c)) => Some(*c),
            _ => None,
        }
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.map.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_decodes_to_type() {
        assert_eq!(FileType::from_mode(0o100644), FileType::RegularFile);
        assert_eq!(FileType::from_mode(0o040755), FileType::Directory);
        assert_eq!(FileType::from_mode(0o120777), FileType::SymbolicLink);
        assert_eq!(FileType::from_mode(0o060660), FileType::BlockDevice);
        assert_eq!(FileType::from_mode(0o020660), FileType::CharacterDevice);
        assert_eq!(FileType::from_mode(0o010644), FileType::Fifo);
        assert_eq!(FileType::from_mode(0o140755), FileType::Socket);
        assert_eq!(FileType::from_mode(0o110644), FileType::Network);
        assert_eq!(FileType::from_mode(0o150644), FileType::Door);
        // The 0xe nybble stays unknown; dump stamps whiteouts itself.
        assert_eq!(FileType::from_mode(0o160644), FileType::Unknown);
        assert_eq!(FileType::from_mode(0o644), FileType::Unknown);
    }

    #[test]
    fn permission_strings() {
        assert_eq!(UnixPermissions::from_mode(0o755).to_string(), "rwxr-xr-x");
        assert_eq!(UnixPermissions::from_mode(0o4644).to_string(), "rwSr--r--");
        assert_eq!(UnixPermissions::from_mode(0o4744).to_string(), "rwsr--r--");
        assert_eq!(UnixPermissions::from_mode(0o1777).to_string(), "rwxrwxrwt");
        assert_eq!(UnixPermissions::from_mode(0o1776).to_string(), "rwxrwxrwT");
        // All three special bits, other-execute absent:
        assert_eq!(UnixPermissions::from_mode(0o7776).to_string(), "rwsrwsrwT");
    }

    #[test]
    fn permission_parsing() {
        for mode in [0o755u32, 0o4644, 0o2710, 0o1777, 0o7776, 0o000] {
            let p = UnixPermissions::from_mode(mode);
            assert_eq!(UnixPermissions::parse(&p.to_string()).unwrap(), p);
        }
        // A leading file-type character is tolerated.
        assert_eq!(
            UnixPermissions::parse("drwxr-xr-x").unwrap(),
            UnixPermissions::from_mode(0o755)
        );
        assert!(UnixPermissions::parse("rwxr-xr-").is_err());
        assert!(UnixPermissions::parse("").is_err());
    }

    #[test]
    fn put_none_removes() {
        let mut attr = Attributes::new();
        attr.put(Attr::Size, Some(AttrValue::Size(9)));
        assert!(attr.has(Attr::Size));
        assert_eq!(attr.size(), Some(9));

        attr.put(Attr::Size, None);
        assert!(!attr.has(Attr::Size));
        assert_eq!(attr.size(), None);
    }

    #[test]
    fn get_or_builds_defaults() {
        let attr = Attributes::new();
        assert_eq!(
            attr.get_or(Attr::Size, || AttrValue::Size(0)),
            AttrValue::Size(0)
        );
    }

    #[test]
    fn copies_are_independent() {
        let mut attr = Attributes::new();
        attr.put(Attr::Type, Some(AttrValue::Type(FileType::RegularFile)));
        let mut copy = attr.clone();
        assert_eq!(attr, copy);

        copy.put(Attr::Type, Some(AttrValue::Type(FileType::Archive)));
        assert_ne!(attr, copy);
        assert_eq!(attr.file_type(), Some(FileType::RegularFile));
        assert_eq!(copy.file_type(), Some(FileType::Archive));
    }

    #[test]
    fn is_type_matches_any() {
        let mut attr = Attributes::new();
        assert!(!attr.is_type(&[FileType::RegularFile]));
        attr.put(Attr::Type, Some(AttrValue::Type(FileType::Directory)));
        assert!(attr.is_type(&[FileType::RegularFile, FileType::Directory]));
        assert!(!attr.is_type(&[FileType::Archive]));
    }

    #[test]
    fn dos_flags() {
        let dos = DosAttributes::from_field(0x21);
        assert!(dos.read_only());
        assert!(dos.archive());
        assert!(!dos.hidden());
        assert_eq!(dos.to_string(), "A--R");
    }
}
