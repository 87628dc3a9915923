//! The ztoc value: table of contents plus compression index for one layer.
//!
//! A [`Ztoc`] is built once per gzipped tar layer by [`Builder`], is
//! immutable afterwards, and is shared read-only by any number of concurrent
//! extractions. The serialized form lives in [`codec`]; this module only
//! defines the in-memory value and its construction-time invariants.
//!
//! The types derive serde traits so outer layers (a CLI, a snapshotter
//! debug endpoint) can render a ztoc as JSON. The JSON form is an
//! inspection view only; the canonical persisted encoding is the binary
//! codec, which is what content addressing is computed over.
//!
//! [`Builder`]: crate::builder::Builder
//! [`codec`]: crate::codec

use serde::{Deserialize, Serialize};

use crate::compression::{Algorithm, SpanId};
use crate::error::{Result, ZtocError};

/// Schema version tags understood by this implementation.
///
/// The codec refuses any serialized ztoc whose tag is not in this set;
/// adding a field to the format requires adding a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Version {
    /// Initial schema, textual tag `"0.9"`.
    #[serde(rename = "0.9")]
    V0_9,
}

impl Version {
    /// The version written by this implementation.
    pub const CURRENT: Version = Version::V0_9;

    /// Textual form of the tag as it appears on disk.
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V0_9 => "0.9",
        }
    }

    /// Parse an on-disk tag, rejecting unknown values.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "0.9" => Ok(Version::V0_9),
            other => Err(ZtocError::SchemaVersion(other.to_string())),
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of a tar member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Regular file
    #[default]
    Reg,
    /// Directory
    Dir,
    /// Symbolic link
    Symlink,
    /// Hard link
    Hardlink,
    /// Character device
    Char,
    /// Block device
    Block,
    /// FIFO (named pipe)
    Fifo,
    /// Any type flag this implementation does not model; offsets are still
    /// recorded so the stream geometry stays intact.
    Other,
}

impl FileType {
    /// Map a tar typeflag byte. Unknown flags become [`FileType::Other`].
    pub fn from_typeflag(typeflag: u8) -> Self {
        match typeflag {
            b'0' | b'\0' => FileType::Reg,
            b'1' => FileType::Hardlink,
            b'2' => FileType::Symlink,
            b'3' => FileType::Char,
            b'4' => FileType::Block,
            b'5' => FileType::Dir,
            b'6' => FileType::Fifo,
            _ => FileType::Other,
        }
    }

    pub(crate) fn wire_tag(&self) -> u8 {
        match self {
            FileType::Reg => 0,
            FileType::Dir => 1,
            FileType::Symlink => 2,
            FileType::Hardlink => 3,
            FileType::Char => 4,
            FileType::Block => 5,
            FileType::Fifo => 6,
            FileType::Other => 7,
        }
    }

    pub(crate) fn from_wire_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => FileType::Reg,
            1 => FileType::Dir,
            2 => FileType::Symlink,
            3 => FileType::Hardlink,
            4 => FileType::Char,
            5 => FileType::Block,
            6 => FileType::Fifo,
            7 => FileType::Other,
            other => {
                return Err(ZtocError::Corrupt(format!(
                    "unknown file type tag {}",
                    other
                )))
            }
        })
    }
}

/// Modification time with nanosecond precision.
///
/// Plain `(seconds, nanoseconds)` since the Unix epoch; seconds may be
/// negative for pre-epoch timestamps. PAX `mtime` records supply the
/// fractional part when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModTime {
    /// Whole seconds since the Unix epoch.
    pub secs: i64,
    /// Nanosecond remainder, `0..1_000_000_000`.
    pub nanos: u32,
}

impl ModTime {
    pub fn new(secs: i64, nanos: u32) -> Self {
        Self { secs, nanos }
    }
}

/// Extended attributes of one tar member.
///
/// Stored as ordered `(key, value)` pairs in the order the PAX records were
/// observed. That order is fixed by the tar stream itself, which keeps the
/// serialized ztoc (and therefore its digest) deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Xattrs(Vec<(String, String)>);

impl Xattrs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: String, value: String) {
        self.0.push((key, value));
    }

    /// Look up a value by key (first match).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Metadata for one tar member, in tar order.
///
/// `uncompressed_offset` points at the first payload byte (immediately after
/// the member's header blocks) in the concatenated uncompressed tar stream;
/// `uncompressed_size` is the payload length. Names are carried exactly as
/// encoded in the tar, with no normalization.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Path as encoded in the tar header (or PAX/GNU long-name records).
    pub name: String,

    /// Member type.
    #[serde(rename = "type")]
    pub file_type: FileType,

    /// Offset of the first payload byte in the uncompressed stream.
    pub uncompressed_offset: u64,

    /// Payload length in bytes.
    pub uncompressed_size: u64,

    /// Link target for symlinks and hardlinks; empty otherwise.
    pub linkname: String,

    /// Permission bits from the tar header.
    pub mode: u32,

    /// Owner user ID.
    pub uid: u32,

    /// Owner group ID.
    pub gid: u32,

    /// Owner user name; empty if unset.
    pub uname: String,

    /// Owner group name; empty if unset.
    pub gname: String,

    /// Modification time, nanosecond-precise when the tar carries a PAX
    /// `mtime` record.
    pub modtime: ModTime,

    /// Major device number for char/block devices.
    pub devmajor: u32,

    /// Minor device number for char/block devices.
    pub devminor: u32,

    /// Extended attributes from PAX `SCHILY.xattr.*` records.
    pub xattrs: Xattrs,
}

impl FileMetadata {
    pub fn is_regular_file(&self) -> bool {
        self.file_type == FileType::Reg
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Dir
    }

    /// Symlink or hardlink; the target is in `linkname`.
    pub fn is_link(&self) -> bool {
        matches!(self.file_type, FileType::Symlink | FileType::Hardlink)
    }
}

/// Ordered per-file metadata records, in tar order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Toc {
    pub entries: Vec<FileMetadata>,
}

/// The random-access index over the compressed stream.
///
/// `checkpoints` is opaque outside the compression backend that produced it:
/// the outer schema never describes decompressor state, so backends can
/// evolve their encoding freely as long as round-trip equality holds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompressionInfo {
    /// Index of the last recorded span; spans are numbered from 0.
    pub max_span_id: SpanId,

    /// Configured uncompressed bytes per span.
    pub span_size: u64,

    /// Algorithm-private checkpoint records.
    #[serde(with = "serde_bytes_vec")]
    pub checkpoints: Vec<u8>,
}

// Serialize the checkpoint blob as a plain byte array in the JSON view.
mod serde_bytes_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        Vec::<u8>::deserialize(d)
    }
}

/// The ztoc for one layer: TOC plus compression index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ztoc {
    /// Schema version tag.
    pub version: Version,

    /// Free-form label identifying the producer.
    pub build_tool_id: String,

    /// Size of the compressed layer in bytes.
    pub compressed_archive_size: u64,

    /// Size of the uncompressed tar stream in bytes.
    pub uncompressed_archive_size: u64,

    /// Compression algorithm of the layer.
    pub compression_algorithm: Algorithm,

    /// Per-file metadata, in tar order.
    pub toc: Toc,

    /// Random-access index.
    pub compression_info: CompressionInfo,
}

impl Ztoc {
    /// Look up the metadata entry for `name` (first match, linear scan).
    pub fn file_metadata(&self, name: &str) -> Option<&FileMetadata> {
        self.toc.entries.iter().find(|e| e.name == name)
    }

    /// Check the TOC invariants: entries appear in non-decreasing offset
    /// order, and every regular file fits inside the uncompressed stream.
    ///
    /// The builder runs this before returning a ztoc. Deserialized ztocs are
    /// not re-checked automatically; callers ingesting ztocs from untrusted
    /// sources should call this themselves.
    pub fn validate(&self) -> Result<()> {
        let mut prev_offset = 0u64;
        for entry in &self.toc.entries {
            if entry.uncompressed_offset < prev_offset {
                return Err(ZtocError::Corrupt(format!(
                    "toc out of order: entry {} at offset {} after offset {}",
                    entry.name, entry.uncompressed_offset, prev_offset
                )));
            }
            prev_offset = entry.uncompressed_offset;

            if entry.is_regular_file() {
                let end = entry
                    .uncompressed_offset
                    .checked_add(entry.uncompressed_size)
                    .ok_or_else(|| {
                        ZtocError::Corrupt(format!("entry {} size overflows", entry.name))
                    })?;
                if end > self.uncompressed_archive_size {
                    return Err(ZtocError::Corrupt(format!(
                        "entry {} extends to {} beyond archive size {}",
                        entry.name, end, self.uncompressed_archive_size
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(name: &str, offset: u64, size: u64) -> FileMetadata {
        FileMetadata {
            name: name.to_string(),
            uncompressed_offset: offset,
            uncompressed_size: size,
            ..Default::default()
        }
    }

    fn ztoc_with(entries: Vec<FileMetadata>, archive_size: u64) -> Ztoc {
        Ztoc {
            version: Version::CURRENT,
            build_tool_id: "test".to_string(),
            compressed_archive_size: 0,
            uncompressed_archive_size: archive_size,
            compression_algorithm: Algorithm::Gzip,
            toc: Toc { entries },
            compression_info: CompressionInfo::default(),
        }
    }

    #[test]
    fn test_version_tags() {
        assert_eq!(Version::CURRENT.as_str(), "0.9");
        assert_eq!(Version::from_tag("0.9").unwrap(), Version::V0_9);
        assert!(matches!(
            Version::from_tag("1.0"),
            Err(ZtocError::SchemaVersion(_))
        ));
    }

    #[test]
    fn test_filetype_from_typeflag() {
        assert_eq!(FileType::from_typeflag(b'0'), FileType::Reg);
        assert_eq!(FileType::from_typeflag(b'\0'), FileType::Reg);
        assert_eq!(FileType::from_typeflag(b'1'), FileType::Hardlink);
        assert_eq!(FileType::from_typeflag(b'2'), FileType::Symlink);
        assert_eq!(FileType::from_typeflag(b'5'), FileType::Dir);
        assert_eq!(FileType::from_typeflag(b'S'), FileType::Other);
    }

    #[test]
    fn test_filetype_wire_tags_roundtrip() {
        for ft in [
            FileType::Reg,
            FileType::Dir,
            FileType::Symlink,
            FileType::Hardlink,
            FileType::Char,
            FileType::Block,
            FileType::Fifo,
            FileType::Other,
        ] {
            assert_eq!(FileType::from_wire_tag(ft.wire_tag()).unwrap(), ft);
        }
        assert!(FileType::from_wire_tag(200).is_err());
    }

    #[test]
    fn test_xattrs_preserve_order() {
        let mut x = Xattrs::new();
        x.push("z".to_string(), "1".to_string());
        x.push("a".to_string(), "2".to_string());
        let keys: Vec<_> = x.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, ["z", "a"]);
        assert_eq!(x.get("a"), Some("2"));
        assert_eq!(x.get("missing"), None);
    }

    #[test]
    fn test_validate_accepts_ordered_toc() {
        let z = ztoc_with(vec![reg("a", 512, 100), reg("b", 1124, 0)], 2048);
        assert!(z.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_order() {
        let z = ztoc_with(vec![reg("a", 1024, 10), reg("b", 512, 10)], 4096);
        assert!(matches!(z.validate(), Err(ZtocError::Corrupt(_))));
    }

    #[test]
    fn test_validate_rejects_overlong_entry() {
        let z = ztoc_with(vec![reg("a", 512, 10_000)], 2048);
        assert!(matches!(z.validate(), Err(ZtocError::Corrupt(_))));
    }

    #[test]
    fn test_validate_rejects_size_overflow() {
        let z = ztoc_with(vec![reg("a", u64::MAX - 1, 2)], u64::MAX);
        assert!(matches!(z.validate(), Err(ZtocError::Corrupt(_))));
    }
}
