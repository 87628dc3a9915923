//! Binary serialization of ztocs.
//!
//! The on-disk form is a fixed little-endian layout: a header carrying the
//! schema version and an offset-table prologue, a TOC block, and a
//! compression block. Field order, endianness and string encoding are part
//! of the contract: two implementations serializing the same ztoc must
//! produce the same bytes, because the sha256 of the serialized form is the
//! ztoc's identity in the content store.
//!
//! ```text
//! header:  magic "ZTOCIDX\0"
//!          version            str32
//!          build_tool_id      str32
//!          compressed_archive_size    u64
//!          uncompressed_archive_size  u64
//!          compression_algorithm      str32
//!          toc_off u64 | toc_len u64 | cmp_off u64 | cmp_len u64
//! toc:     entry_count u32, then per entry:
//!          name str32 | type u8 | uncompressed_offset u64 |
//!          uncompressed_size u64 | linkname str32 | mode u32 |
//!          uid u32 | gid u32 | uname str32 | gname str32 |
//!          modtime_secs i64 | modtime_nanos u32 |
//!          devmajor u32 | devminor u32 |
//!          xattr_count u32 + (key str32, value str32) pairs
//! cmp:     span_size u64 | max_span_id u32 |
//!          checkpoints u64-length-prefixed bytes
//! ```
//!
//! `str32` is a u32 byte length followed by UTF-8 bytes, never
//! zero-terminated. Blocks are contiguous and fully consumed: slack anywhere
//! is `Corrupt`. Adding a field requires a new version tag; readers refuse
//! tags they do not know rather than skipping unknown fields, which would
//! make digests meaningless.

use std::io::Read;

use sha2::{Digest as _, Sha256};

use crate::error::{Result, ZtocError};
use crate::wire::{ByteReader, ByteWriter};
use crate::compression::Algorithm;
use crate::ztoc::{
    CompressionInfo, FileMetadata, FileType, ModTime, Toc, Version, Xattrs, Ztoc,
};

/// Media type of a serialized ztoc blob.
pub const ZTOC_MEDIA_TYPE: &str = "application/vnd.ztoc.v1+binary";

/// Media type of the index manifest that references ztoc blobs. The
/// manifest format itself belongs to the image-artifact layer.
pub const INDEX_MANIFEST_MEDIA_TYPE: &str = "application/vnd.ztoc.index.v1+json";

const MAGIC: &[u8; 8] = b"ZTOCIDX\0";

/// Content descriptor of a serialized ztoc: media type, sha256 digest and
/// byte size. The digest is the blob's key in the content-addressed store.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    /// `sha256:<hex>` over the serialized bytes.
    pub digest: String,
    pub size: u64,
}

/// Serialize a ztoc, returning the blob and its content descriptor.
///
/// Marshalling is deterministic: the same ztoc always yields the same bytes
/// and therefore the same digest.
pub fn marshal(ztoc: &Ztoc) -> Result<(Vec<u8>, Descriptor)> {
    let mut w = ByteWriter::new();
    w.bytes(MAGIC);
    w.string(ztoc.version.as_str());
    w.string(&ztoc.build_tool_id);
    w.u64(ztoc.compressed_archive_size);
    w.u64(ztoc.uncompressed_archive_size);
    w.string(ztoc.compression_algorithm.as_str());

    // Offset-table prologue, backpatched once the blocks are laid out.
    let table_pos = w.len();
    for _ in 0..4 {
        w.u64(0);
    }

    let toc_off = w.len() as u64;
    w.u32(ztoc.toc.entries.len() as u32);
    for entry in &ztoc.toc.entries {
        write_entry(&mut w, entry);
    }
    let toc_len = w.len() as u64 - toc_off;

    let cmp_off = w.len() as u64;
    w.u64(ztoc.compression_info.span_size);
    w.u32(ztoc.compression_info.max_span_id);
    w.blob(&ztoc.compression_info.checkpoints);
    let cmp_len = w.len() as u64 - cmp_off;

    w.patch_u64(table_pos, toc_off);
    w.patch_u64(table_pos + 8, toc_len);
    w.patch_u64(table_pos + 16, cmp_off);
    w.patch_u64(table_pos + 24, cmp_len);

    let bytes = w.into_vec();
    let descriptor = Descriptor {
        media_type: ZTOC_MEDIA_TYPE.to_string(),
        digest: format!("sha256:{:x}", Sha256::digest(&bytes)),
        size: bytes.len() as u64,
    };
    Ok((bytes, descriptor))
}

/// Deserialize a ztoc.
///
/// Fails with [`SchemaVersion`] on unknown version tags, [`Corrupt`] on
/// structural inconsistency and [`Truncated`] when the input ends mid-field.
/// Never panics, whatever the input.
///
/// [`SchemaVersion`]: ZtocError::SchemaVersion
/// [`Corrupt`]: ZtocError::Corrupt
/// [`Truncated`]: ZtocError::Truncated
pub fn unmarshal<R: Read>(mut reader: R) -> Result<Ztoc> {
    let mut blob = Vec::new();
    reader.read_to_end(&mut blob)?;

    let mut r = ByteReader::new(&blob);
    if r.take(MAGIC.len())? != &MAGIC[..] {
        return Err(ZtocError::Corrupt("bad magic".to_string()));
    }
    let version = Version::from_tag(&r.string()?)?;
    let build_tool_id = r.string()?;
    let compressed_archive_size = r.u64()?;
    let uncompressed_archive_size = r.u64()?;
    let compression_algorithm = Algorithm::from_tag(&r.string()?)?;

    let toc_off = r.u64()?;
    let toc_len = r.u64()?;
    let cmp_off = r.u64()?;
    let cmp_len = r.u64()?;
    let header_len = (blob.len() - r.remaining()) as u64;

    // The blocks written by marshal are contiguous and exactly fill the
    // blob; anything else is structural corruption.
    if toc_off != header_len
        || cmp_off != toc_off.checked_add(toc_len).ok_or_else(bad_prologue)?
        || cmp_off.checked_add(cmp_len).ok_or_else(bad_prologue)? != blob.len() as u64
    {
        return Err(bad_prologue());
    }

    let toc = read_toc(&blob[toc_off as usize..(toc_off + toc_len) as usize])?;
    let compression_info = read_compression(&blob[cmp_off as usize..(cmp_off + cmp_len) as usize])?;

    Ok(Ztoc {
        version,
        build_tool_id,
        compressed_archive_size,
        uncompressed_archive_size,
        compression_algorithm,
        toc,
        compression_info,
    })
}

fn bad_prologue() -> ZtocError {
    ZtocError::Corrupt("offset table does not match blob layout".to_string())
}

fn write_entry(w: &mut ByteWriter, entry: &FileMetadata) {
    w.string(&entry.name);
    w.u8(entry.file_type.wire_tag());
    w.u64(entry.uncompressed_offset);
    w.u64(entry.uncompressed_size);
    w.string(&entry.linkname);
    w.u32(entry.mode);
    w.u32(entry.uid);
    w.u32(entry.gid);
    w.string(&entry.uname);
    w.string(&entry.gname);
    w.i64(entry.modtime.secs);
    w.u32(entry.modtime.nanos);
    w.u32(entry.devmajor);
    w.u32(entry.devminor);
    w.u32(entry.xattrs.len() as u32);
    for (key, value) in entry.xattrs.iter() {
        w.string(key);
        w.string(value);
    }
}

fn read_entry(r: &mut ByteReader<'_>) -> Result<FileMetadata> {
    let name = r.string()?;
    let file_type = FileType::from_wire_tag(r.u8()?)?;
    let uncompressed_offset = r.u64()?;
    let uncompressed_size = r.u64()?;
    let linkname = r.string()?;
    let mode = r.u32()?;
    let uid = r.u32()?;
    let gid = r.u32()?;
    let uname = r.string()?;
    let gname = r.string()?;
    let secs = r.i64()?;
    let nanos = r.u32()?;
    if nanos >= 1_000_000_000 {
        return Err(ZtocError::Corrupt(format!(
            "entry {}: {} nanoseconds",
            name, nanos
        )));
    }
    let devmajor = r.u32()?;
    let devminor = r.u32()?;
    let xattr_count = r.u32()?;
    let mut xattrs = Xattrs::new();
    for _ in 0..xattr_count {
        let key = r.string()?;
        let value = r.string()?;
        xattrs.push(key, value);
    }
    Ok(FileMetadata {
        name,
        file_type,
        uncompressed_offset,
        uncompressed_size,
        linkname,
        mode,
        uid,
        gid,
        uname,
        gname,
        modtime: ModTime { secs, nanos },
        devmajor,
        devminor,
        xattrs,
    })
}

fn read_toc(block: &[u8]) -> Result<Toc> {
    let mut r = ByteReader::new(block);
    let count = r.u32()?;
    let mut entries = Vec::new();
    for _ in 0..count {
        entries.push(read_entry(&mut r)?);
    }
    if r.remaining() != 0 {
        return Err(ZtocError::Corrupt(
            "trailing bytes in toc block".to_string(),
        ));
    }
    Ok(Toc { entries })
}

fn read_compression(block: &[u8]) -> Result<CompressionInfo> {
    let mut r = ByteReader::new(block);
    let span_size = r.u64()?;
    let max_span_id = r.u32()?;
    let checkpoints = r.blob()?.to_vec();
    if r.remaining() != 0 {
        return Err(ZtocError::Corrupt(
            "trailing bytes in compression block".to_string(),
        ));
    }
    Ok(CompressionInfo {
        max_span_id,
        span_size,
        checkpoints,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ztoc() -> Ztoc {
        let mut xattrs = Xattrs::new();
        xattrs.push("user.purpose".to_string(), "testing".to_string());
        Ztoc {
            version: Version::CURRENT,
            build_tool_id: "codec tests".to_string(),
            compressed_archive_size: 1234,
            uncompressed_archive_size: 56789,
            compression_algorithm: Algorithm::Gzip,
            toc: Toc {
                entries: vec![
                    FileMetadata {
                        name: "usr/bin/true".to_string(),
                        file_type: FileType::Reg,
                        uncompressed_offset: 512,
                        uncompressed_size: 4000,
                        mode: 0o755,
                        uid: 0,
                        gid: 0,
                        uname: "root".to_string(),
                        gname: "root".to_string(),
                        modtime: ModTime::new(1_650_000_000, 123_456_789),
                        xattrs,
                        ..Default::default()
                    },
                    FileMetadata {
                        name: "usr/bin/sh".to_string(),
                        file_type: FileType::Symlink,
                        uncompressed_offset: 5120,
                        linkname: "true".to_string(),
                        ..Default::default()
                    },
                ],
            },
            compression_info: CompressionInfo {
                max_span_id: 7,
                span_size: 1 << 20,
                checkpoints: vec![1, 2, 3, 4, 5, 6, 7, 8],
            },
        }
    }

    #[test]
    fn test_roundtrip() {
        let ztoc = sample_ztoc();
        let (bytes, descriptor) = marshal(&ztoc).unwrap();
        assert_eq!(descriptor.size, bytes.len() as u64);
        assert_eq!(descriptor.media_type, ZTOC_MEDIA_TYPE);
        assert!(descriptor.digest.starts_with("sha256:"));

        let back = unmarshal(bytes.as_slice()).unwrap();
        assert_eq!(back, ztoc);
    }

    #[test]
    fn test_marshal_is_deterministic() {
        let ztoc = sample_ztoc();
        let (a, da) = marshal(&ztoc).unwrap();
        let (b, db) = marshal(&ztoc).unwrap();
        assert_eq!(a, b);
        assert_eq!(da, db);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let (mut bytes, _) = marshal(&sample_ztoc()).unwrap();
        // The version string "0.9" sits right after the 8-byte magic and
        // its u32 length.
        assert_eq!(&bytes[12..15], b"0.9");
        bytes[12..15].copy_from_slice(b"9.9");
        let err = unmarshal(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, ZtocError::SchemaVersion(_)));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let (mut bytes, _) = marshal(&sample_ztoc()).unwrap();
        bytes[0] = b'X';
        let err = unmarshal(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, ZtocError::Corrupt(_)));
    }

    #[test]
    fn test_trailing_slack_rejected() {
        let (mut bytes, _) = marshal(&sample_ztoc()).unwrap();
        bytes.push(0);
        let err = unmarshal(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, ZtocError::Corrupt(_)));
    }

    #[test]
    fn test_every_truncation_fails_cleanly() {
        let (bytes, _) = marshal(&sample_ztoc()).unwrap();
        for cut in 0..bytes.len() {
            let result = unmarshal(&bytes[..cut]);
            assert!(result.is_err(), "truncation at {} was accepted", cut);
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(unmarshal(&b""[..]).is_err());
    }
}
