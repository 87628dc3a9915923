//! Tar walker: per-member metadata from the uncompressed stream.
//!
//! Consumes the decompressed output of the compression index during a build
//! and emits one [`FileMetadata`] per tar member, in stream order. The
//! `uncompressed_offset` of each record points at the member's first payload
//! byte, which is what lets extraction translate a file read into a plain
//! byte range over the uncompressed stream.
//!
//! PAX records supply what the ustar header cannot: nanosecond `mtime` and
//! `SCHILY.xattr.*` extended attributes. GNU long names and link targets are
//! resolved by the tar crate before entries reach this module.
//!
//! A malformed header aborts the walk: skipping a member would silently
//! shift every following offset.

use std::io::Read;

use crate::error::{Result, ZtocError};
use crate::ztoc::{FileMetadata, FileType, ModTime, Xattrs};

/// PAX record prefix carrying extended attributes.
const PAX_XATTR_PREFIX: &str = "SCHILY.xattr.";

/// PAX record holding a (possibly fractional) modification time.
const PAX_MTIME: &str = "mtime";

fn malformed(err: std::io::Error) -> ZtocError {
    ZtocError::MalformedTar(err.to_string())
}

/// Walk an uncompressed tar stream, returning metadata for every member.
pub(crate) fn walk<R: Read>(reader: R) -> Result<Vec<FileMetadata>> {
    let mut archive = tar::Archive::new(reader);
    let mut entries = Vec::new();

    for entry in archive.entries().map_err(malformed)? {
        let mut entry = entry.map_err(malformed)?;

        let uncompressed_offset = entry.raw_file_position();
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let linkname = entry
            .link_name_bytes()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default();

        let header = entry.header();
        let file_type = FileType::from_typeflag(header.entry_type().as_byte());
        let uncompressed_size = header.entry_size().map_err(malformed)?;
        let mode = header.mode().map_err(malformed)?;
        let uid = narrow_id(header.uid().map_err(malformed)?, &name)?;
        let gid = narrow_id(header.gid().map_err(malformed)?, &name)?;
        let uname = header
            .username()
            .ok()
            .flatten()
            .unwrap_or_default()
            .to_string();
        let gname = header
            .groupname()
            .ok()
            .flatten()
            .unwrap_or_default()
            .to_string();
        let devmajor = header.device_major().map_err(malformed)?.unwrap_or(0);
        let devminor = header.device_minor().map_err(malformed)?.unwrap_or(0);
        let mut modtime = ModTime::new(header.mtime().map_err(malformed)? as i64, 0);

        let mut xattrs = Xattrs::new();
        if let Some(extensions) = entry.pax_extensions().map_err(malformed)? {
            for ext in extensions {
                let ext = ext.map_err(malformed)?;
                let Ok(key) = ext.key() else {
                    continue;
                };
                if let Some(attr) = key.strip_prefix(PAX_XATTR_PREFIX) {
                    let value = String::from_utf8_lossy(ext.value_bytes()).into_owned();
                    xattrs.push(attr.to_string(), value);
                } else if key == PAX_MTIME {
                    if let Some(t) = ext.value().ok().and_then(parse_pax_time) {
                        modtime = t;
                    }
                }
            }
        }

        entries.push(FileMetadata {
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
            modtime,
            devmajor,
            devminor,
            xattrs,
        });
    }

    Ok(entries)
}

fn narrow_id(id: u64, name: &str) -> Result<u32> {
    u32::try_from(id)
        .map_err(|_| ZtocError::MalformedTar(format!("entry {}: owner id {} out of range", name, id)))
}

/// Parse a PAX time value: decimal seconds with an optional fractional part,
/// e.g. `"1672531200.123456789"`. Fractions beyond nanoseconds are dropped.
fn parse_pax_time(value: &str) -> Option<ModTime> {
    let (secs, frac) = match value.split_once('.') {
        Some((s, f)) => (s, Some(f)),
        None => (value, None),
    };
    let secs: i64 = secs.parse().ok()?;
    let nanos = match frac {
        Some(f) => {
            let digits: String = f.chars().take(9).collect();
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let scale = 10u32.pow(9 - digits.len() as u32);
            digits.parse::<u32>().ok()? * scale
        }
        None => 0,
    };
    Some(ModTime { secs, nanos })
}
