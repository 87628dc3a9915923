//! File extraction: ztoc + random-access compressed source → file bytes.
//!
//! An extraction translates a file name into a byte range of the
//! uncompressed tar stream via the TOC, then asks the compression index for
//! exactly that range. Nothing here mutates the ztoc: calls are re-entrant
//! and lock-free, and concurrent extractions only need independently
//! positioned sources.

use std::ops::Range;
use std::path::Path;

use crate::cancel::CancelToken;
use crate::compression;
use crate::error::{Result, ZtocError};
use crate::source::RangeReader;
use crate::ztoc::{FileMetadata, Ztoc};

/// Extract the complete contents of the regular file `name`.
///
/// Symlinks and hardlinks have no payload and fail with
/// [`ZtocError::WrongType`]; their targets are metadata, available through
/// [`Ztoc::file_metadata`]. Zero-size entries return an empty buffer
/// without touching `src`.
pub fn extract_file<S: RangeReader + ?Sized>(ztoc: &Ztoc, src: &S, name: &str) -> Result<Vec<u8>> {
    extract_inner(ztoc, src, name, None, None)
}

/// [`extract_file`] honoring a cancellation token between decompression
/// chunks.
pub fn extract_file_cancellable<S: RangeReader + ?Sized>(
    ztoc: &Ztoc,
    src: &S,
    name: &str,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    extract_inner(ztoc, src, name, None, Some(cancel))
}

/// Extract the sub-range `[range.start, range.end)` of the regular file
/// `name`. Requests outside the file fail with [`ZtocError::OutOfBounds`];
/// an empty range returns an empty buffer without touching `src`.
pub fn extract_range<S: RangeReader + ?Sized>(
    ztoc: &Ztoc,
    src: &S,
    name: &str,
    range: Range<u64>,
) -> Result<Vec<u8>> {
    extract_inner(ztoc, src, name, Some(range), None)
}

/// [`extract_range`] honoring a cancellation token between decompression
/// chunks.
pub fn extract_range_cancellable<S: RangeReader + ?Sized>(
    ztoc: &Ztoc,
    src: &S,
    name: &str,
    range: Range<u64>,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    extract_inner(ztoc, src, name, Some(range), Some(cancel))
}

/// Convenience: extract `name` from a gzipped tar on disk using its ztoc.
pub fn extract_from_targz(path: impl AsRef<Path>, ztoc: &Ztoc, name: &str) -> Result<Vec<u8>> {
    let file = std::fs::File::open(path.as_ref())?;
    extract_file(ztoc, &file, name)
}

fn extract_inner<S: RangeReader + ?Sized>(
    ztoc: &Ztoc,
    src: &S,
    name: &str,
    range: Option<Range<u64>>,
    cancel: Option<&CancelToken>,
) -> Result<Vec<u8>> {
    let entry = lookup(ztoc, name)?;
    if !entry.is_regular_file() {
        return Err(ZtocError::WrongType(name.to_string()));
    }

    let (start, end) = match range {
        None => (0, entry.uncompressed_size),
        Some(r) => {
            if r.start > r.end || r.end > entry.uncompressed_size {
                return Err(ZtocError::OutOfBounds(format!(
                    "{}..{} of {} ({} bytes)",
                    r.start, r.end, name, entry.uncompressed_size
                )));
            }
            (r.start, r.end)
        }
    };
    if start == end {
        return Ok(Vec::new());
    }

    compression::extract(
        ztoc.compression_algorithm,
        src,
        &ztoc.compression_info.checkpoints,
        entry.uncompressed_offset + start,
        entry.uncompressed_offset + end,
        cancel,
    )
}

fn lookup<'z>(ztoc: &'z Ztoc, name: &str) -> Result<&'z FileMetadata> {
    ztoc.file_metadata(name)
        .ok_or_else(|| ZtocError::NotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn fixture() -> (Vec<u8>, Vec<u8>) {
        let content: Vec<u8> = (0..30_000u32).map(|i| (i * 17 % 253) as u8).collect();
        let mut b = tar::Builder::new(Vec::new());

        let mut h = tar::Header::new_ustar();
        h.set_size(content.len() as u64);
        h.set_mode(0o644);
        h.set_uid(0);
        h.set_gid(0);
        h.set_device_major(0).unwrap();
        h.set_device_minor(0).unwrap();
        h.set_cksum();
        b.append_data(&mut h, "data.bin", content.as_slice()).unwrap();

        let mut h = tar::Header::new_ustar();
        h.set_size(0);
        h.set_mode(0o644);
        h.set_uid(0);
        h.set_gid(0);
        h.set_device_major(0).unwrap();
        h.set_device_minor(0).unwrap();
        h.set_cksum();
        b.append_data(&mut h, "empty", &b""[..]).unwrap();

        let mut h = tar::Header::new_ustar();
        h.set_entry_type(tar::EntryType::Symlink);
        h.set_size(0);
        h.set_mode(0o777);
        h.set_uid(0);
        h.set_gid(0);
        h.set_device_major(0).unwrap();
        h.set_device_minor(0).unwrap();
        b.append_link(&mut h, "alias", "data.bin").unwrap();

        let tar_bytes = b.into_inner().unwrap();
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&tar_bytes).unwrap();
        (enc.finish().unwrap(), content)
    }

    fn build(targz: &[u8]) -> Ztoc {
        Builder::new("extract tests")
            .with_span_size(4096)
            .build(targz)
            .unwrap()
    }

    #[test]
    fn test_extract_whole_file() {
        let (targz, content) = fixture();
        let ztoc = build(&targz);
        let got = extract_file(&ztoc, targz.as_slice(), "data.bin").unwrap();
        assert_eq!(got, content);
    }

    #[test]
    fn test_extract_subranges_match_full_read() {
        let (targz, content) = fixture();
        let ztoc = build(&targz);
        for (a, b) in [(0u64, 100u64), (4000, 9000), (29_900, 30_000)] {
            let got = extract_range(&ztoc, targz.as_slice(), "data.bin", a..b).unwrap();
            assert_eq!(got, &content[a as usize..b as usize]);
        }
    }

    #[test]
    fn test_empty_entry_and_empty_range() {
        let (targz, _) = fixture();
        let ztoc = build(&targz);
        assert!(extract_file(&ztoc, targz.as_slice(), "empty").unwrap().is_empty());
        // a == b never touches the source: an empty one works fine.
        let empty_src: &[u8] = &[];
        assert!(extract_range(&ztoc, empty_src, "data.bin", 7..7).unwrap().is_empty());
    }

    #[test]
    fn test_missing_entry() {
        let (targz, _) = fixture();
        let ztoc = build(&targz);
        let err = extract_file(&ztoc, targz.as_slice(), "nope").unwrap_err();
        assert!(matches!(err, ZtocError::NotFound(_)));
    }

    #[test]
    fn test_symlink_is_wrong_type_with_metadata() {
        let (targz, _) = fixture();
        let ztoc = build(&targz);
        let err = extract_file(&ztoc, targz.as_slice(), "alias").unwrap_err();
        assert!(matches!(err, ZtocError::WrongType(_)));
        // The link target is surfaced as metadata instead.
        assert_eq!(ztoc.file_metadata("alias").unwrap().linkname, "data.bin");
    }

    #[test]
    fn test_out_of_bounds() {
        let (targz, _) = fixture();
        let ztoc = build(&targz);
        for range in [0..30_001u64, 30_001..30_002, 10..5] {
            let err =
                extract_range(&ztoc, targz.as_slice(), "data.bin", range.clone()).unwrap_err();
            assert!(matches!(err, ZtocError::OutOfBounds(_)), "range {:?}", range);
        }
    }

    #[test]
    fn test_cancellation() {
        let (targz, _) = fixture();
        let ztoc = build(&targz);
        let token = CancelToken::new();
        token.cancel();
        let err =
            extract_file_cancellable(&ztoc, targz.as_slice(), "data.bin", &token).unwrap_err();
        assert!(matches!(err, ZtocError::Cancelled));
    }
}
