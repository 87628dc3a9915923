//! Compression backends for the random-access index.
//!
//! Each backend knows how to capture restart checkpoints while streaming a
//! compressed source and how to resume decompression from one. Gzip is the
//! only required algorithm; the [`Algorithm`] enum is the extension slot for
//! future formats whose state admits capture.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::{Result, ZtocError};
use crate::source::RangeReader;

pub(crate) mod gzip;
mod inflate;

pub(crate) use gzip::GzipIndex;

/// Identifier of one span in the compression index. Spans are numbered from
/// 0 in uncompressed-stream order.
pub type SpanId = u32;

/// Compression algorithm of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    #[default]
    Gzip,
}

impl Algorithm {
    /// Textual tag as stored in the serialized ztoc.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Gzip => "gzip",
        }
    }

    /// Parse an on-disk tag, rejecting unknown algorithms.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "gzip" => Ok(Algorithm::Gzip),
            other => Err(ZtocError::UnsupportedFormat(format!(
                "unknown compression algorithm {:?}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the checkpoint index for `src`, teeing decompressed output into
/// `out`.
pub(crate) fn build_index<R: Read, W: Write>(
    algorithm: Algorithm,
    src: R,
    span_size: u64,
    out: &mut W,
) -> Result<GzipIndex> {
    match algorithm {
        Algorithm::Gzip => gzip::build_index(src, span_size, out),
    }
}

/// Extract the uncompressed range `[lo, hi)` from a random-access compressed
/// source using a previously captured checkpoint blob.
pub(crate) fn extract<S: RangeReader + ?Sized>(
    algorithm: Algorithm,
    src: &S,
    checkpoints: &[u8],
    lo: u64,
    hi: u64,
    cancel: Option<&CancelToken>,
) -> Result<Vec<u8>> {
    match algorithm {
        Algorithm::Gzip => gzip::extract(src, checkpoints, lo, hi, cancel),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_tags() {
        assert_eq!(Algorithm::Gzip.as_str(), "gzip");
        assert_eq!(Algorithm::from_tag("gzip").unwrap(), Algorithm::Gzip);
        assert!(matches!(
            Algorithm::from_tag("zstd"),
            Err(ZtocError::UnsupportedFormat(_))
        ));
    }
}
