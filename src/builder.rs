//! Ztoc construction: one pass over a gzipped tar.
//!
//! The build drives the compression index and the tar walker together: the
//! index decompresses the stream exactly once, teeing its output into a
//! spooled temporary file while capturing checkpoints, and the walker then
//! reads member metadata back off the spool. Small layers never touch disk;
//! large ones spill past a fixed memory cap.
//!
//! Builds are single-threaded per ztoc (decompression state is inherently
//! sequential), but any number of builds may run in parallel on independent
//! inputs. Failure is fatal: a partial ztoc is never returned.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tempfile::SpooledTempFile;

use crate::compression::{self, Algorithm};
use crate::error::{Result, ZtocError};
use crate::tar_index;
use crate::ztoc::{CompressionInfo, Toc, Version, Ztoc};

/// Default uncompressed bytes per checkpoint span (1 MiB). Smaller spans
/// seek faster and cost more index bytes.
pub const DEFAULT_SPAN_SIZE: u64 = 1 << 20;

/// Decompressed data is spooled in memory up to this size before spilling
/// to a temporary file.
const SPOOL_MEMORY_LIMIT: usize = 32 * 1024 * 1024;

/// Builds ztocs for gzipped tar layers.
///
/// # Example
///
/// ```no_run
/// use ztoc_rs::Builder;
///
/// let ztoc = Builder::new("ztoc-rs-cli")
///     .with_span_size(1 << 20)
///     .build_from_file("layer.tar.gz")?;
/// println!("{} entries", ztoc.toc.entries.len());
/// # Ok::<(), ztoc_rs::ZtocError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Builder {
    build_tool_id: String,
    span_size: u64,
    algorithm: Algorithm,
}

impl Builder {
    /// Create a builder. `build_tool_id` is stored verbatim in every ztoc
    /// this builder produces.
    pub fn new(build_tool_id: impl Into<String>) -> Self {
        Self {
            build_tool_id: build_tool_id.into(),
            span_size: DEFAULT_SPAN_SIZE,
            algorithm: Algorithm::default(),
        }
    }

    /// Set the uncompressed span size in bytes.
    pub fn with_span_size(mut self, span_size: u64) -> Self {
        self.span_size = span_size;
        self
    }

    /// Select the compression algorithm of the input layers.
    pub fn with_compression(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Build a ztoc from a compressed stream.
    pub fn build<R: Read>(&self, src: R) -> Result<Ztoc> {
        if self.span_size == 0 {
            return Err(ZtocError::InvalidConfig(
                "span_size must be non-zero".to_string(),
            ));
        }

        let mut spool = SpooledTempFile::new(SPOOL_MEMORY_LIMIT);
        let index = compression::build_index(self.algorithm, src, self.span_size, &mut spool)?;

        spool.seek(SeekFrom::Start(0))?;
        let entries = tar_index::walk(&mut spool)?;

        tracing::debug!(
            entries = entries.len(),
            max_span_id = index.max_span_id,
            compressed = index.compressed_size,
            uncompressed = index.uncompressed_size,
            "ztoc built"
        );

        let ztoc = Ztoc {
            version: Version::CURRENT,
            build_tool_id: self.build_tool_id.clone(),
            compressed_archive_size: index.compressed_size,
            uncompressed_archive_size: index.uncompressed_size,
            compression_algorithm: self.algorithm,
            toc: Toc { entries },
            compression_info: CompressionInfo {
                max_span_id: index.max_span_id,
                span_size: self.span_size,
                checkpoints: index.checkpoints,
            },
        };
        ztoc.validate()?;
        Ok(ztoc)
    }

    /// Build a ztoc from a compressed layer on disk.
    pub fn build_from_file(&self, path: impl AsRef<Path>) -> Result<Ztoc> {
        let file = std::fs::File::open(path.as_ref())?;
        self.build(file)
    }
}
