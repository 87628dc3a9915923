#![forbid(unsafe_code)]
//! Random-access indexes (ztocs) for gzipped tar layers.
//!
//! A container layer is a gzipped tar blob: to read one file the usual way,
//! the whole layer has to be fetched and decompressed. This library builds a
//! **ztoc** (zipped table of contents) for a layer once, and afterwards any
//! file's bytes can be produced from the compressed blob alone by fetching
//! and decompressing only the ranges actually needed.
//!
//! A ztoc records two things:
//!
//! - **TOC**: per-file metadata (name, type, ownership, xattrs, and the
//!   file's offset and size in the uncompressed tar stream), in tar order
//! - **Compression index**: decompression checkpoints (bit-aligned input
//!   positions plus 32 KiB window snapshots) dense enough to resume gzip
//!   decompression near any uncompressed offset
//!
//! # Example
//!
//! ```no_run
//! use ztoc_rs::{codec, extract_file, Builder};
//!
//! // Build once per layer.
//! let ztoc = Builder::new("my-tool").build_from_file("layer.tar.gz")?;
//!
//! // Persist as a content-addressed blob.
//! let (blob, descriptor) = codec::marshal(&ztoc)?;
//! println!("{} ({} bytes)", descriptor.digest, descriptor.size);
//!
//! // Read one file straight out of the compressed layer.
//! let layer = std::fs::File::open("layer.tar.gz")?;
//! let bytes = extract_file(&ztoc, &layer, "etc/os-release")?;
//! # let _ = (blob, bytes);
//! # Ok::<(), ztoc_rs::ZtocError>(())
//! ```
//!
//! # Architecture
//!
//! - [`builder`] decompresses a layer exactly once, teeing output into the
//!   tar walker while the gzip backend captures checkpoints
//! - [`codec`] serializes ztocs in a stable, deterministic binary format;
//!   the sha256 of the serialized bytes is the ztoc's identity
//! - [`extract`] turns (ztoc, compressed source, file name) into bytes by
//!   restarting decompression at the nearest checkpoint
//! - [`source`] defines the random-access source abstraction; any reader
//!   with `read_at`/`size` (local file, HTTP range client) plugs in
//!
//! The ztoc value itself is immutable after construction and safe to share
//! across concurrent readers without locks. Everything that blocks (reading
//! the compressed source, spooling during a build) happens on
//! caller-supplied handles.

pub mod builder;
pub mod cancel;
pub mod codec;
pub mod compression;
pub mod error;
pub mod extract;
pub mod source;
pub mod ztoc;

mod tar_index;
mod wire;

pub use builder::{Builder, DEFAULT_SPAN_SIZE};
pub use cancel::CancelToken;
pub use codec::{
    marshal, unmarshal, Descriptor, INDEX_MANIFEST_MEDIA_TYPE, ZTOC_MEDIA_TYPE,
};
pub use compression::{Algorithm, SpanId};
pub use error::{Result, ZtocError};
pub use extract::{
    extract_file, extract_file_cancellable, extract_from_targz, extract_range,
    extract_range_cancellable,
};
pub use source::{RangeReader, SectionReader};
pub use ztoc::{
    CompressionInfo, FileMetadata, FileType, ModTime, Toc, Version, Xattrs, Ztoc,
};
