//! Gzip (RFC 1952) checkpoint index: capture during a streaming build,
//! restart for random-access extraction.
//!
//! A checkpoint is taken at the first deflate block boundary at or after
//! each `span_size` multiple of uncompressed output, plus one at stream
//! start and one at every gzip member boundary. Each record carries the
//! compressed byte offset, the 0-7 carry bits of a partially consumed byte,
//! and a snapshot of the 32 KiB history window: everything a fresh decoder
//! needs to resume mid-stream.
//!
//! The serialized checkpoint blob is private to this module. The outer ztoc
//! schema treats it as opaque bytes, so the encoding here can evolve as long
//! as round-trip equality is preserved.

use std::io::{BufReader, Read, Write};

use crate::cancel::CancelToken;
use crate::compression::SpanId;
use crate::error::{Result, ZtocError};
use crate::source::{RangeReader, SectionReader};
use crate::wire::{ByteReader, ByteWriter};

use super::inflate::{BitReader, Inflater, Step, WINDOW_SIZE};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const CM_DEFLATE: u8 = 8;

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;
const FRESERVED: u8 = 0xe0;

/// A restart point captured during the build pass.
#[derive(Debug, Clone)]
struct Checkpoint {
    /// Uncompressed stream offset of the boundary.
    uncomp_offset: u64,
    /// Byte offset of the next whole compressed byte.
    comp_offset: u64,
    /// Count of pending bits from the byte before `comp_offset`.
    carry_bits: u8,
    /// Value of those pending bits, consumption-ordered.
    carry_value: u8,
    /// History window at the boundary, oldest byte first. Shorter than
    /// 32 KiB near member starts; empty exactly at a member boundary.
    window: Vec<u8>,
}

/// Borrowed view of one checkpoint inside a serialized blob. Windows
/// reference the blob rather than being copied per extraction.
struct CheckpointView<'a> {
    uncomp_offset: u64,
    comp_offset: u64,
    carry_bits: u8,
    carry_value: u8,
    window: &'a [u8],
}

/// Result of indexing one gzip stream.
#[derive(Debug)]
pub(crate) struct GzipIndex {
    /// Serialized checkpoint records.
    pub(crate) checkpoints: Vec<u8>,
    /// Index of the last recorded span.
    pub(crate) max_span_id: SpanId,
    /// Total compressed bytes consumed.
    pub(crate) compressed_size: u64,
    /// Total uncompressed bytes produced.
    pub(crate) uncompressed_size: u64,
}

/// Stream `src` end to end, writing every decompressed byte to `out` and
/// capturing checkpoints as span marks are crossed.
pub(crate) fn build_index<R: Read, W: Write>(
    src: R,
    span_size: u64,
    out: &mut W,
) -> Result<GzipIndex> {
    debug_assert!(span_size > 0);
    let mut inf = Inflater::new(BufReader::new(src));
    parse_member_header(&mut inf.bits)?;

    let mut checkpoints = vec![capture(&inf)];
    let mut next_mark = span_size;
    let mut sink = |chunk: &[u8]| -> Result<bool> {
        out.write_all(chunk)?;
        Ok(true)
    };

    loop {
        match inf.step_block(&mut sink)? {
            Step::Stopped => unreachable!("build sink never stops"),
            Step::More => {
                if inf.out_pos() >= next_mark {
                    checkpoints.push(capture(&inf));
                    next_mark = (inf.out_pos() / span_size + 1) * span_size;
                }
            }
            Step::Final => {
                read_member_trailer(&mut inf.bits)?;
                if inf.bits.at_eof()? {
                    break;
                }
                parse_member_header(&mut inf.bits)?;
                inf.reset_window();
                // Member boundaries are natural checkpoints: history resets
                // and the position is byte-aligned.
                checkpoints.push(capture(&inf));
                next_mark = (inf.out_pos() / span_size + 1) * span_size;
            }
        }
    }

    let max_span_id = (checkpoints.len() - 1) as SpanId;
    tracing::debug!(
        spans = checkpoints.len(),
        compressed = inf.bits.bytes_consumed(),
        uncompressed = inf.out_pos(),
        "gzip index built"
    );
    Ok(GzipIndex {
        checkpoints: encode_checkpoints(&checkpoints),
        max_span_id,
        compressed_size: inf.bits.bytes_consumed(),
        uncompressed_size: inf.out_pos(),
    })
}

/// Return the uncompressed bytes `[lo, hi)` by restarting at the latest
/// checkpoint at or before `lo` and decoding forward.
pub(crate) fn extract<S: RangeReader + ?Sized>(
    src: &S,
    checkpoints: &[u8],
    lo: u64,
    hi: u64,
    cancel: Option<&CancelToken>,
) -> Result<Vec<u8>> {
    if lo >= hi {
        return Ok(Vec::new());
    }

    let views = decode_checkpoints(checkpoints)?;
    let idx = views.partition_point(|c| c.uncomp_offset <= lo);
    if idx == 0 {
        return Err(ZtocError::Corrupt(
            "no checkpoint at or before the requested offset".to_string(),
        ));
    }
    let cp = &views[idx - 1];
    tracing::trace!(
        lo,
        hi,
        span = idx - 1,
        comp_offset = cp.comp_offset,
        "restarting decompression from checkpoint"
    );

    let section = BufReader::new(SectionReader::new(src, cp.comp_offset));
    let mut inf = Inflater::resume(
        section,
        cp.carry_value,
        cp.carry_bits,
        cp.window,
        cp.uncomp_offset,
    )?;

    // Output grows as bytes arrive rather than being pre-sized from the
    // request, so an inconsistent ztoc ends in Truncated, not a huge
    // allocation.
    let mut out: Vec<u8> = Vec::new();
    let mut pos = cp.uncomp_offset;
    let mut sink = |chunk: &[u8]| -> Result<bool> {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(ZtocError::Cancelled);
            }
        }
        let chunk_start = pos;
        let chunk_end = pos + chunk.len() as u64;
        pos = chunk_end;
        if chunk_end > lo && chunk_start < hi {
            let s = (lo.max(chunk_start) - chunk_start) as usize;
            let e = (hi.min(chunk_end) - chunk_start) as usize;
            out.extend_from_slice(&chunk[s..e]);
        }
        Ok(pos < hi)
    };

    loop {
        match inf.step_block(&mut sink)? {
            Step::Stopped => break,
            Step::More => {}
            // The sink stops decoding the moment the range is satisfied, so
            // a Final step always means the member genuinely ended short of
            // `hi`: skip the trailer and continue into the next member.
            Step::Final => {
                read_member_trailer(&mut inf.bits)?;
                if inf.bits.at_eof()? {
                    break;
                }
                parse_member_header(&mut inf.bits)?;
                inf.reset_window();
            }
        }
    }

    if out.len() as u64 != hi - lo {
        return Err(ZtocError::Truncated(format!(
            "requested {} uncompressed bytes, stream yielded {}",
            hi - lo,
            out.len()
        )));
    }
    Ok(out)
}

fn capture<R: Read>(inf: &Inflater<R>) -> Checkpoint {
    let (comp_offset, carry_bits, carry_value) = inf.bits.checkpoint_pos();
    Checkpoint {
        uncomp_offset: inf.out_pos(),
        comp_offset,
        carry_bits,
        carry_value,
        window: inf.window_snapshot(),
    }
}

/// Parse one member header, leaving the reader at the first deflate byte.
/// FNAME, FCOMMENT, FEXTRA and FHCRC are skipped; their contents never enter
/// the index.
fn parse_member_header<R: Read>(bits: &mut BitReader<R>) -> Result<()> {
    let mut fixed = [0u8; 10];
    bits.read_aligned(&mut fixed)?;
    if fixed[0..2] != GZIP_MAGIC {
        return Err(ZtocError::UnsupportedFormat(
            "not a gzip stream (bad magic)".to_string(),
        ));
    }
    if fixed[2] != CM_DEFLATE {
        return Err(ZtocError::UnsupportedFormat(format!(
            "unsupported gzip compression method {}",
            fixed[2]
        )));
    }
    let flg = fixed[3];
    if flg & FRESERVED != 0 {
        return Err(ZtocError::UnsupportedFormat(
            "reserved gzip flag bits set".to_string(),
        ));
    }

    if flg & FEXTRA != 0 {
        let mut len = [0u8; 2];
        bits.read_aligned(&mut len)?;
        skip_bytes(bits, u16::from_le_bytes(len) as usize)?;
    }
    if flg & FNAME != 0 {
        skip_zero_terminated(bits)?;
    }
    if flg & FCOMMENT != 0 {
        skip_zero_terminated(bits)?;
    }
    if flg & FHCRC != 0 {
        skip_bytes(bits, 2)?;
    }
    Ok(())
}

/// Skip the 8-byte CRC32/ISIZE member trailer. Neither field is verified:
/// stream integrity is the content store's concern.
fn read_member_trailer<R: Read>(bits: &mut BitReader<R>) -> Result<()> {
    bits.align_byte();
    let mut trailer = [0u8; 8];
    bits.read_aligned(&mut trailer)
}

fn skip_bytes<R: Read>(bits: &mut BitReader<R>, mut n: usize) -> Result<()> {
    let mut buf = [0u8; 512];
    while n > 0 {
        let take = n.min(buf.len());
        bits.read_aligned(&mut buf[..take])?;
        n -= take;
    }
    Ok(())
}

fn skip_zero_terminated<R: Read>(bits: &mut BitReader<R>) -> Result<()> {
    let mut b = [0u8; 1];
    loop {
        bits.read_aligned(&mut b)?;
        if b[0] == 0 {
            return Ok(());
        }
    }
}

fn encode_checkpoints(checkpoints: &[Checkpoint]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.u32(checkpoints.len() as u32);
    for cp in checkpoints {
        w.u64(cp.uncomp_offset);
        w.u64(cp.comp_offset);
        w.u8(cp.carry_bits);
        w.u8(cp.carry_value);
        w.u32(cp.window.len() as u32);
        w.bytes(&cp.window);
    }
    w.into_vec()
}

fn decode_checkpoints(blob: &[u8]) -> Result<Vec<CheckpointView<'_>>> {
    let mut r = ByteReader::new(blob);
    let count = r.u32()? as usize;
    if count == 0 {
        return Err(ZtocError::Corrupt("empty checkpoint index".to_string()));
    }
    let mut views = Vec::new();
    let mut prev_uncomp = 0u64;
    for i in 0..count {
        let uncomp_offset = r.u64()?;
        let comp_offset = r.u64()?;
        let carry_bits = r.u8()?;
        let carry_value = r.u8()?;
        let window_len = r.u32()? as usize;
        if carry_bits > 7 {
            return Err(ZtocError::Corrupt(format!(
                "checkpoint {} carries {} bits",
                i, carry_bits
            )));
        }
        if window_len > WINDOW_SIZE {
            return Err(ZtocError::Corrupt(format!(
                "checkpoint {} window of {} bytes exceeds the deflate window",
                i, window_len
            )));
        }
        if i > 0 && uncomp_offset < prev_uncomp {
            return Err(ZtocError::Corrupt(
                "checkpoint offsets out of order".to_string(),
            ));
        }
        prev_uncomp = uncomp_offset;
        views.push(CheckpointView {
            uncomp_offset,
            comp_offset,
            carry_bits,
            carry_value,
            window: r.take(window_len)?,
        });
    }
    if r.remaining() != 0 {
        return Err(ZtocError::Corrupt(
            "trailing bytes after checkpoint records".to_string(),
        ));
    }
    Ok(views)
}
