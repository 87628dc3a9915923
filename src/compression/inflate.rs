//! Resumable DEFLATE decoder (RFC 1951).
//!
//! Stock decompressors only run front to back; random access needs a decoder
//! whose state can be captured and restored. The restartable state at a
//! block boundary is small and well known from the classic zran technique:
//! the bit-aligned input position (a byte offset plus 0-7 carry bits) and
//! the last 32 KiB of decoded output. This module implements a decoder that
//! exposes exactly that: it decodes one block at a time, reports its bit
//! position between blocks, snapshots its window, and can be primed from a
//! previously captured snapshot.
//!
//! Decoded bytes are delivered to a sink callback in chunks of at most one
//! window (32 KiB). The sink returns whether decoding should continue, which
//! is how extraction stops early once its range is satisfied.
//!
//! The decoder is deliberately simple: bit-at-a-time canonical Huffman
//! decoding in the style of zlib's puff. Throughput is bounded by the spans
//! being decoded, not by table construction tricks, and a straightforward
//! decoder keeps the state capture auditable.

use std::io::{self, Read};

use crate::error::{Result, ZtocError};

/// DEFLATE history window size.
pub(crate) const WINDOW_SIZE: usize = 32 * 1024;

/// Maximum bits in a DEFLATE Huffman code.
const MAX_CODE_BITS: usize = 15;

/// Base lengths for length symbols 257..=285.
const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];

/// Extra bits for length symbols 257..=285.
const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

/// Base distances for distance symbols 0..=29.
const DIST_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];

/// Extra bits for distance symbols 0..=29.
const DIST_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

/// Order in which code-length code lengths appear in a dynamic block header.
const CLEN_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// Sink receiving decoded output. Returns whether decoding should continue.
pub(crate) type SinkFn<'a> = dyn FnMut(&[u8]) -> Result<bool> + 'a;

/// Outcome of decoding one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Block decoded; more blocks follow in this member.
    More,
    /// Block decoded and it carried the final-block flag.
    Final,
    /// The sink asked to stop; decoder state is no longer at a boundary.
    Stopped,
}

/// LSB-first bit reader with absolute input accounting.
///
/// Bytes are pulled one at a time so the buffer never runs more than a few
/// bytes ahead of the bits actually consumed; wrap the source in a
/// `BufReader` for throughput. `in_pos` counts bytes consumed from the
/// source, which makes `bit_position` the absolute consumed bit offset,
/// the quantity checkpoints record.
pub(crate) struct BitReader<R> {
    inner: R,
    in_pos: u64,
    bitbuf: u32,
    bitcnt: u32,
}

impl<R: Read> BitReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            in_pos: 0,
            bitbuf: 0,
            bitcnt: 0,
        }
    }

    /// Start a reader primed with carry bits from a checkpoint. The carry
    /// bits are the unconsumed remainder of the byte preceding the reader's
    /// starting offset.
    pub(crate) fn resume(inner: R, carry_value: u8, carry_bits: u8) -> Self {
        Self {
            inner,
            in_pos: 0,
            bitbuf: carry_value as u32,
            bitcnt: carry_bits as u32,
        }
    }

    /// Total bytes consumed from the source.
    pub(crate) fn bytes_consumed(&self) -> u64 {
        self.in_pos
    }

    /// Absolute consumed position in bits. Only meaningful on readers
    /// created with [`BitReader::new`]; resumed readers count from their
    /// restart offset.
    pub(crate) fn bit_position(&self) -> u64 {
        (self.in_pos * 8).saturating_sub(self.bitcnt as u64)
    }

    /// The restart coordinates at the current position: byte offset of the
    /// next whole byte, plus the count and value of pending carry bits.
    pub(crate) fn checkpoint_pos(&self) -> (u64, u8, u8) {
        let bitpos = self.bit_position();
        let consumed_bits = (bitpos % 8) as u32;
        if consumed_bits == 0 {
            (bitpos / 8, 0, 0)
        } else {
            let carry_bits = 8 - consumed_bits;
            let carry_value = (self.bitbuf & ((1u32 << carry_bits) - 1)) as u8;
            (bitpos / 8 + 1, carry_bits as u8, carry_value)
        }
    }

    fn read_one(&mut self) -> Result<Option<u8>> {
        let mut b = [0u8; 1];
        loop {
            match self.inner.read(&mut b) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.in_pos += 1;
                    return Ok(Some(b[0]));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Buffer at least `need` bits; false on end of input.
    fn fill(&mut self, need: u32) -> Result<bool> {
        while self.bitcnt < need {
            match self.read_one()? {
                Some(b) => {
                    self.bitbuf |= (b as u32) << self.bitcnt;
                    self.bitcnt += 8;
                }
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Consume `n` bits, `n <= 16`.
    pub(crate) fn take(&mut self, n: u32) -> Result<u32> {
        debug_assert!(n <= 16);
        if !self.fill(n)? {
            return Err(ZtocError::Truncated(
                "compressed stream ended inside a deflate block".to_string(),
            ));
        }
        let v = self.bitbuf & ((1u32 << n) - 1);
        self.bitbuf >>= n;
        self.bitcnt -= n;
        Ok(v)
    }

    /// Drop the 0-7 bits remaining in the current byte.
    pub(crate) fn align_byte(&mut self) {
        let k = self.bitcnt % 8;
        self.bitbuf >>= k;
        self.bitcnt -= k;
    }

    /// Read whole bytes; only valid on a byte-aligned reader.
    pub(crate) fn read_aligned(&mut self, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(self.bitcnt % 8, 0);
        for slot in buf.iter_mut() {
            if self.bitcnt >= 8 {
                *slot = (self.bitbuf & 0xff) as u8;
                self.bitbuf >>= 8;
                self.bitcnt -= 8;
            } else {
                match self.read_one()? {
                    Some(b) => *slot = b,
                    None => {
                        return Err(ZtocError::Truncated(
                            "compressed stream ended mid-field".to_string(),
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether the input is exhausted. Only meaningful on a byte-aligned
    /// reader between gzip members.
    pub(crate) fn at_eof(&mut self) -> Result<bool> {
        Ok(!self.fill(8)?)
    }
}

/// Canonical Huffman decoding table, indexed by code length.
///
/// `count[len]` holds the number of codes of each length and `symbol` the
/// symbols sorted by (length, symbol). Decoding walks the code one bit at a
/// time, narrowing by length exactly as the canonical construction assigns
/// codes.
struct Huffman {
    count: [u16; MAX_CODE_BITS + 1],
    symbol: Vec<u16>,
}

impl Huffman {
    fn new(lengths: &[u8]) -> Result<Self> {
        let mut count = [0u16; MAX_CODE_BITS + 1];
        for &len in lengths {
            debug_assert!((len as usize) <= MAX_CODE_BITS);
            count[len as usize] += 1;
        }

        // Reject over-subscribed codes. Incomplete codes are tolerated, as
        // zlib does, so single-code distance trees keep working.
        let mut left: i32 = 1;
        for len in 1..=MAX_CODE_BITS {
            left <<= 1;
            left -= count[len] as i32;
            if left < 0 {
                return Err(ZtocError::UnsupportedFormat(
                    "over-subscribed huffman code".to_string(),
                ));
            }
        }

        let mut offs = [0u16; MAX_CODE_BITS + 1];
        for len in 1..MAX_CODE_BITS {
            offs[len + 1] = offs[len] + count[len];
        }

        let mut symbol = vec![0u16; lengths.len()];
        for (sym, &len) in lengths.iter().enumerate() {
            if len != 0 {
                symbol[offs[len as usize] as usize] = sym as u16;
                offs[len as usize] += 1;
            }
        }

        Ok(Self { count, symbol })
    }

    fn decode<R: Read>(&self, bits: &mut BitReader<R>) -> Result<u16> {
        let mut code: i32 = 0;
        let mut first: i32 = 0;
        let mut index: i32 = 0;
        for len in 1..=MAX_CODE_BITS {
            code |= bits.take(1)? as i32;
            let count = self.count[len] as i32;
            if code - first < count {
                return Ok(self.symbol[(index + (code - first)) as usize]);
            }
            index += count;
            first += count;
            first <<= 1;
            code <<= 1;
        }
        Err(ZtocError::UnsupportedFormat(
            "invalid huffman code".to_string(),
        ))
    }
}

fn fixed_tables() -> &'static (Huffman, Huffman) {
    use std::sync::OnceLock;
    static FIXED: OnceLock<(Huffman, Huffman)> = OnceLock::new();
    FIXED.get_or_init(|| {
        let mut lit_lens = [0u8; 288];
        lit_lens[0..144].fill(8);
        lit_lens[144..256].fill(9);
        lit_lens[256..280].fill(7);
        lit_lens[280..288].fill(8);
        let dist_lens = [5u8; 30];
        let lit = Huffman::new(&lit_lens).expect("fixed literal table is well-formed");
        let dist = Huffman::new(&dist_lens).expect("fixed distance table is well-formed");
        (lit, dist)
    })
}

/// Block-stepping DEFLATE decoder with capturable state.
///
/// `step_block` must be called with the reader positioned at a block header;
/// after it returns [`Step::More`] or [`Step::Final`] the reader is at the
/// next boundary and all decoded bytes have been flushed to the sink, so
/// `bits.checkpoint_pos()` + `window_snapshot()` fully describe a restart
/// point.
pub(crate) struct Inflater<R> {
    pub(crate) bits: BitReader<R>,
    window: Vec<u8>,
    wpos: usize,
    whave: usize,
    wmark: usize,
    out_pos: u64,
}

impl<R: Read> Inflater<R> {
    /// Decoder for a fresh deflate stream starting at output offset 0.
    pub(crate) fn new(inner: R) -> Self {
        Self {
            bits: BitReader::new(inner),
            window: vec![0u8; WINDOW_SIZE],
            wpos: 0,
            whave: 0,
            wmark: 0,
            out_pos: 0,
        }
    }

    /// Decoder resuming at a checkpoint: `inner` must be positioned at the
    /// checkpoint's compressed byte offset, `snapshot` is the recorded
    /// window (oldest byte first), and `out_pos` the absolute uncompressed
    /// offset of the checkpoint.
    pub(crate) fn resume(
        inner: R,
        carry_value: u8,
        carry_bits: u8,
        snapshot: &[u8],
        out_pos: u64,
    ) -> Result<Self> {
        if snapshot.len() > WINDOW_SIZE {
            return Err(ZtocError::Corrupt(format!(
                "checkpoint window of {} bytes exceeds the deflate window",
                snapshot.len()
            )));
        }
        let mut window = vec![0u8; WINDOW_SIZE];
        window[..snapshot.len()].copy_from_slice(snapshot);
        Ok(Self {
            bits: BitReader::resume(inner, carry_value, carry_bits),
            window,
            wpos: snapshot.len() % WINDOW_SIZE,
            whave: snapshot.len(),
            wmark: snapshot.len() % WINDOW_SIZE,
            out_pos,
        })
    }

    /// Absolute uncompressed position of the next output byte.
    pub(crate) fn out_pos(&self) -> u64 {
        self.out_pos
    }

    /// Copy of the current history window, oldest byte first.
    pub(crate) fn window_snapshot(&self) -> Vec<u8> {
        if self.whave < WINDOW_SIZE {
            // Never wrapped: valid history is the prefix up to the write
            // position.
            self.window[..self.wpos].to_vec()
        } else {
            let mut snap = Vec::with_capacity(WINDOW_SIZE);
            snap.extend_from_slice(&self.window[self.wpos..]);
            snap.extend_from_slice(&self.window[..self.wpos]);
            snap
        }
    }

    /// Clear history at a gzip member boundary; members are independent
    /// deflate streams.
    pub(crate) fn reset_window(&mut self) {
        self.wpos = 0;
        self.whave = 0;
        self.wmark = 0;
    }

    fn put_byte(&mut self, b: u8, sink: &mut SinkFn<'_>) -> Result<bool> {
        self.window[self.wpos] = b;
        self.wpos += 1;
        if self.whave < WINDOW_SIZE {
            self.whave += 1;
        }
        self.out_pos += 1;
        if self.wpos == WINDOW_SIZE {
            let cont = sink(&self.window[self.wmark..WINDOW_SIZE])?;
            self.wmark = 0;
            self.wpos = 0;
            return Ok(cont);
        }
        Ok(true)
    }

    fn flush(&mut self, sink: &mut SinkFn<'_>) -> Result<bool> {
        if self.wpos > self.wmark {
            let cont = sink(&self.window[self.wmark..self.wpos])?;
            self.wmark = self.wpos;
            return Ok(cont);
        }
        Ok(true)
    }

    fn copy_match(&mut self, dist: usize, len: usize, sink: &mut SinkFn<'_>) -> Result<bool> {
        if dist == 0 || dist > self.whave {
            return Err(ZtocError::UnsupportedFormat(
                "deflate match distance exceeds available history".to_string(),
            ));
        }
        let mut from = (self.wpos + WINDOW_SIZE - dist) % WINDOW_SIZE;
        for _ in 0..len {
            let b = self.window[from];
            from = (from + 1) % WINDOW_SIZE;
            if !self.put_byte(b, sink)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Decode exactly one block. The reader must be at a block header.
    pub(crate) fn step_block(&mut self, sink: &mut SinkFn<'_>) -> Result<Step> {
        let bfinal = self.bits.take(1)? == 1;
        let btype = self.bits.take(2)?;
        let cont = match btype {
            0 => self.stored_block(sink)?,
            1 => {
                let (lit, dist) = fixed_tables();
                self.compressed_block(lit, dist, sink)?
            }
            2 => {
                let (lit, dist) = self.dynamic_tables()?;
                self.compressed_block(&lit, &dist, sink)?
            }
            _ => {
                return Err(ZtocError::UnsupportedFormat(
                    "reserved deflate block type".to_string(),
                ))
            }
        };
        if !cont {
            return Ok(Step::Stopped);
        }
        if !self.flush(sink)? {
            return Ok(Step::Stopped);
        }
        Ok(if bfinal { Step::Final } else { Step::More })
    }

    fn stored_block(&mut self, sink: &mut SinkFn<'_>) -> Result<bool> {
        self.bits.align_byte();
        let mut hdr = [0u8; 4];
        self.bits.read_aligned(&mut hdr)?;
        let len = u16::from_le_bytes([hdr[0], hdr[1]]);
        let nlen = u16::from_le_bytes([hdr[2], hdr[3]]);
        if len != !nlen {
            return Err(ZtocError::UnsupportedFormat(
                "stored block length complement mismatch".to_string(),
            ));
        }
        let mut remaining = len as usize;
        let mut buf = [0u8; 4096];
        while remaining > 0 {
            let n = remaining.min(buf.len());
            self.bits.read_aligned(&mut buf[..n])?;
            for &b in &buf[..n] {
                if !self.put_byte(b, sink)? {
                    return Ok(false);
                }
            }
            remaining -= n;
        }
        Ok(true)
    }

    fn compressed_block(
        &mut self,
        lit: &Huffman,
        dist: &Huffman,
        sink: &mut SinkFn<'_>,
    ) -> Result<bool> {
        loop {
            let sym = lit.decode(&mut self.bits)?;
            match sym {
                0..=255 => {
                    if !self.put_byte(sym as u8, sink)? {
                        return Ok(false);
                    }
                }
                256 => return Ok(true),
                257..=285 => {
                    let idx = (sym - 257) as usize;
                    let len = LENGTH_BASE[idx] as usize
                        + self.bits.take(LENGTH_EXTRA[idx] as u32)? as usize;
                    let dsym = dist.decode(&mut self.bits)? as usize;
                    if dsym >= DIST_BASE.len() {
                        return Err(ZtocError::UnsupportedFormat(
                            "invalid deflate distance symbol".to_string(),
                        ));
                    }
                    let d = DIST_BASE[dsym] as usize
                        + self.bits.take(DIST_EXTRA[dsym] as u32)? as usize;
                    if !self.copy_match(d, len, sink)? {
                        return Ok(false);
                    }
                }
                _ => {
                    return Err(ZtocError::UnsupportedFormat(
                        "invalid deflate literal/length symbol".to_string(),
                    ))
                }
            }
        }
    }

    fn dynamic_tables(&mut self) -> Result<(Huffman, Huffman)> {
        let hlit = self.bits.take(5)? as usize + 257;
        let hdist = self.bits.take(5)? as usize + 1;
        let hclen = self.bits.take(4)? as usize + 4;
        if hlit > 286 || hdist > 30 {
            return Err(ZtocError::UnsupportedFormat(
                "dynamic block declares too many codes".to_string(),
            ));
        }

        let mut cl_lens = [0u8; 19];
        for &slot in CLEN_ORDER.iter().take(hclen) {
            cl_lens[slot] = self.bits.take(3)? as u8;
        }
        let cl = Huffman::new(&cl_lens)?;

        let mut lens = vec![0u8; hlit + hdist];
        let mut i = 0;
        while i < lens.len() {
            let sym = cl.decode(&mut self.bits)?;
            match sym {
                0..=15 => {
                    lens[i] = sym as u8;
                    i += 1;
                }
                16 => {
                    if i == 0 {
                        return Err(ZtocError::UnsupportedFormat(
                            "length repeat with no previous length".to_string(),
                        ));
                    }
                    let prev = lens[i - 1];
                    let rep = 3 + self.bits.take(2)? as usize;
                    if i + rep > lens.len() {
                        return Err(ZtocError::UnsupportedFormat(
                            "code length repeat overflows table".to_string(),
                        ));
                    }
                    lens[i..i + rep].fill(prev);
                    i += rep;
                }
                17 | 18 => {
                    let rep = if sym == 17 {
                        3 + self.bits.take(3)? as usize
                    } else {
                        11 + self.bits.take(7)? as usize
                    };
                    if i + rep > lens.len() {
                        return Err(ZtocError::UnsupportedFormat(
                            "code length repeat overflows table".to_string(),
                        ));
                    }
                    // Lengths are pre-zeroed.
                    i += rep;
                }
                _ => {
                    return Err(ZtocError::UnsupportedFormat(
                        "invalid code length symbol".to_string(),
                    ))
                }
            }
        }

        if lens[256] == 0 {
            return Err(ZtocError::UnsupportedFormat(
                "dynamic block has no end-of-block code".to_string(),
            ));
        }

        let lit = Huffman::new(&lens[..hlit])?;
        let dist = Huffman::new(&lens[hlit..])?;
        Ok((lit, dist))
    }
}
