// Copyright 2021 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Segmented frame buffers.
//!
//! Frames move through the cipher engines as chains of fixed-capacity
//! segments, the shape a receive ring hands up. Segment boundaries carry no
//! alignment guarantee, so the engines never assume a cipher block is
//! contiguous; they pull equal-length `(src, dst)` slice pairs from a
//! [`ChainReader`] and a [`ChainWriter`] and let the pair length fall where
//! the boundaries do.

use std::cell::Cell;

pub const DEFAULT_SEG_CAPACITY: usize = 256;

/// A single fixed-capacity buffer segment.
pub struct Segment {
    buf: Box<[u8]>,
    len: usize,
}

impl Segment {
    pub fn with_capacity(capacity: usize) -> Self {
        Segment { buf: vec![0u8; capacity].into_boxed_slice(), len: 0 }
    }

    /// A full segment holding a copy of `bytes`, e.g. a DMA descriptor
    /// handed up by a driver.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Segment { buf: bytes.to_vec().into_boxed_slice(), len: bytes.len() }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn free_space(&self) -> usize {
        self.buf.len() - self.len
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// An ordered chain of segments making up one frame.
#[derive(Default)]
pub struct BufferChain {
    segs: Vec<Segment>,
}

impl BufferChain {
    pub fn new() -> Self {
        BufferChain { segs: Vec::new() }
    }

    pub fn append_segment(&mut self, seg: Segment) {
        self.segs.push(seg);
    }

    /// Total number of filled bytes across all segments.
    pub fn pkt_len(&self) -> usize {
        self.segs.iter().map(Segment::len).sum()
    }

    /// The filled bytes of the first segment. The 802.11 header is required
    /// to be contiguous here.
    pub fn first(&self) -> &[u8] {
        self.segs.first().map_or(&[], Segment::as_slice)
    }

    /// Copies `dst.len()` bytes starting at `offset` out of the chain.
    /// Returns `None` if the chain is too short.
    pub fn copy_out(&self, offset: usize, dst: &mut [u8]) -> Option<()> {
        let mut reader = ChainReader::new(self, offset);
        let mut filled = 0;
        while filled < dst.len() {
            let run = reader.next_run(dst.len() - filled);
            if run.is_empty() {
                return None;
            }
            dst[filled..filled + run.len()].copy_from_slice(run);
            filled += run.len();
        }
        Some(())
    }

    /// Copies the whole chain into one contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pkt_len());
        for seg in &self.segs {
            out.extend_from_slice(seg.as_slice());
        }
        out
    }

    /// Builds a chain from contiguous bytes, allocating segments from
    /// `pool` as needed.
    pub fn from_slice(pool: &BufferPool, bytes: &[u8]) -> Option<Self> {
        let mut writer = ChainWriter::new(pool);
        writer.append(bytes)?;
        Some(writer.finish())
    }
}

/// Segment allocator. Allocation can fail (`None`), and the quota form
/// makes exhaustion reproducible in tests. The segment capacity must at
/// least cover a full MAC header, which the engines require to be
/// contiguous in the first segment of every chain they build or parse.
pub struct BufferPool {
    seg_capacity: usize,
    quota: Cell<Option<usize>>,
}

impl BufferPool {
    pub fn new(seg_capacity: usize) -> Self {
        assert!(seg_capacity > 0);
        BufferPool { seg_capacity, quota: Cell::new(None) }
    }

    /// A pool that refuses allocation after `quota` segments.
    pub fn with_quota(seg_capacity: usize, quota: usize) -> Self {
        assert!(seg_capacity > 0);
        BufferPool { seg_capacity, quota: Cell::new(Some(quota)) }
    }

    pub fn alloc(&self) -> Option<Segment> {
        if let Some(left) = self.quota.get() {
            if left == 0 {
                return None;
            }
            self.quota.set(Some(left - 1));
        }
        Some(Segment::with_capacity(self.seg_capacity))
    }
}

/// Read cursor over a chain, yielding contiguous runs.
pub struct ChainReader<'a> {
    segs: &'a [Segment],
    seg: usize,
    off: usize,
}

impl<'a> ChainReader<'a> {
    pub fn new(chain: &'a BufferChain, mut offset: usize) -> Self {
        let mut seg = 0;
        while seg < chain.segs.len() && offset > chain.segs[seg].len() {
            offset -= chain.segs[seg].len();
            seg += 1;
        }
        ChainReader { segs: &chain.segs, seg, off: offset }
    }

    /// The next contiguous run of at most `max` bytes; empty at the end of
    /// the chain.
    pub fn next_run(&mut self, max: usize) -> &'a [u8] {
        while self.seg < self.segs.len() && self.off == self.segs[self.seg].len() {
            self.seg += 1;
            self.off = 0;
        }
        if self.seg == self.segs.len() || max == 0 {
            return &[];
        }
        let seg = &self.segs[self.seg];
        let n = max.min(seg.len() - self.off);
        let run = &seg.as_slice()[self.off..self.off + n];
        self.off += n;
        run
    }
}

/// Write cursor building a new chain, allocating segments on demand. Any
/// allocation failure surfaces as `None` from the writing method; dropping
/// the writer releases everything built so far.
pub struct ChainWriter<'a> {
    pool: &'a BufferPool,
    segs: Vec<Segment>,
}

impl<'a> ChainWriter<'a> {
    pub fn new(pool: &'a BufferPool) -> Self {
        ChainWriter { pool, segs: Vec::new() }
    }

    /// Opens a writable run of at most `max` bytes in the tail segment,
    /// allocating a fresh segment if the tail is full. The run is committed
    /// to the chain immediately; the caller must fill all of it.
    pub fn open_run(&mut self, max: usize) -> Option<&mut [u8]> {
        if self.segs.last().map_or(true, |seg| seg.free_space() == 0) {
            self.segs.push(self.pool.alloc()?);
        }
        let seg = self.segs.last_mut()?;
        let n = max.min(seg.free_space());
        let start = seg.len;
        seg.len += n;
        Some(&mut seg.buf[start..start + n])
    }

    pub fn append(&mut self, mut bytes: &[u8]) -> Option<()> {
        while !bytes.is_empty() {
            let run = self.open_run(bytes.len())?;
            let n = run.len();
            run.copy_from_slice(&bytes[..n]);
            bytes = &bytes[n..];
        }
        Some(())
    }

    /// Pulls `len` bytes from `reader` and writes the transformed output,
    /// handing `f` equal-length `(src, dst)` slice pairs. Fails if the
    /// reader runs dry or a segment allocation fails.
    pub fn transform_from<F>(
        &mut self,
        reader: &mut ChainReader<'_>,
        mut len: usize,
        mut f: F,
    ) -> Option<()>
    where
        F: FnMut(&[u8], &mut [u8]),
    {
        while len > 0 {
            let src = reader.next_run(len);
            if src.is_empty() {
                return None;
            }
            let mut done = 0;
            while done < src.len() {
                let dst = self.open_run(src.len() - done)?;
                let n = dst.len();
                f(&src[done..done + n], dst);
                done += n;
            }
            len -= src.len();
        }
        Some(())
    }

    pub fn finish(self) -> BufferChain {
        BufferChain { segs: self.segs }
    }
}
