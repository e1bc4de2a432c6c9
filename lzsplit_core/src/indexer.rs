//! Block boundary tracking.
//!
//! [`IndexBuilder`] is the ordered fold at the heart of an indexing pass: it
//! is fed block headers in stream order and carries the running byte cursor,
//! so block N's offset is always derived from blocks 0..N-1. It is used
//! in-line by the [`Writer`](crate::Writer) while compressing, and by
//! [`scan`] when re-indexing a stream that has already been written.

use std::io::{self, Read};

use tracing::debug;

use crate::codec::fill;
use crate::error::{Error, Result};
use crate::format::{BlockHeader, IndexEntry, BLOCK_HEADER_SIZE, MAX_BLOCK_SIZE};
use crate::index::Index;

/// Position and lengths of one block in a compressed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Byte offset of this block's header.
    pub offset: u64,
    pub compressed_len: u32,
    pub uncompressed_len: u32,
}

/// Reject headers that cannot describe a data block.
pub(crate) fn check_header(header: &BlockHeader, offset: u64, block: u64) -> Result<()> {
    if header.is_end_marker() {
        return Err(Error::corrupt(
            offset,
            block,
            "end-of-stream marker where a data block was expected",
        ));
    }
    if header.compressed_len == 0 {
        return Err(Error::corrupt(
            offset,
            block,
            format!(
                "empty payload declared for {} uncompressed bytes",
                header.uncompressed_len
            ),
        ));
    }
    if header.uncompressed_len == 0 {
        return Err(Error::corrupt(
            offset,
            block,
            format!(
                "{} payload bytes declared for an empty block",
                header.compressed_len
            ),
        ));
    }
    if header.uncompressed_len > MAX_BLOCK_SIZE {
        return Err(Error::corrupt(
            offset,
            block,
            format!(
                "declares {} uncompressed bytes, above the {MAX_BLOCK_SIZE}-byte block limit",
                header.uncompressed_len
            ),
        ));
    }
    Ok(())
}

/// Accumulates index entries for one pass.
#[derive(Debug)]
pub struct IndexBuilder {
    interval: u32,
    cursor: u64,
    uncompressed: u64,
    blocks: u64,
    entries: Vec<IndexEntry>,
}

impl IndexBuilder {
    /// `interval` is the number of blocks between recorded entries (K).
    pub fn new(interval: u32) -> Result<Self> {
        if interval == 0 {
            return Err(Error::Config("index interval must be at least 1".to_string()));
        }
        Ok(Self {
            interval,
            cursor: 0,
            uncompressed: 0,
            blocks: 0,
            entries: Vec::new(),
        })
    }

    /// Record the next block in stream order.
    pub fn observe(&mut self, header: BlockHeader) -> Result<()> {
        check_header(&header, self.cursor, self.blocks)?;

        if self.blocks % self.interval as u64 == 0 {
            let entry = IndexEntry {
                compressed_offset: self.cursor,
                uncompressed_offset: self.uncompressed,
            };
            debug!(
                block = self.blocks,
                compressed_offset = entry.compressed_offset,
                uncompressed_offset = entry.uncompressed_offset,
                "index entry"
            );
            self.entries.push(entry);
        }

        self.cursor = self
            .cursor
            .checked_add(header.framed_len())
            .ok_or_else(|| Error::corrupt(self.cursor, self.blocks, "compressed offset overflows u64"))?;
        self.uncompressed = self
            .uncompressed
            .checked_add(header.uncompressed_len as u64)
            .ok_or_else(|| Error::corrupt(self.cursor, self.blocks, "uncompressed offset overflows u64"))?;
        self.blocks += 1;
        Ok(())
    }

    /// Offset at which the next block header will start.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    pub fn uncompressed_len(&self) -> u64 {
        self.uncompressed
    }

    pub fn finish(self) -> Index {
        Index::from_parts(self.interval, self.entries)
    }
}

/// Walks the block headers of a compressed stream without decompressing.
///
/// Payloads are skipped, so a full walk costs one sequential read of the
/// stream and no allocation per block. Any inconsistency ends the walk with
/// [`Error::CorruptStream`].
pub struct BlockWalker<R> {
    source: R,
    offset: u64,
    block: u64,
    ended_with_marker: bool,
    done: bool,
}

impl<R: Read> BlockWalker<R> {
    pub fn new(source: R) -> Self {
        Self::starting_at(source, 0, 0)
    }

    /// Walk a stream whose first header sits at `offset` and is block number
    /// `block`, e.g. after seeking to an index entry.
    pub fn starting_at(source: R, offset: u64, block: u64) -> Self {
        Self {
            source,
            offset,
            block,
            ended_with_marker: false,
            done: false,
        }
    }

    /// Bytes consumed so far, counted from the start of the stream.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether the walk stopped at an explicit end-of-stream marker.
    pub fn ended_with_marker(&self) -> bool {
        self.ended_with_marker
    }

    fn step(&mut self) -> Result<Option<Block>> {
        let mut raw = [0u8; BLOCK_HEADER_SIZE as usize];
        let n = fill(&mut self.source, &mut raw)?;
        if n == 0 {
            return Ok(None);
        }
        if n < raw.len() {
            return Err(Error::corrupt(
                self.offset,
                self.block,
                format!("truncated block header: {n} of {BLOCK_HEADER_SIZE} bytes"),
            ));
        }

        let header = BlockHeader::from_bytes(&raw);
        if header.is_end_marker() {
            let mut rest = [0u8; 1];
            if fill(&mut self.source, &mut rest)? != 0 {
                return Err(Error::corrupt(
                    self.offset + BLOCK_HEADER_SIZE,
                    self.block,
                    "data after end-of-stream marker",
                ));
            }
            self.ended_with_marker = true;
            self.offset += BLOCK_HEADER_SIZE;
            return Ok(None);
        }
        check_header(&header, self.offset, self.block)?;

        let want = header.compressed_len as u64;
        let skipped = io::copy(&mut self.source.by_ref().take(want), &mut io::sink())?;
        if skipped < want {
            return Err(Error::corrupt(
                self.offset,
                self.block,
                format!("header declares {want} payload bytes but only {skipped} remain"),
            ));
        }

        let block = Block {
            offset: self.offset,
            compressed_len: header.compressed_len,
            uncompressed_len: header.uncompressed_len,
        };
        self.offset += header.framed_len();
        self.block += 1;
        Ok(Some(block))
    }
}

impl<R: Read> Iterator for BlockWalker<R> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(block)) => Some(Ok(block)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Outcome of re-indexing an existing compressed stream.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub index: Index,
    pub blocks: u64,
    /// Bytes in the stream, headers and any end marker included.
    pub compressed_len: u64,
    pub uncompressed_len: u64,
    pub ended_with_marker: bool,
}

/// Build an index for an already-written compressed stream.
///
/// Fails on the first inconsistent header; a partial index is never returned.
pub fn scan(source: impl Read, interval: u32) -> Result<ScanReport> {
    let mut builder = IndexBuilder::new(interval)?;
    let mut walker = BlockWalker::new(source);
    for block in walker.by_ref() {
        let block = block?;
        builder.observe(BlockHeader {
            compressed_len: block.compressed_len,
            uncompressed_len: block.uncompressed_len,
        })?;
    }
    Ok(ScanReport {
        blocks: builder.blocks(),
        compressed_len: walker.offset(),
        uncompressed_len: builder.uncompressed_len(),
        ended_with_marker: walker.ended_with_marker(),
        index: builder.finish(),
    })
}
