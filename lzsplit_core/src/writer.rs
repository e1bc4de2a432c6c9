use std::io::Write;
use std::sync::Arc;

use crate::codec::{compress_one, Codec, CompressedBlock};
use crate::error::{Error, Result};
use crate::format::MAX_BLOCK_SIZE;
use crate::index::Index;
use crate::indexer::IndexBuilder;

/// Streaming writer for block-compressed streams.
///
/// # Write contract
/// Call [`write`](Writer::write) any number of times with arbitrary-sized
/// byte slices. The writer accumulates data and emits an independent
/// compressed block whenever `block_size` raw bytes have been gathered.
/// Call [`finish`](Writer::finish) to flush the trailing partial block and
/// take back the sink together with the index built along the way.
///
/// # Stream layout written
/// ```text
/// [len:u32 raw_len:u32][payload] [len:u32 raw_len:u32][payload] ...
/// ```
/// No header or footer: the index lives in a separate sidecar file, and the
/// first block starts at offset 0.
pub struct Writer<W: Write> {
    sink: W,
    codec: Arc<dyn Codec>,
    block_size: u32,
    /// Pending raw bytes not yet flushed into a block.
    pending: Vec<u8>,
    /// Observes every header written, in order.
    builder: IndexBuilder,
}

/// What a finished writer hands back.
pub struct Finished<W> {
    pub sink: W,
    pub index: Index,
    pub blocks: u64,
    pub compressed_len: u64,
    pub uncompressed_len: u64,
}

impl<W: Write> Writer<W> {
    /// `block_size` is the raw bytes per block, `interval` the number of blocks
    /// between index entries.
    pub fn new(sink: W, codec: Arc<dyn Codec>, block_size: u32, interval: u32) -> Result<Self> {
        if block_size == 0 || block_size > MAX_BLOCK_SIZE {
            return Err(Error::Config(format!(
                "block size hint must be in 1..={MAX_BLOCK_SIZE}, got {block_size}"
            )));
        }
        Ok(Self {
            sink,
            codec,
            block_size,
            pending: Vec::new(),
            builder: IndexBuilder::new(interval)?,
        })
    }

    /// Buffer `data` and flush complete blocks as they fill up.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        // Buffer lazily; writers fed only precompressed blocks never allocate.
        if self.pending.capacity() == 0 && !data.is_empty() {
            self.pending.reserve(self.block_size as usize);
        }
        self.pending.extend_from_slice(data);
        while self.pending.len() >= self.block_size as usize {
            let raw: Vec<u8> = self.pending.drain(..self.block_size as usize).collect();
            self.flush_block(&raw)?;
        }
        Ok(())
    }

    /// Frame an already compressed block.
    ///
    /// Callers mixing this with [`write`](Writer::write) must do so only on
    /// block boundaries; the writer refuses while raw bytes are pending.
    pub fn write_block(&mut self, block: &CompressedBlock) -> Result<()> {
        if !self.pending.is_empty() {
            return Err(Error::Config(format!(
                "{} raw bytes pending; cannot interleave a precompressed block",
                self.pending.len()
            )));
        }
        self.emit(block)
    }

    /// Compress `raw` as a single block and write it out.
    fn flush_block(&mut self, raw: &[u8]) -> Result<()> {
        let block = compress_one(self.codec.as_ref(), self.builder.blocks(), raw)?;
        self.emit(&block)
    }

    fn emit(&mut self, block: &CompressedBlock) -> Result<()> {
        let header = block.header();
        self.builder.observe(header)?;
        self.sink.write_all(&header.to_bytes())?;
        self.sink.write_all(&block.payload)?;
        Ok(())
    }

    /// Bytes of compressed stream written so far.
    pub fn position(&self) -> u64 {
        self.builder.cursor()
    }

    pub fn blocks(&self) -> u64 {
        self.builder.blocks()
    }

    /// Flush any trailing partial block and the sink, then hand back the sink
    /// and the finished index.
    pub fn finish(mut self) -> Result<Finished<W>> {
        if !self.pending.is_empty() {
            let remaining = std::mem::take(&mut self.pending);
            self.flush_block(&remaining)?;
        }
        self.sink.flush()?;

        let blocks = self.builder.blocks();
        let compressed_len = self.builder.cursor();
        let uncompressed_len = self.builder.uncompressed_len();
        Ok(Finished {
            sink: self.sink,
            index: self.builder.finish(),
            blocks,
            compressed_len,
            uncompressed_len,
        })
    }
}
