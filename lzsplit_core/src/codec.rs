use std::io::{self, Read};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::format::{BlockHeader, MAX_BLOCK_SIZE};

/// Core compression abstraction.
///
/// Each `Codec` implementation:
/// - Is identified by a stable numeric `id()` and a `name()` used on the CLI.
/// - Must compress/decompress individual blocks independently. No state may
///   carry from one block to the next, or a split could not start mid-stream.
pub trait Codec: Send + Sync {
    /// Stable codec ID.
    fn id(&self) -> u16;

    /// Human-readable codec name for CLI display.
    fn name(&self) -> &'static str;

    /// Compress a single independent block.
    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Decompress a single independent block.
    ///
    /// `raw_len` is the uncompressed length recorded in the block header;
    /// codecs whose raw format does not carry its own size rely on it.
    fn decompress_block(&self, compressed: &[u8], raw_len: usize) -> anyhow::Result<Vec<u8>>;
}

/// One compressed block, ready to be framed into the output stream.
#[derive(Debug, Clone)]
pub struct CompressedBlock {
    pub uncompressed_len: u32,
    pub payload: Vec<u8>,
}

impl CompressedBlock {
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            // payload length was checked against u32 when the block was built
            compressed_len: self.payload.len() as u32,
            uncompressed_len: self.uncompressed_len,
        }
    }
}

/// Compress one raw chunk as block number `block`.
pub fn compress_one(codec: &dyn Codec, block: u64, raw: &[u8]) -> Result<CompressedBlock> {
    let payload = codec.compress_block(raw).map_err(|e| Error::Codec {
        block,
        reason: format!("{e:#}"),
    })?;
    if u32::try_from(payload.len()).is_err() {
        return Err(Error::Codec {
            block,
            reason: format!("compressed payload of {} bytes exceeds u32 range", payload.len()),
        });
    }
    if payload.is_empty() && !raw.is_empty() {
        return Err(Error::Codec {
            block,
            reason: "codec produced an empty payload for non-empty input".to_string(),
        });
    }
    Ok(CompressedBlock {
        uncompressed_len: raw.len() as u32,
        payload,
    })
}

/// Lazy sequence of compressed blocks cut from a raw byte source.
///
/// Every block holds at most `block_size` raw bytes and never spans that
/// boundary; only the final block may be shorter. An empty source yields no
/// blocks.
pub struct BlockCompressor<R> {
    source: R,
    codec: Arc<dyn Codec>,
    buf: Vec<u8>,
    blocks: u64,
    done: bool,
}

impl<R: Read> BlockCompressor<R> {
    pub fn new(source: R, codec: Arc<dyn Codec>, block_size: u32) -> Result<Self> {
        if block_size == 0 || block_size > MAX_BLOCK_SIZE {
            return Err(Error::Config(format!(
                "block size hint must be in 1..={MAX_BLOCK_SIZE}, got {block_size}"
            )));
        }
        Ok(Self {
            source,
            codec,
            buf: vec![0u8; block_size as usize],
            blocks: 0,
            done: false,
        })
    }

    /// Number of blocks produced so far.
    pub fn blocks(&self) -> u64 {
        self.blocks
    }
}

impl<R: Read> Iterator for BlockCompressor<R> {
    type Item = Result<CompressedBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let filled = match fill(&mut self.source, &mut self.buf) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };
        if filled < self.buf.len() {
            self.done = true;
        }
        if filled == 0 {
            return None;
        }
        let block = compress_one(self.codec.as_ref(), self.blocks, &self.buf[..filled]);
        if block.is_err() {
            self.done = true;
        }
        self.blocks += 1;
        Some(block)
    }
}

/// Read until `buf` is full or the source is exhausted.
pub(crate) fn fill(source: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
