use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::codec::{fill, Codec};
use crate::error::{Error, Result};
use crate::format::{BlockHeader, BLOCK_HEADER_SIZE};
use crate::index::{Index, Split};
use crate::indexer::check_header;

/// One decoded block together with where it came from.
#[derive(Debug, Clone)]
pub struct DecodedBlock {
    /// Compressed offset of the block header.
    pub offset: u64,
    /// Block number within the stream.
    pub block: u64,
    pub data: Vec<u8>,
}

/// Sequential block decoder over any byte stream.
///
/// Starts at whatever position `source` is at; `offset` and `block` only label
/// errors and results so they point into the whole stream.
pub struct BlockDecoder<R> {
    source: R,
    codec: Arc<dyn Codec>,
    offset: u64,
    block: u64,
    done: bool,
}

impl<R: Read> BlockDecoder<R> {
    pub fn new(source: R, codec: Arc<dyn Codec>) -> Self {
        Self::starting_at(source, codec, 0, 0)
    }

    pub fn starting_at(source: R, codec: Arc<dyn Codec>, offset: u64, block: u64) -> Self {
        Self {
            source,
            codec,
            offset,
            block,
            done: false,
        }
    }

    /// Compressed offset of the next header to be read.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of the next block to be read.
    pub fn block(&self) -> u64 {
        self.block
    }

    fn step(&mut self) -> Result<Option<DecodedBlock>> {
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
            self.offset += BLOCK_HEADER_SIZE;
            return Ok(None);
        }
        check_header(&header, self.offset, self.block)?;

        let mut payload = Vec::with_capacity(header.compressed_len as usize);
        self.source
            .by_ref()
            .take(header.compressed_len as u64)
            .read_to_end(&mut payload)?;
        if payload.len() < header.compressed_len as usize {
            return Err(Error::corrupt(
                self.offset,
                self.block,
                format!(
                    "header declares {} payload bytes but only {} remain",
                    header.compressed_len,
                    payload.len()
                ),
            ));
        }

        let data = self
            .codec
            .decompress_block(&payload, header.uncompressed_len as usize)
            .map_err(|e| Error::corrupt(self.offset, self.block, format!("payload failed to decode: {e:#}")))?;
        if data.len() != header.uncompressed_len as usize {
            return Err(Error::corrupt(
                self.offset,
                self.block,
                format!(
                    "block decoded to {} bytes but header says {}",
                    data.len(),
                    header.uncompressed_len
                ),
            ));
        }

        let decoded = DecodedBlock {
            offset: self.offset,
            block: self.block,
            data,
        };
        self.offset += header.framed_len();
        self.block += 1;
        Ok(Some(decoded))
    }
}

impl<R: Read> Iterator for BlockDecoder<R> {
    type Item = Result<DecodedBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = self.step().transpose();
        if !matches!(step, Some(Ok(_))) {
            self.done = true;
        }
        step
    }
}

/// Decode an entire stream into `sink`, returning the uncompressed byte count.
pub fn decode_all(source: impl Read, codec: Arc<dyn Codec>, sink: &mut impl Write) -> Result<u64> {
    let mut total = 0u64;
    for block in BlockDecoder::new(source, codec) {
        let block = block?;
        sink.write_all(&block.data)?;
        total += block.data.len() as u64;
    }
    sink.flush()?;
    Ok(total)
}

/// Random-access reader for a compressed stream paired with its index.
///
/// # Access pattern
/// [`read_split`](SplitReader::read_split) seeks straight to the split's
/// first block header and decodes only the blocks inside the split.
/// [`read_range`](SplitReader::read_range) resolves a logical byte range to
/// the nearest index entry at or before it and decodes forward from there.
pub struct SplitReader<R> {
    source: R,
    index: Index,
    codec: Arc<dyn Codec>,
}

impl SplitReader<BufReader<File>> {
    /// Open a local `.lzo` file and its `.lzo.index` sidecar.
    pub fn open(
        data_path: impl AsRef<Path>,
        index_path: impl AsRef<Path>,
        codec: Arc<dyn Codec>,
    ) -> Result<Self> {
        let index = Index::read_from(&mut BufReader::new(File::open(index_path)?))?;
        let source = BufReader::new(File::open(data_path)?);
        Ok(Self::new(source, index, codec))
    }
}

impl<R: Read + Seek> SplitReader<R> {
    pub fn new(source: R, index: Index, codec: Arc<dyn Codec>) -> Self {
        Self {
            source,
            index,
            codec,
        }
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Total length of the compressed stream.
    pub fn compressed_len(&mut self) -> Result<u64> {
        Ok(self.source.seek(SeekFrom::End(0))?)
    }

    /// Plan at most `n` splits over this stream.
    pub fn plan_splits(&mut self, n: usize) -> Result<Vec<Split>> {
        let len = self.compressed_len()?;
        self.index.plan_splits(n, len)
    }

    /// Seek to index entry `entry` and decode from there to the end of the
    /// stream.
    pub fn seek_to_entry(&mut self, entry: usize) -> Result<BlockDecoder<&mut R>> {
        let e = *self.index.entries().get(entry).ok_or_else(|| {
            Error::Config(format!(
                "index entry {entry} out of range (total {})",
                self.index.len()
            ))
        })?;
        self.source.seek(SeekFrom::Start(e.compressed_offset))?;
        debug!(entry, offset = e.compressed_offset, "seeked to index entry");
        Ok(BlockDecoder::starting_at(
            &mut self.source,
            self.codec.clone(),
            e.compressed_offset,
            self.index.block_of(entry),
        ))
    }

    /// Decode exactly the blocks of `split` into `sink`.
    ///
    /// The last decoded block must end on `split.end`; anything else means
    /// the index does not belong to this stream.
    pub fn read_split(&mut self, split: &Split, sink: &mut impl Write) -> Result<u64> {
        let mut decoder = self.seek_to_entry(split.first_entry)?;
        let mut total = 0u64;
        while decoder.offset() < split.end {
            match decoder.next() {
                Some(block) => {
                    let block = block?;
                    sink.write_all(&block.data)?;
                    total += block.data.len() as u64;
                }
                // An end marker counts toward the split it closes.
                None => break,
            }
        }
        if decoder.offset() != split.end {
            return Err(Error::corrupt(
                decoder.offset(),
                decoder.block(),
                format!(
                    "split ends at {} but its last block ends at {}",
                    split.end,
                    decoder.offset()
                ),
            ));
        }
        sink.flush()?;
        Ok(total)
    }

    /// Decompress and return up to `len` bytes starting at uncompressed offset
    /// `start`. The result is shorter only when the stream ends first.
    pub fn read_range(&mut self, start: u64, len: u64) -> Result<Vec<u8>> {
        let mut result = Vec::new();
        if len == 0 {
            return Ok(result);
        }
        let Some((entry, e)) = self.index.locate(start).map(|(i, e)| (i, *e)) else {
            return Ok(result);
        };

        let end = start.saturating_add(len);
        let mut logical = e.uncompressed_offset;
        let decoder = self.seek_to_entry(entry)?;
        for block in decoder {
            let block = block?;
            let block_start = logical;
            let block_end = logical + block.data.len() as u64;
            logical = block_end;
            if block_end <= start {
                continue;
            }
            let from = start.saturating_sub(block_start) as usize;
            let to = (end.min(block_end) - block_start) as usize;
            result.extend_from_slice(&block.data[from..to]);
            if block_end >= end {
                break;
            }
        }
        Ok(result)
    }

    /// Give back the underlying source.
    pub fn into_inner(self) -> R {
        self.source
    }
}

/// Copy everything a decoder yields into `sink`.
pub fn drain_into<R: Read>(decoder: BlockDecoder<R>, sink: &mut impl Write) -> Result<u64> {
    let mut total = 0u64;
    for block in decoder {
        let block = block?;
        sink.write_all(&block.data)?;
        total += block.data.len() as u64;
    }
    Ok(total)
}

impl<R: Read> BlockDecoder<R> {
    /// Decode the remaining blocks into a fresh buffer.
    pub fn read_to_vec(self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        drain_into(self, &mut out)?;
        Ok(out)
    }
}

impl<R> std::fmt::Debug for SplitReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplitReader")
            .field("entries", &self.index.len())
            .field("interval", &self.index.interval())
            .field("codec", &self.codec.name())
            .finish()
    }
}
