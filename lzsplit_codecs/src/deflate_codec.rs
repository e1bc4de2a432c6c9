use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use lzsplit_core::codec::Codec;
use lzsplit_core::format::CODEC_DEFLATE;

/// Raw deflate (no zlib or gzip wrapper) per block.
pub struct DeflateCodec {
    level: u32,
}

impl DeflateCodec {
    pub const DEFAULT_LEVEL: i32 = 6;

    pub fn new(level: i32) -> anyhow::Result<Self> {
        anyhow::ensure!((0..=9).contains(&level), "deflate level {level} outside 0..=9");
        Ok(Self {
            level: level as u32,
        })
    }
}

impl Default for DeflateCodec {
    fn default() -> Self {
        Self {
            level: Self::DEFAULT_LEVEL as u32,
        }
    }
}

impl Codec for DeflateCodec {
    fn id(&self) -> u16 {
        CODEC_DEFLATE
    }

    fn name(&self) -> &'static str {
        "deflate"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(
            Vec::with_capacity(raw.len() / 2),
            Compression::new(self.level),
        );
        encoder.write_all(raw)?;
        Ok(encoder.finish()?)
    }

    fn decompress_block(&self, compressed: &[u8], raw_len: usize) -> anyhow::Result<Vec<u8>> {
        let mut raw = Vec::with_capacity(raw_len);
        // Read one byte past raw_len so an oversized block is detected.
        DeflateDecoder::new(compressed)
            .take(raw_len as u64 + 1)
            .read_to_end(&mut raw)?;
        anyhow::ensure!(
            raw.len() <= raw_len,
            "deflate block inflates past the {raw_len} bytes its header declares"
        );
        anyhow::ensure!(
            raw.len() == raw_len,
            "deflate block inflated to {} bytes, header says {raw_len}",
            raw.len()
        );
        Ok(raw)
    }
}
