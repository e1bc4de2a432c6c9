use lzsplit_core::codec::Codec;
use lzsplit_core::format::CODEC_LZ4;

/// LZ4 block codec.
///
/// Uses the raw LZ4 block format: no frame header or checksum inside the
/// payload, since the block header already records both lengths. Decodes
/// faster than LZO at a similar ratio.
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn id(&self) -> u16 {
        CODEC_LZ4
    }

    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(lz4_flex::block::compress(raw))
    }

    fn decompress_block(&self, compressed: &[u8], raw_len: usize) -> anyhow::Result<Vec<u8>> {
        let raw = lz4_flex::block::decompress(compressed, raw_len)?;
        anyhow::ensure!(
            raw.len() == raw_len,
            "lz4 block decoded to {} bytes, header says {raw_len}",
            raw.len()
        );
        Ok(raw)
    }
}
