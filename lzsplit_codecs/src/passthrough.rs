use lzsplit_core::codec::Codec;
use lzsplit_core::format::CODEC_PASSTHROUGH;

/// Stores blocks as-is. Handy for already-compressed inputs and for
/// exercising the framing without codec noise.
pub struct PassThroughCodec;

impl Codec for PassThroughCodec {
    fn id(&self) -> u16 {
        CODEC_PASSTHROUGH
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decompress_block(&self, compressed: &[u8], raw_len: usize) -> anyhow::Result<Vec<u8>> {
        anyhow::ensure!(
            compressed.len() == raw_len,
            "stored block is {} bytes, header says {raw_len}",
            compressed.len()
        );
        Ok(compressed.to_vec())
    }
}
