use std::panic::{self, AssertUnwindSafe};

use lzsplit_core::codec::Codec;
use lzsplit_core::format::CODEC_LZO;

/// LZO1X block codec, the default.
///
/// Each payload is a bare LZO1X stream ending in its own end-of-stream
/// instruction; the block header carries both lengths.
pub struct LzoCodec;

impl Codec for LzoCodec {
    fn id(&self) -> u16 {
        CODEC_LZO
    }

    fn name(&self) -> &'static str {
        "lzo"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(lzokay_native::compress(raw)?)
    }

    fn decompress_block(&self, compressed: &[u8], raw_len: usize) -> anyhow::Result<Vec<u8>> {
        // The decoder indexes its own output without bounds checks on
        // back-references, so a damaged payload can panic instead of erroring.
        let decoded = panic::catch_unwind(AssertUnwindSafe(|| {
            lzokay_native::decompress_all(compressed, Some(raw_len))
        }))
        .map_err(|_| anyhow::anyhow!("lzo payload references bytes outside its output"))??;
        anyhow::ensure!(
            decoded.len() == raw_len,
            "lzo block decoded to {} bytes, header says {raw_len}",
            decoded.len()
        );
        Ok(decoded)
    }
}
