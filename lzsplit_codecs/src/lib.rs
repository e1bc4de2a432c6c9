mod deflate_codec;
mod lz4_codec;
mod lzo_codec;
mod passthrough;
mod zstd_codec;

pub use deflate_codec::DeflateCodec;
pub use lz4_codec::Lz4Codec;
pub use lzo_codec::LzoCodec;
pub use passthrough::PassThroughCodec;
pub use zstd_codec::ZstdCodec;

use anyhow::Context;
use lzsplit_core::format::{CODEC_DEFLATE, CODEC_LZ4, CODEC_LZO, CODEC_PASSTHROUGH, CODEC_ZSTD};
use lzsplit_core::Codec;
use std::sync::Arc;

/// Names accepted by [`codec_by_name`], in display order.
pub const CODEC_NAMES: &[&str] = &["lzo", "lz4", "zstd", "deflate", "passthrough"];

/// Resolve a codec from its numeric id, with default settings.
pub fn codec_by_id(id: u16) -> anyhow::Result<Arc<dyn Codec>> {
    match id {
        CODEC_PASSTHROUGH => Ok(Arc::new(PassThroughCodec)),
        CODEC_ZSTD => Ok(Arc::new(ZstdCodec::default())),
        CODEC_LZ4 => Ok(Arc::new(Lz4Codec)),
        CODEC_DEFLATE => Ok(Arc::new(DeflateCodec::default())),
        CODEC_LZO => Ok(Arc::new(LzoCodec)),
        _ => anyhow::bail!(
            "unknown codec id {id}; supported: 0 (passthrough), 1 (zstd), 2 (lz4), 3 (deflate), 4 (lzo)"
        ),
    }
}

/// Resolve a codec from a CLI/config spelling such as `lz4`, `zstd:9` or
/// `deflate:1`. The optional `:level` suffix applies to zstd and deflate.
pub fn codec_by_name(selector: &str) -> anyhow::Result<Arc<dyn Codec>> {
    let selector = selector.trim().to_ascii_lowercase();
    let (name, level) = match selector.split_once(':') {
        Some((name, level)) => {
            let level: i32 = level
                .parse()
                .with_context(|| format!("invalid compression level in {selector:?}"))?;
            (name, Some(level))
        }
        None => (selector.as_str(), None),
    };

    let codec: Arc<dyn Codec> = match (name, level) {
        ("lzo" | "lzo1x", None) => Arc::new(LzoCodec),
        ("lz4", None) => Arc::new(Lz4Codec),
        ("zstd" | "zst", level) => Arc::new(ZstdCodec::new(level.unwrap_or(ZstdCodec::DEFAULT_LEVEL))?),
        ("deflate" | "flate", level) => {
            Arc::new(DeflateCodec::new(level.unwrap_or(DeflateCodec::DEFAULT_LEVEL))?)
        }
        ("passthrough" | "none" | "store", None) => Arc::new(PassThroughCodec),
        (_, Some(_)) if CODEC_NAMES.contains(&name) || matches!(name, "lzo1x" | "none" | "store") => {
            anyhow::bail!("codec {name:?} takes no level")
        }
        _ => anyhow::bail!("unknown codec {name:?}; supported: {}", CODEC_NAMES.join(", ")),
    };
    Ok(codec)
}
