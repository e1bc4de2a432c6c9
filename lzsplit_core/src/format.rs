/// Magic number opening every index file: the bytes "SLZX" read as a LE u32.
pub const INDEX_MAGIC: u32 = u32::from_le_bytes(*b"SLZX");

/// Current index format version. Readers dispatch on this field.
pub const INDEX_VERSION: u16 = 1;

/// Fixed size of the index file header in bytes.
///   magic:u32 + version:u16 + interval:u32 + entry_count:u64
///   = 4 + 2 + 4 + 8 = 18
pub const INDEX_HEADER_SIZE: usize = 18;

/// Size of each index entry in bytes.
///   compressed_offset:u64 + uncompressed_offset:u64 = 16
pub const INDEX_ENTRY_SIZE: usize = 16;

/// Size of the per-block header in the compressed stream.
///   compressed_len:u32 + uncompressed_len:u32 = 8
pub const BLOCK_HEADER_SIZE: u64 = 8;

/// Default raw bytes per block: 256 KiB.
pub const DEFAULT_BLOCK_SIZE: u32 = 256 * 1024;

/// Upper bound for the block size hint: 64 MiB.
pub const MAX_BLOCK_SIZE: u32 = 64 * 1024 * 1024;

/// Default number of blocks between recorded index entries.
pub const DEFAULT_INDEX_INTERVAL: u32 = 1;

/// Suffix appended to the destination name for the compressed stream.
pub const DATA_SUFFIX: &str = ".lzo";

/// Suffix appended to the destination name for the sidecar index.
pub const INDEX_SUFFIX: &str = ".lzo.index";

/// Suffix marking an artifact that is still being written.
pub const TMP_SUFFIX: &str = ".tmp";

// ── Codec IDs ──────────────────────────────────────────────────────────────

pub const CODEC_PASSTHROUGH: u16 = 0;
pub const CODEC_ZSTD: u16 = 1;
pub const CODEC_LZ4: u16 = 2;
pub const CODEC_DEFLATE: u16 = 3;
pub const CODEC_LZO: u16 = 4;

// ── Block header ───────────────────────────────────────────────────────────

/// Length prefix written in front of every compressed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHeader {
    pub compressed_len: u32,
    pub uncompressed_len: u32,
}

impl BlockHeader {
    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_SIZE as usize] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&self.compressed_len.to_le_bytes());
        buf[4..8].copy_from_slice(&self.uncompressed_len.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; BLOCK_HEADER_SIZE as usize]) -> Self {
        let [c0, c1, c2, c3, u0, u1, u2, u3] = *buf;
        Self {
            compressed_len: u32::from_le_bytes([c0, c1, c2, c3]),
            uncompressed_len: u32::from_le_bytes([u0, u1, u2, u3]),
        }
    }

    /// The reserved all-zero header that marks an explicit end of stream.
    pub fn is_end_marker(&self) -> bool {
        self.compressed_len == 0 && self.uncompressed_len == 0
    }

    /// Bytes this block occupies in the compressed stream, header included.
    pub fn framed_len(&self) -> u64 {
        BLOCK_HEADER_SIZE + self.compressed_len as u64
    }
}

// ── Index header ───────────────────────────────────────────────────────────

/// Decoded representation of the 18-byte index header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub magic: u32,
    pub version: u16,
    pub interval: u32,
    pub entry_count: u64,
}

impl IndexHeader {
    pub fn new(interval: u32, entry_count: u64) -> Self {
        Self {
            magic: INDEX_MAGIC,
            version: INDEX_VERSION,
            interval,
            entry_count,
        }
    }

    /// Serialize to exactly `INDEX_HEADER_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; INDEX_HEADER_SIZE] {
        let mut buf = [0u8; INDEX_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..10].copy_from_slice(&self.interval.to_le_bytes());
        buf[10..18].copy_from_slice(&self.entry_count.to_le_bytes());
        buf
    }

    /// Deserialize the raw fields. Magic and version are checked by the caller
    /// so that it can dispatch on the version.
    pub fn from_bytes(buf: &[u8; INDEX_HEADER_SIZE]) -> Self {
        let mut magic = [0u8; 4];
        let mut version = [0u8; 2];
        let mut interval = [0u8; 4];
        let mut count = [0u8; 8];
        magic.copy_from_slice(&buf[0..4]);
        version.copy_from_slice(&buf[4..6]);
        interval.copy_from_slice(&buf[6..10]);
        count.copy_from_slice(&buf[10..18]);
        Self {
            magic: u32::from_le_bytes(magic),
            version: u16::from_le_bytes(version),
            interval: u32::from_le_bytes(interval),
            entry_count: u64::from_le_bytes(count),
        }
    }
}

// ── Index entry ────────────────────────────────────────────────────────────

/// One recorded seek point: where a block header starts in the compressed
/// stream and how many uncompressed bytes precede it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexEntry {
    pub compressed_offset: u64,
    pub uncompressed_offset: u64,
}

impl IndexEntry {
    pub fn to_bytes(&self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        buf[0..8].copy_from_slice(&self.compressed_offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.uncompressed_offset.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; INDEX_ENTRY_SIZE]) -> Self {
        let mut compressed = [0u8; 8];
        let mut uncompressed = [0u8; 8];
        compressed.copy_from_slice(&buf[0..8]);
        uncompressed.copy_from_slice(&buf[8..16]);
        Self {
            compressed_offset: u64::from_le_bytes(compressed),
            uncompressed_offset: u64::from_le_bytes(uncompressed),
        }
    }
}

/// `<dest>.lzo`
pub fn data_path(dest: &str) -> String {
    format!("{dest}{DATA_SUFFIX}")
}

/// `<dest>.lzo.index`
pub fn index_path(dest: &str) -> String {
    format!("{dest}{INDEX_SUFFIX}")
}

/// `<path>.tmp`
pub fn tmp_path(path: &str) -> String {
    format!("{path}{TMP_SUFFIX}")
}
