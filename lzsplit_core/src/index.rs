//! The sidecar index: an ordered list of block-aligned seek points.
//!
//! # File layout
//! ```text
//! [HEADER: 18 bytes]  magic:u32  version:u16  interval:u32  entry_count:u64
//! [ENTRY 0] [ENTRY 1] ... [ENTRY N-1]        16 bytes each
//! ```
//! All fields are little-endian. The header makes the file self-describing,
//! so loading it needs no metadata from the compressed stream.

use std::io::{Read, Write};

use crate::codec::fill;
use crate::error::{Error, Result};
use crate::format::{
    IndexEntry, IndexHeader, INDEX_ENTRY_SIZE, INDEX_HEADER_SIZE, INDEX_MAGIC, INDEX_VERSION,
};

/// Upper bound on entries preallocated from an untrusted header.
const PREALLOC_ENTRIES: u64 = 64 * 1024;

/// Block offsets recorded every `interval` blocks.
///
/// Entry `i` describes block `i * interval`. Both offset columns are strictly
/// increasing and the first entry, when present, is `(0, 0)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    interval: u32,
    entries: Vec<IndexEntry>,
}

/// A block-aligned, half-open byte range of the compressed stream that one
/// reader can decode on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split {
    /// Position of this split in the plan.
    pub ordinal: usize,
    /// Index entry the split starts at.
    pub first_entry: usize,
    /// Compressed offset of the first block header in the split.
    pub start: u64,
    /// Compressed offset one past the split's last byte.
    pub end: u64,
    /// Uncompressed offset at which the split's output begins.
    pub uncompressed_offset: u64,
}

impl Split {
    pub fn compressed_len(&self) -> u64 {
        self.end - self.start
    }
}

impl Index {
    pub(crate) fn from_parts(interval: u32, entries: Vec<IndexEntry>) -> Self {
        Self { interval, entries }
    }

    /// Blocks between recorded entries.
    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Size of the serialized index in bytes.
    pub fn encoded_len(&self) -> u64 {
        INDEX_HEADER_SIZE as u64 + self.entries.len() as u64 * INDEX_ENTRY_SIZE as u64
    }

    /// Block number described by entry `i`.
    pub fn block_of(&self, entry: usize) -> u64 {
        entry as u64 * self.interval as u64
    }

    /// Last entry at or before `uncompressed_offset`, with its position.
    pub fn locate(&self, uncompressed_offset: u64) -> Option<(usize, &IndexEntry)> {
        let after = self
            .entries
            .partition_point(|e| e.uncompressed_offset <= uncompressed_offset);
        let i = after.checked_sub(1)?;
        Some((i, &self.entries[i]))
    }

    /// Serialize header and entries to `sink`.
    pub fn write_to(&self, sink: &mut impl Write) -> Result<()> {
        let header = IndexHeader::new(self.interval, self.entries.len() as u64);
        sink.write_all(&header.to_bytes())?;
        for entry in &self.entries {
            sink.write_all(&entry.to_bytes())?;
        }
        sink.flush()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len() as usize);
        out.extend_from_slice(&IndexHeader::new(self.interval, self.entries.len() as u64).to_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.to_bytes());
        }
        out
    }

    /// Deserialize and validate an index.
    ///
    /// Checks the magic, dispatches on the format version, and verifies the
    /// entry count and ordering. Nothing is checked against the compressed
    /// stream; that happens when a caller first seeks to an entry.
    pub fn read_from(source: &mut impl Read) -> Result<Self> {
        let mut raw = [0u8; INDEX_HEADER_SIZE];
        let n = fill(source, &mut raw)?;
        if n < INDEX_HEADER_SIZE {
            return Err(Error::malformed(
                None,
                format!("truncated header: {n} of {INDEX_HEADER_SIZE} bytes"),
            ));
        }
        let header = IndexHeader::from_bytes(&raw);
        if header.magic != INDEX_MAGIC {
            return Err(Error::malformed(
                None,
                format!("bad magic {:#010x}, expected {:#010x}", header.magic, INDEX_MAGIC),
            ));
        }
        match header.version {
            INDEX_VERSION => Self::read_v1_body(source, &header),
            other => Err(Error::malformed(
                None,
                format!("unsupported format version {other} (supported: {INDEX_VERSION})"),
            )),
        }
    }

    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self> {
        Self::read_from(&mut bytes)
    }

    fn read_v1_body(source: &mut impl Read, header: &IndexHeader) -> Result<Self> {
        if header.interval == 0 {
            return Err(Error::malformed(None, "index interval is zero"));
        }

        let mut entries = Vec::with_capacity(header.entry_count.min(PREALLOC_ENTRIES) as usize);
        let mut raw = [0u8; INDEX_ENTRY_SIZE];
        for i in 0..header.entry_count {
            if fill(source, &mut raw)? < INDEX_ENTRY_SIZE {
                return Err(Error::malformed(
                    Some(i),
                    format!("header declares {} entries but only {i} present", header.entry_count),
                ));
            }
            let entry = IndexEntry::from_bytes(&raw);
            match entries.last() {
                None if entry != IndexEntry::default() => {
                    return Err(Error::malformed(
                        Some(0),
                        format!(
                            "first entry must be (0, 0), found ({}, {})",
                            entry.compressed_offset, entry.uncompressed_offset
                        ),
                    ));
                }
                Some(prev) if !strictly_after(prev, &entry) => {
                    return Err(Error::malformed(
                        Some(i),
                        format!(
                            "entry ({}, {}) does not follow ({}, {})",
                            entry.compressed_offset,
                            entry.uncompressed_offset,
                            prev.compressed_offset,
                            prev.uncompressed_offset
                        ),
                    ));
                }
                _ => {}
            }
            entries.push(entry);
        }

        let mut probe = [0u8; 1];
        if fill(source, &mut probe)? != 0 {
            return Err(Error::malformed(
                None,
                format!("trailing bytes after {} entries", header.entry_count),
            ));
        }

        Ok(Self {
            interval: header.interval,
            entries,
        })
    }

    /// Cut the stream into at most `n` disjoint splits that start on indexed
    /// block boundaries and together cover `[0, compressed_len)`.
    ///
    /// Splits are balanced by entry count. An empty index yields no splits.
    pub fn plan_splits(&self, n: usize, compressed_len: u64) -> Result<Vec<Split>> {
        if n == 0 {
            return Err(Error::Config("split count must be at least 1".to_string()));
        }
        let Some(last) = self.entries.last() else {
            return Ok(Vec::new());
        };
        if compressed_len <= last.compressed_offset {
            return Err(Error::malformed(
                Some(self.entries.len() as u64 - 1),
                format!(
                    "entry at offset {} lies beyond a {compressed_len}-byte stream",
                    last.compressed_offset
                ),
            ));
        }

        let total = self.entries.len();
        let n = n.min(total);
        let starts: Vec<usize> = (0..n).map(|g| g * total / n).collect();
        let splits = starts
            .iter()
            .enumerate()
            .map(|(ordinal, &first)| {
                let end = starts
                    .get(ordinal + 1)
                    .map(|&next| self.entries[next].compressed_offset)
                    .unwrap_or(compressed_len);
                let entry = &self.entries[first];
                Split {
                    ordinal,
                    first_entry: first,
                    start: entry.compressed_offset,
                    end,
                    uncompressed_offset: entry.uncompressed_offset,
                }
            })
            .collect();
        Ok(splits)
    }
}

fn strictly_after(prev: &IndexEntry, next: &IndexEntry) -> bool {
    next.compressed_offset > prev.compressed_offset
        && next.uncompressed_offset > prev.uncompressed_offset
}
