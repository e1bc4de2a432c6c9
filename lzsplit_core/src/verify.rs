//! Independent consistency check of an artifact pair.
//!
//! The data file is re-parsed from scratch and its index derived again; the
//! stored index must match that derivation exactly, which proves every stored
//! entry lands on a block header. Then the stream is decoded once end to end
//! and once split-wise in parallel, and the xxh3 digests of each split's
//! output are compared.

use std::io::{self, Write};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info};
use xxhash_rust::xxh3::Xxh3;

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::index::{Index, Split};
use crate::indexer::scan;
use crate::reader::{BlockDecoder, SplitReader};
use crate::storage::StreamProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub blocks: u64,
    pub entries: usize,
    pub compressed_len: u64,
    pub uncompressed_len: u64,
    pub splits: usize,
    /// xxh3 of the full decoded stream.
    pub digest: u64,
}

/// Check `index_path` against `data_path`, decoding with up to `splits`
/// parallel readers.
pub fn verify_pair(
    provider: &dyn StreamProvider,
    data_path: &str,
    index_path: &str,
    codec: Arc<dyn Codec>,
    splits: usize,
) -> Result<VerifyReport> {
    let stored = Index::read_from(&mut provider.open(index_path)?)?;
    let derived = scan(provider.open(data_path)?, stored.interval())?;
    compare_indexes(&stored, &derived.index)?;
    debug!(entries = stored.len(), "index matches a fresh scan");

    let plan = stored.plan_splits(splits.max(1), derived.compressed_len)?;
    let (digest, expected) = sequential_digests(provider, data_path, &codec, &plan)?;

    let actual: Vec<(u64, u64)> = plan
        .par_iter()
        .map(|split| -> Result<(u64, u64)> {
            let mut reader = SplitReader::new(
                provider.open_seekable(data_path)?,
                stored.clone(),
                codec.clone(),
            );
            let mut hasher = HashingSink::default();
            reader.read_split(split, &mut hasher)?;
            Ok((hasher.bytes, hasher.state.digest()))
        })
        .collect::<Result<_>>()?;

    for (split, (want, got)) in plan.iter().zip(expected.iter().zip(&actual)) {
        if want != got {
            return Err(Error::malformed(
                Some(split.first_entry as u64),
                format!(
                    "split {} decodes to {} bytes (xxh3 {:016x}), full decode has {} bytes (xxh3 {:016x})",
                    split.ordinal, got.0, got.1, want.0, want.1
                ),
            ));
        }
    }

    let report = VerifyReport {
        blocks: derived.blocks,
        entries: stored.len(),
        compressed_len: derived.compressed_len,
        uncompressed_len: derived.uncompressed_len,
        splits: plan.len(),
        digest,
    };
    info!(
        data = data_path,
        blocks = report.blocks,
        splits = report.splits,
        digest = format_args!("{:016x}", report.digest),
        "artifact pair verified"
    );
    Ok(report)
}

fn compare_indexes(stored: &Index, derived: &Index) -> Result<()> {
    if stored == derived {
        return Ok(());
    }
    let mismatch = stored
        .entries()
        .iter()
        .zip(derived.entries())
        .position(|(s, d)| s != d);
    match mismatch {
        Some(i) => {
            let (s, d) = (stored.entries()[i], derived.entries()[i]);
            Err(Error::malformed(
                Some(i as u64),
                format!(
                    "entry ({}, {}) does not match block header at ({}, {})",
                    s.compressed_offset, s.uncompressed_offset, d.compressed_offset, d.uncompressed_offset
                ),
            ))
        }
        None => Err(Error::malformed(
            None,
            format!(
                "index has {} entries, data file yields {}",
                stored.len(),
                derived.len()
            ),
        )),
    }
}

/// Decode the whole stream once, returning its digest and the
/// `(bytes, digest)` of each split's share of it.
fn sequential_digests(
    provider: &dyn StreamProvider,
    data_path: &str,
    codec: &Arc<dyn Codec>,
    plan: &[Split],
) -> Result<(u64, Vec<(u64, u64)>)> {
    let mut whole = Xxh3::new();
    let mut per_split = Vec::with_capacity(plan.len());
    let mut current: Option<HashingSink> = None;
    let mut next_split = plan.iter().peekable();

    for block in BlockDecoder::new(provider.open(data_path)?, codec.clone()) {
        let block = block?;
        if next_split.peek().is_some_and(|s| s.start == block.offset) {
            next_split.next();
            if let Some(done) = current.replace(HashingSink::default()) {
                per_split.push((done.bytes, done.state.digest()));
            }
        }
        whole.update(&block.data);
        if let Some(sink) = current.as_mut() {
            sink.absorb(&block.data);
        }
    }
    if let Some(done) = current {
        per_split.push((done.bytes, done.state.digest()));
    }
    Ok((whole.digest(), per_split))
}

#[derive(Default)]
struct HashingSink {
    state: Xxh3,
    bytes: u64,
}

impl HashingSink {
    fn absorb(&mut self, data: &[u8]) {
        self.state.update(data);
        self.bytes += data.len() as u64;
    }
}

impl Write for HashingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.absorb(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
