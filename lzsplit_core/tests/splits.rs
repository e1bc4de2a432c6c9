/// Split plans cut a stream into disjoint, block-aligned pieces that
/// independent readers decode in parallel; `verify_pair` proves the pieces
/// add up to the whole.
mod common;

use std::io::Cursor;
use std::sync::Arc;

use rayon::prelude::*;

use lzsplit_codecs::Lz4Codec;
use lzsplit_core::format::{IndexEntry, BLOCK_HEADER_SIZE};
use lzsplit_core::storage::{MemoryStore, StreamProvider};
use lzsplit_core::{
    decode_all, scan, verify_pair, CancelToken, Codec, ErrorKind, Index, Pipeline, PipelineConfig,
    SplitReader,
};

use common::{compress, trade_csv};

const KB: u32 = 1024;

#[test]
fn test_plan_is_disjoint_aligned_and_covering() {
    let data = trade_csv(2_000_000);
    let (stream, index) = compress(&data, Arc::new(Lz4Codec), 16 * KB, 3);
    let headers: Vec<u64> = scan(&stream[..], 1)
        .unwrap()
        .index
        .entries()
        .iter()
        .map(|e| e.compressed_offset)
        .collect();

    for n in [1usize, 2, 3, 7, 16, 1000] {
        let plan = index.plan_splits(n, stream.len() as u64).unwrap();
        assert!(plan.len() <= n);
        assert_eq!(plan.len(), n.min(index.len()));
        assert_eq!(plan[0].start, 0);
        assert_eq!(plan.last().unwrap().end, stream.len() as u64);
        for pair in plan.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "gap or overlap at n = {n}");
        }
        for split in &plan {
            assert!(split.start < split.end);
            assert!(headers.binary_search(&split.start).is_ok(), "split start {} off a header", split.start);
        }
    }
}

#[test]
fn test_parallel_split_decode_equals_full_decode() {
    let data = trade_csv(3_000_000);
    let codec: Arc<dyn Codec> = Arc::new(Lz4Codec);
    let (stream, index) = compress(&data, codec.clone(), 32 * KB, 2);
    let plan = index.plan_splits(6, stream.len() as u64).unwrap();

    let parts: Vec<Vec<u8>> = plan
        .par_iter()
        .map(|split| {
            let mut reader = SplitReader::new(Cursor::new(&stream[..]), index.clone(), codec.clone());
            let mut out = Vec::new();
            reader.read_split(split, &mut out).unwrap();
            assert_eq!(
                out.first(),
                data.get(split.uncompressed_offset as usize),
                "split {} starts at the wrong raw offset",
                split.ordinal
            );
            out
        })
        .collect();
    assert_eq!(parts.concat(), data);
}

#[test]
fn test_split_that_ends_mid_block_is_corrupt() {
    let data = trade_csv(200_000);
    let codec: Arc<dyn Codec> = Arc::new(Lz4Codec);
    let (stream, index) = compress(&data, codec.clone(), 16 * KB, 1);
    let mut split = index.plan_splits(2, stream.len() as u64).unwrap()[0];
    split.end -= 1;

    let mut reader = SplitReader::new(Cursor::new(stream), index, codec);
    let err = reader.read_split(&split, &mut Vec::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptStream);
}

#[test]
fn test_split_reader_over_end_marker() {
    let data = trade_csv(100_000);
    let codec: Arc<dyn Codec> = Arc::new(Lz4Codec);
    let (mut stream, index) = compress(&data, codec.clone(), 16 * KB, 2);
    stream.extend_from_slice(&[0u8; BLOCK_HEADER_SIZE as usize]);

    let plan = index.plan_splits(3, stream.len() as u64).unwrap();
    let mut reader = SplitReader::new(Cursor::new(stream), index, codec);
    let mut out = Vec::new();
    for split in &plan {
        reader.read_split(split, &mut out).unwrap();
    }
    assert_eq!(out, data);
}

// ── verify ─────────────────────────────────────────────────────────────────

fn committed_pair(store: &MemoryStore) -> (String, String) {
    store.insert("src.csv", trade_csv(1_500_000));
    let provider: Arc<dyn StreamProvider> = Arc::new(store.clone());
    let pair = Pipeline::new(
        PipelineConfig {
            block_size_hint: 32 * KB,
            index_interval: 2,
            ..PipelineConfig::new("src.csv", "art")
        },
        Arc::new(Lz4Codec),
        provider.clone(),
        provider,
    )
    .run(&CancelToken::new())
    .unwrap();
    (pair.data_path, pair.index_path)
}

#[test]
fn test_verify_accepts_a_committed_pair() {
    let store = MemoryStore::new();
    let (data, index) = committed_pair(&store);
    let report = verify_pair(&store, &data, &index, Arc::new(Lz4Codec), 4).unwrap();

    assert_eq!(report.blocks, 46);
    assert_eq!(report.entries, 23);
    assert_eq!(report.splits, 4);
    assert_eq!(report.uncompressed_len, 1_500_000);

    let mut decoded = Vec::new();
    decode_all(&store.get(&data).unwrap()[..], Arc::new(Lz4Codec), &mut decoded).unwrap();
    assert_eq!(report.digest, xxhash_rust::xxh3::xxh3_64(&decoded));
}

#[test]
fn test_verify_rejects_an_index_for_another_stream() {
    let store = MemoryStore::new();
    let (data, index) = committed_pair(&store);

    // Shift one entry so it no longer sits on a block header.
    let mut entries: Vec<IndexEntry> = Index::from_bytes(&store.get(&index).unwrap())
        .unwrap()
        .entries()
        .to_vec();
    entries[3].compressed_offset += 1;
    let mut bytes = lzsplit_core::IndexHeader::new(2, entries.len() as u64).to_bytes().to_vec();
    for e in &entries {
        bytes.extend_from_slice(&e.to_bytes());
    }
    store.insert(index.clone(), bytes);

    let err = verify_pair(&store, &data, &index, Arc::new(Lz4Codec), 4).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedIndex);
    assert!(err.to_string().contains("entry 3"), "{err}");
}

#[test]
fn test_verify_rejects_entries_from_another_interval() {
    let store = MemoryStore::new();
    let (data, index) = committed_pair(&store);

    // Entries taken every 4 blocks but labelled as every 2.
    let every_four = scan(&store.get(&data).unwrap()[..], 4).unwrap().index;
    let mut bytes = lzsplit_core::IndexHeader::new(2, every_four.len() as u64).to_bytes().to_vec();
    for e in every_four.entries() {
        bytes.extend_from_slice(&e.to_bytes());
    }
    store.insert(index.clone(), bytes);

    match verify_pair(&store, &data, &index, Arc::new(Lz4Codec), 2) {
        Err(lzsplit_core::Error::MalformedIndex { entry, .. }) => assert_eq!(entry, Some(1)),
        other => panic!("expected a malformed index, got {other:?}"),
    }
}

#[test]
fn test_verify_missing_index_is_io() {
    let store = MemoryStore::new();
    let (data, _) = committed_pair(&store);
    let err = verify_pair(&store, &data, "nope.index", Arc::new(Lz4Codec), 2).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}
