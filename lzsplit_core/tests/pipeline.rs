/// End-to-end passes through `Pipeline`: artifacts land as a pair, the index
/// is the last thing to appear, and nothing is left behind on failure.
mod common;

use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use lzsplit_codecs::{Lz4Codec, LzoCodec, ZstdCodec};
use lzsplit_core::storage::{ArtifactSink, LocalFs, MemoryStore, SeekRead, StreamProvider};
use lzsplit_core::{
    decode_all, jobs_for_dir, reindex, run_batch, BatchJob, CancelToken, Codec, ErrorKind, Index,
    Pipeline, PipelineConfig, PipelineState, Settings,
};

use common::{trade_csv, CancellingReader, FailingReader, ScriptedSource};

const KB: u32 = 1024;

fn config(src: &str, dest: &str, block_size: u32, interval: u32) -> PipelineConfig {
    PipelineConfig {
        block_size_hint: block_size,
        index_interval: interval,
        queue_depth: 2,
        ..PipelineConfig::new(src, dest)
    }
}

fn run_in_memory(store: &MemoryStore, cfg: PipelineConfig) -> lzsplit_core::ArtifactPair {
    let provider: Arc<dyn StreamProvider> = Arc::new(store.clone());
    Pipeline::new(cfg, Arc::new(Lz4Codec), provider.clone(), provider)
        .run(&CancelToken::new())
        .unwrap()
}

// ── happy path ─────────────────────────────────────────────────────────────

#[test]
fn test_memory_pipeline_writes_a_decodable_pair() {
    let data = trade_csv(1_000_000);
    let store = MemoryStore::new();
    store.insert("in/trades.csv", data.clone());

    let pair = run_in_memory(&store, config("in/trades.csv", "out/trades", 64 * KB, 2));
    assert_eq!(pair.data_path, "out/trades.lzo");
    assert_eq!(pair.index_path, "out/trades.lzo.index");
    assert_eq!(pair.blocks, 16);
    assert_eq!(pair.index_entries, 8);
    assert_eq!(pair.uncompressed_bytes, data.len() as u64);

    assert_eq!(
        store.paths(),
        vec!["in/trades.csv", "out/trades.lzo", "out/trades.lzo.index"]
    );

    let stream = store.get("out/trades.lzo").unwrap();
    assert_eq!(stream.len() as u64, pair.compressed_bytes);
    let mut out = Vec::new();
    decode_all(&stream[..], Arc::new(Lz4Codec), &mut out).unwrap();
    assert_eq!(out, data);

    let index_bytes = store.get("out/trades.lzo.index").unwrap();
    assert_eq!(index_bytes.len() as u64, pair.index_bytes);
    let index = Index::from_bytes(&index_bytes).unwrap();
    assert_eq!(index.len(), 8);
    assert_eq!(index.interval(), 2);
}

#[test]
fn test_reruns_are_byte_identical_and_overwrite() {
    let data = trade_csv(300_000);
    let store = MemoryStore::new();
    store.insert("src", data);
    store.insert("dst.lzo.index", b"stale".to_vec());

    run_in_memory(&store, config("src", "dst", 16 * KB, 3));
    let first = (store.get("dst.lzo").unwrap(), store.get("dst.lzo.index").unwrap());
    run_in_memory(&store, config("src", "dst", 16 * KB, 3));
    let second = (store.get("dst.lzo").unwrap(), store.get("dst.lzo.index").unwrap());

    assert_eq!(first, second);
    assert!(Index::from_bytes(&first.1).is_ok());
}

#[test]
fn test_empty_source_gives_empty_pair() {
    let store = MemoryStore::new();
    store.insert("empty", Vec::new());
    let pair = run_in_memory(&store, config("empty", "empty", 16 * KB, 1));
    assert_eq!(pair.blocks, 0);
    assert_eq!(store.get("empty.lzo").unwrap().len(), 0);
    assert!(Index::from_bytes(&store.get("empty.lzo.index").unwrap())
        .unwrap()
        .is_empty());
}

#[test]
fn test_local_pipeline_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("trades.csv");
    let data = trade_csv(500_000);
    std::fs::write(&src, &data).unwrap();
    let dest = dir.path().join("out").join("trades");

    let local: Arc<dyn StreamProvider> = Arc::new(LocalFs::new());
    let codec: Arc<dyn Codec> = Arc::new(ZstdCodec::default());
    let mut pipeline = Pipeline::new(
        config(src.to_str().unwrap(), dest.to_str().unwrap(), 32 * KB, 4),
        codec.clone(),
        local.clone(),
        local,
    );
    let pair = pipeline.run(&CancelToken::new()).unwrap();
    assert_eq!(pipeline.state(), PipelineState::Done);

    let stream = std::fs::read(&pair.data_path).unwrap();
    let mut out = Vec::new();
    decode_all(&stream[..], codec, &mut out).unwrap();
    assert_eq!(out, data);
    assert!(std::path::Path::new(&pair.index_path).exists());
    assert!(!std::path::Path::new(&format!("{}.tmp", pair.data_path)).exists());
    assert!(!std::path::Path::new(&format!("{}.tmp", pair.index_path)).exists());
}

#[cfg(feature = "object-store")]
#[test]
fn test_object_store_destination() {
    use lzsplit_core::storage::ObjectStoreProvider;

    let data = trade_csv(400_000);
    let source = MemoryStore::new();
    source.insert("trades.csv", data.clone());
    let remote = ObjectStoreProvider::in_memory().unwrap();

    let pair = Pipeline::new(
        config("trades.csv", "scenarios/trades", 32 * KB, 2),
        Arc::new(Lz4Codec),
        Arc::new(source),
        Arc::new(remote.clone()),
    )
    .run(&CancelToken::new())
    .unwrap();

    assert_eq!(pair.data_path, "scenarios/trades.lzo");
    assert!(remote.exists("scenarios/trades.lzo.index").unwrap());
    assert!(!remote.exists("scenarios/trades.lzo.tmp").unwrap());
    let report =
        lzsplit_core::verify_pair(&remote, &pair.data_path, &pair.index_path, Arc::new(Lz4Codec), 3)
            .unwrap();
    assert_eq!(report.uncompressed_len, data.len() as u64);
}

#[cfg(feature = "object-store")]
#[test]
fn test_object_store_source() {
    use lzsplit_core::storage::ObjectStoreProvider;

    let data = trade_csv(300_000);
    let remote = ObjectStoreProvider::in_memory().unwrap();
    let mut upload = remote.create("landing/trades.csv").unwrap();
    upload.write_all(&data).unwrap();
    upload.commit().unwrap();
    let local = MemoryStore::new();

    let pair = Pipeline::new(
        config("landing/trades.csv", "out/trades", 16 * KB, 3),
        Arc::new(LzoCodec),
        Arc::new(remote.clone()),
        Arc::new(local.clone()),
    )
    .run(&CancelToken::new())
    .unwrap();

    assert_eq!(pair.uncompressed_bytes, data.len() as u64);
    let mut out = Vec::new();
    decode_all(&local.get("out/trades.lzo").unwrap()[..], Arc::new(LzoCodec), &mut out).unwrap();
    assert_eq!(out, data);
    // The source object is left where it was.
    assert!(remote.exists("landing/trades.csv").unwrap());
}

#[cfg(feature = "object-store")]
#[test]
fn test_batch_into_object_store() {
    use lzsplit_core::storage::ObjectStoreProvider;

    let local = MemoryStore::new();
    let jobs: Vec<BatchJob> = (0..4)
        .map(|i| {
            local.insert(format!("in/{i}.csv"), trade_csv(20_000 + i * 3_000));
            BatchJob {
                source_path: format!("in/{i}.csv"),
                destination_path: format!("exports/{i}"),
            }
        })
        .collect();
    let remote = ObjectStoreProvider::in_memory().unwrap();
    let mut settings = Settings::default();
    settings.batch.parallelism = 2;
    settings.pipeline.block_size_hint = 8 * KB;

    let outcomes = run_batch(
        jobs,
        &settings,
        Arc::new(LzoCodec),
        Arc::new(local.clone()),
        Arc::new(remote.clone()),
        &CancelToken::new(),
    )
    .unwrap();

    assert!(outcomes.iter().all(|o| o.is_ok()));
    for i in 0..4 {
        let data = format!("exports/{i}.lzo");
        let index = format!("exports/{i}.lzo.index");
        assert!(!local.exists(&data).unwrap());
        let report = lzsplit_core::verify_pair(&remote, &data, &index, Arc::new(LzoCodec), 2).unwrap();
        assert_eq!(report.uncompressed_len, 20_000 + i as u64 * 3_000);
    }
}

#[test]
fn test_pipeline_runs_only_once() {
    let store = MemoryStore::new();
    store.insert("a", trade_csv(1000));
    let provider: Arc<dyn StreamProvider> = Arc::new(store);
    let mut pipeline = Pipeline::new(
        config("a", "b", 16 * KB, 1),
        Arc::new(Lz4Codec),
        provider.clone(),
        provider,
    );
    pipeline.run(&CancelToken::new()).unwrap();
    let again = pipeline.run(&CancelToken::new()).unwrap_err();
    assert_eq!(again.kind(), ErrorKind::Config);
}

// ── failure paths ──────────────────────────────────────────────────────────

#[test]
fn test_cancellation_mid_pass_leaves_nothing() {
    let store = MemoryStore::new();
    let token = CancelToken::new();
    let trigger = token.clone();
    let source = ScriptedSource {
        store: store.clone(),
        path: "big".to_string(),
        make: move || -> Box<dyn Read + Send> {
            Box::new(CancellingReader {
                inner: Cursor::new(trade_csv(2_000_000)),
                token: trigger.clone(),
                after: 300_000,
                read: 0,
            })
        },
    };
    let sink: Arc<dyn StreamProvider> = Arc::new(store.clone());
    let mut pipeline = Pipeline::new(
        config("big", "out/big", 64 * KB, 1),
        Arc::new(Lz4Codec),
        Arc::new(source),
        sink,
    );

    let failure = pipeline.run(&token).unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::Cancelled);
    assert_eq!(failure.state, PipelineState::CompressingAndIndexing);
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(store.paths().is_empty(), "left behind: {:?}", store.paths());
}

#[test]
fn test_cancelled_before_start() {
    let store = MemoryStore::new();
    store.insert("a", trade_csv(1000));
    let provider: Arc<dyn StreamProvider> = Arc::new(store.clone());
    let token = CancelToken::new();
    token.cancel();

    let failure = Pipeline::new(config("a", "b", 16 * KB, 1), Arc::new(Lz4Codec), provider.clone(), provider)
        .run(&token)
        .unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::Cancelled);
    assert_eq!(failure.state, PipelineState::Idle);
    assert_eq!(store.paths(), vec!["a"]);
}

#[test]
fn test_failing_source_produces_no_index() {
    let store = MemoryStore::new();
    let source = ScriptedSource {
        store: store.clone(),
        path: "flaky".to_string(),
        make: || -> Box<dyn Read + Send> { Box::new(FailingReader::new(trade_csv(200_000))) },
    };
    let sink: Arc<dyn StreamProvider> = Arc::new(store.clone());
    let failure = Pipeline::new(config("flaky", "out", 16 * KB, 1), Arc::new(Lz4Codec), Arc::new(source), sink)
        .run(&CancelToken::new())
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::Io);
    assert!(!store.exists("out.lzo.index").unwrap());
    assert!(store.paths().is_empty(), "left behind: {:?}", store.paths());
}

#[test]
fn test_missing_source_is_io_while_reading() {
    let store = MemoryStore::new();
    let provider: Arc<dyn StreamProvider> = Arc::new(store.clone());
    let failure = Pipeline::new(config("nope", "out", 16 * KB, 1), Arc::new(Lz4Codec), provider.clone(), provider)
        .run(&CancelToken::new())
        .unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::Io);
    assert_eq!(failure.state, PipelineState::ReadingSource);
}

#[test]
fn test_invalid_config_fails_before_io() {
    let store = MemoryStore::new();
    store.insert("a", trade_csv(1000));
    let provider: Arc<dyn StreamProvider> = Arc::new(store.clone());
    let failure = Pipeline::new(config("a", "b", 16 * KB, 0), Arc::new(Lz4Codec), provider.clone(), provider)
        .run(&CancelToken::new())
        .unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::Config);
    assert_eq!(failure.state, PipelineState::Idle);
    assert_eq!(store.paths(), vec!["a"]);
}

/// Accepts a few writes, then fails every one after.
struct BrokenSink {
    budget: usize,
}

impl Write for BrokenSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.budget == 0 {
            return Err(io::Error::other("disk full"));
        }
        self.budget -= 1;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ArtifactSink for BrokenSink {
    fn commit(self: Box<Self>) -> lzsplit_core::Result<u64> {
        Ok(0)
    }
}

struct FullDisk {
    store: MemoryStore,
}

impl StreamProvider for FullDisk {
    fn name(&self) -> &'static str {
        "full"
    }
    fn open(&self, path: &str) -> lzsplit_core::Result<Box<dyn Read + Send>> {
        self.store.open(path)
    }
    fn open_seekable(&self, path: &str) -> lzsplit_core::Result<Box<dyn SeekRead>> {
        self.store.open_seekable(path)
    }
    fn create(&self, _path: &str) -> lzsplit_core::Result<Box<dyn ArtifactSink>> {
        Ok(Box::new(BrokenSink { budget: 3 }))
    }
    fn rename(&self, from: &str, to: &str) -> lzsplit_core::Result<()> {
        self.store.rename(from, to)
    }
    fn remove(&self, path: &str) -> lzsplit_core::Result<()> {
        self.store.remove(path)
    }
    fn exists(&self, path: &str) -> lzsplit_core::Result<bool> {
        self.store.exists(path)
    }
}

#[test]
fn test_writer_failure_surfaces_the_sink_error() {
    let store = MemoryStore::new();
    store.insert("src", trade_csv(2_000_000));
    let failure = Pipeline::new(
        config("src", "dst", 16 * KB, 1),
        Arc::new(Lz4Codec),
        Arc::new(store.clone()),
        Arc::new(FullDisk { store: store.clone() }),
    )
    .run(&CancelToken::new())
    .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::Io);
    assert!(failure.to_string().contains("disk full"), "{failure}");
    assert_eq!(store.paths(), vec!["src"]);
}

// ── re-indexing ────────────────────────────────────────────────────────────

#[test]
fn test_reindex_matches_the_pipeline_index() {
    let store = MemoryStore::new();
    store.insert("src", trade_csv(400_000));
    run_in_memory(&store, config("src", "dst", 16 * KB, 5));
    let original = store.get("dst.lzo.index").unwrap();

    store.remove("dst.lzo.index").unwrap();
    let report = reindex(&store, "dst.lzo", 5).unwrap();
    assert_eq!(store.get("dst.lzo.index").unwrap(), original);
    assert_eq!(report.index.len(), 5);
    assert!(!store.exists("dst.lzo.index.tmp").unwrap());
}

#[test]
fn test_reindex_of_corrupt_stream_writes_nothing() {
    let store = MemoryStore::new();
    store.insert("bad.lzo", vec![100, 0, 0, 0, 50, 0, 0, 0, 1, 2, 3]);
    let err = reindex(&store, "bad.lzo", 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptStream);
    assert_eq!(store.paths(), vec!["bad.lzo"]);
}

// ── batch ──────────────────────────────────────────────────────────────────

#[test]
fn test_batch_isolates_failures_and_keeps_order() {
    let store = MemoryStore::new();
    for i in 0..6 {
        store.insert(format!("in/{i}.csv"), trade_csv(50_000 + i * 10_000));
    }
    let mut jobs: Vec<BatchJob> = (0..6)
        .map(|i| BatchJob {
            source_path: format!("in/{i}.csv"),
            destination_path: format!("out/{i}"),
        })
        .collect();
    jobs.insert(
        2,
        BatchJob {
            source_path: "in/missing.csv".to_string(),
            destination_path: "out/missing".to_string(),
        },
    );

    let mut settings = Settings::default();
    settings.pipeline.block_size_hint = 16 * KB;
    settings.pipeline.index_interval = 2;
    settings.batch.parallelism = 3;

    let provider: Arc<dyn StreamProvider> = Arc::new(store.clone());
    let outcomes = run_batch(
        jobs.clone(),
        &settings,
        Arc::new(Lz4Codec),
        provider.clone(),
        provider,
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(outcomes.len(), 7);
    for (outcome, job) in outcomes.iter().zip(&jobs) {
        assert_eq!(&outcome.job, job);
    }
    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 6);
    assert!(!outcomes[2].is_ok());
    for i in 0..6 {
        assert!(store.exists(&format!("out/{i}.lzo.index")).unwrap());
    }
    assert!(!store.exists("out/missing.lzo").unwrap());
}

#[test]
fn test_batch_cancel_stops_every_job() {
    let store = MemoryStore::new();
    let jobs: Vec<BatchJob> = (0..4)
        .map(|i| {
            store.insert(format!("{i}"), trade_csv(10_000));
            BatchJob {
                source_path: format!("{i}"),
                destination_path: format!("{i}.out"),
            }
        })
        .collect();
    let token = CancelToken::new();
    token.cancel();
    let provider: Arc<dyn StreamProvider> = Arc::new(store.clone());
    let outcomes = run_batch(
        jobs,
        &Settings::default(),
        Arc::new(Lz4Codec),
        provider.clone(),
        provider,
        &token,
    )
    .unwrap();
    assert!(outcomes
        .iter()
        .all(|o| matches!(&o.result, Err(f) if f.kind() == ErrorKind::Cancelled)));
    assert_eq!(store.paths().len(), 4);
}

#[test]
fn test_jobs_for_dir_lists_regular_files_in_order() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.csv", "a.csv", "c.csv"] {
        std::fs::write(dir.path().join(name), b"x").unwrap();
    }
    std::fs::create_dir(dir.path().join("nested")).unwrap();

    let jobs = jobs_for_dir(dir.path(), "/data/out").unwrap();
    let names: Vec<&str> = jobs
        .iter()
        .map(|j| j.destination_path.as_str())
        .collect();
    assert_eq!(names, vec!["/data/out/a.csv", "/data/out/b.csv", "/data/out/c.csv"]);
    assert!(jobs[0].source_path.ends_with("a.csv"));
}
