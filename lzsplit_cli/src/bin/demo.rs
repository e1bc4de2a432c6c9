//! lzsplit demo
//!
//! Generates a synthetic trade extract, runs it through the pipeline with
//! 256 KB blocks and an index entry every 4 blocks, then shows the point of
//! the sidecar index: N readers can each decode their own split in parallel
//! and together reproduce the sequential decode byte for byte.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rayon::prelude::*;
use xxhash_rust::xxh3::xxh3_64;

use lzsplit_codecs::LzoCodec;
use lzsplit_core::storage::{LocalFs, StreamProvider};
use lzsplit_core::{decode_all, CancelToken, Codec, Pipeline, PipelineConfig, SplitReader};

// ── constants ──────────────────────────────────────────────────────────────

const TARGET_RAW_BYTES: u64 = 64 * 1024 * 1024;
const BLOCK_SIZE: u32 = 256 * 1024;
const INTERVAL: u32 = 4;
const READERS: usize = 8;

const SYMBOLS: &[&str] = &["ES", "NQ", "YM", "RTY", "CL", "GC", "ZN", "6E"];
const SIDES: &[&str] = &["BUY", "SELL"];
const VENUES: &[&str] = &["XCME", "XCBT", "XNYM", "XCEC"];

// ── data generator ──────────────────────────────────────────────────────────

/// Deterministic CSV trade row `i`.
fn trade_line(i: u64) -> String {
    let symbol = SYMBOLS[(i as usize * 7 + 3) % SYMBOLS.len()];
    let side = SIDES[(i as usize * 3 + 1) % SIDES.len()];
    let venue = VENUES[(i as usize * 5 + 2) % VENUES.len()];
    let ts = 1_740_268_800_000u64 + i * 37;
    let price = 4_000.0 + ((i * 7919) % 200_000) as f64 / 100.0;
    let qty = 1 + (i * 31) % 250;
    format!("{i},{ts},{symbol},{side},{price:.2},{qty},{venue}\n")
}

fn write_source(path: &Path) -> Result<(u64, u64)> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(b"trade_id,ts_ms,symbol,side,price,qty,venue\n")?;
    let mut total = 0u64;
    let mut i = 0u64;
    while total < TARGET_RAW_BYTES {
        let line = trade_line(i);
        total += line.len() as u64;
        out.write_all(line.as_bytes())?;
        i += 1;
    }
    out.flush()?;
    Ok((i, total))
}

// ── formatting ──────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const U: &[&str] = &["B", "KB", "MB", "GB"];
    let mut v = n as f64;
    let mut u = 0;
    while v >= 1024.0 && u < U.len() - 1 { v /= 1024.0; u += 1; }
    if u == 0 { format!("{n} B") } else { format!("{v:.2} {}", U[u]) }
}

fn fmt_duration(d: Duration) -> String {
    let ms = d.as_secs_f64() * 1000.0;
    if ms < 1.0 {
        format!("{:.1} µs", ms * 1000.0)
    } else if ms < 1000.0 {
        format!("{ms:.1} ms")
    } else {
        format!("{:.2} s", d.as_secs_f64())
    }
}

fn speedup(slow: Duration, fast: Duration) -> f64 {
    slow.as_secs_f64() / fast.as_secs_f64().max(1e-9)
}

// ── demo ───────────────────────────────────────────────────────────────────

fn run() -> Result<()> {
    let dir = std::env::temp_dir().join(format!("lzsplit_demo_{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let source = dir.join("trades.csv");
    let dest = dir.join("trades");

    println!();
    println!("=== lzsplit demo: splittable LZ block stream ===");
    println!();

    eprint!("  generating {} of trades... ", human_bytes(TARGET_RAW_BYTES));
    let (rows, raw_bytes) = write_source(&source)?;
    eprintln!("{rows} rows");

    // ── 1. compress + index ───────────────────────────────────────────────
    let codec: Arc<dyn Codec> = Arc::new(LzoCodec);
    let local: Arc<dyn StreamProvider> = Arc::new(LocalFs::new());
    let mut config = PipelineConfig::new(
        source.to_str().context("temp path is not UTF-8")?,
        dest.to_str().context("temp path is not UTF-8")?,
    );
    config.block_size_hint = BLOCK_SIZE;
    config.index_interval = INTERVAL;

    let t0 = Instant::now();
    let pair = Pipeline::new(config, codec.clone(), local.clone(), local).run(&CancelToken::new())?;
    let compress_time = t0.elapsed();

    println!("  raw size       : {}", human_bytes(raw_bytes));
    println!("  compressed     : {} ({:.2}x)", human_bytes(pair.compressed_bytes), pair.ratio());
    println!("  blocks         : {} x {}", pair.blocks, human_bytes(BLOCK_SIZE as u64));
    println!(
        "  index          : {} entries, {} (every {INTERVAL} blocks)",
        pair.index_entries,
        human_bytes(pair.index_bytes)
    );
    println!("  compress time  : {}", fmt_duration(compress_time));
    println!();

    // ── 2. sequential decode ──────────────────────────────────────────────
    let t0 = Instant::now();
    let mut sequential = Vec::with_capacity(raw_bytes as usize);
    decode_all(BufReader::new(File::open(&pair.data_path)?), codec.clone(), &mut sequential)?;
    let sequential_time = t0.elapsed();
    let sequential_digest = xxh3_64(&sequential);

    // ── 3. parallel split decode ──────────────────────────────────────────
    let plan = SplitReader::open(&pair.data_path, &pair.index_path, codec.clone())?.plan_splits(READERS)?;
    let t0 = Instant::now();
    let parts: Vec<Vec<u8>> = plan
        .par_iter()
        .map(|split| -> Result<Vec<u8>> {
            let mut reader = SplitReader::open(&pair.data_path, &pair.index_path, codec.clone())?;
            let mut out = Vec::new();
            reader.read_split(split, &mut out)?;
            Ok(out)
        })
        .collect::<Result<_>>()?;
    let parallel_time = t0.elapsed();
    let joined = parts.concat();
    let parallel_digest = xxh3_64(&joined);

    println!("  {:<28} {:>12}  {:>18}", "decode", "time", "xxh3");
    println!("  {}", "-".repeat(62));
    println!(
        "  {:<28} {:>12}  {:>18}",
        "sequential, 1 reader",
        fmt_duration(sequential_time),
        format!("{sequential_digest:016x}")
    );
    println!(
        "  {:<28} {:>12}  {:>18}",
        format!("split-wise, {} readers", plan.len()),
        fmt_duration(parallel_time),
        format!("{parallel_digest:016x}")
    );
    println!();
    for split in &plan {
        println!(
            "    split {:>2}: bytes [{:>10}, {:>10})  raw offset {:>10}",
            split.ordinal, split.start, split.end, split.uncompressed_offset
        );
    }
    println!();

    anyhow::ensure!(
        joined == sequential,
        "split-wise decode differs from the sequential decode"
    );
    println!(
        "  identical output, {:.1}x faster with {} readers",
        speedup(sequential_time, parallel_time),
        plan.len()
    );

    // ── 4. random access ──────────────────────────────────────────────────
    let target = raw_bytes * 4 / 5;
    let mut reader = SplitReader::open(&pair.data_path, &pair.index_path, codec)?;
    let t0 = Instant::now();
    let window = reader.read_range(target, 64)?;
    let seek_time = t0.elapsed();
    anyhow::ensure!(
        window[..] == sequential[target as usize..target as usize + window.len()],
        "range read at {target} does not match"
    );
    println!(
        "  read 64 bytes at raw offset {target} (80% through) in {}",
        fmt_duration(seek_time)
    );
    println!();

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
