use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use xxhash_rust::xxh3::Xxh3;

use lzsplit_codecs::codec_by_name;
use lzsplit_core::storage::{LocalFs, StreamProvider};
use lzsplit_core::{
    decode_all, jobs_for_dir, reindex, run_batch, scan, verify_pair, CancelToken, Codec, Error,
    ErrorKind, Index, Pipeline, PipelineFailure, Settings, SplitReader,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "lzsplit",
    about = "Block-compress files into splittable streams with a sidecar seek index",
    version
)]
struct Cli {
    /// TOML settings file ([pipeline] and [batch] tables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// More logging (-v debug, -vv trace); RUST_LOG applies otherwise
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

/// Flags that override the settings file.
#[derive(Args, Default)]
struct Overrides {
    /// Block codec: lzo | lz4 | zstd[:level] | deflate[:level] | passthrough
    #[arg(short, long)]
    codec: Option<String>,
    /// Blocks between index entries
    #[arg(short, long)]
    interval: Option<u32>,
    /// Raw bytes per block
    #[arg(short, long)]
    block_size: Option<u32>,
    /// Frames buffered between compression and the writer thread
    #[arg(long)]
    queue_depth: Option<usize>,
    /// Concurrent pipelines in batch mode
    #[arg(short = 'j', long)]
    parallelism: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file into <DEST>.lzo and <DEST>.lzo.index
    Compress {
        /// Source file, or object key with --source-bucket
        input: PathBuf,
        /// Artifact base path (suffixes are appended)
        dest: PathBuf,
        /// Upload the pair to this S3 bucket (credentials from AWS_* env)
        #[cfg(feature = "s3")]
        #[arg(long)]
        bucket: Option<String>,
        /// Read INPUT as a key in this S3 bucket
        #[cfg(feature = "s3")]
        #[arg(long)]
        source_bucket: Option<String>,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Decompress a .lzo stream back to raw bytes
    Decompress {
        /// Compressed stream
        input: PathBuf,
        /// Destination file ("-" writes to stdout)
        output: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Build <DATA>.index for an existing compressed stream
    Index {
        /// Compressed stream
        data: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Print index metadata, optionally checked against its stream
    Inspect {
        /// Index file
        index: PathBuf,
        /// Compressed stream to re-scan for comparison
        #[arg(long)]
        data: Option<PathBuf>,
        /// Print every entry
        #[arg(long)]
        entries: bool,
    },
    /// Re-parse a stream and prove its index and split decodes are sound
    Verify {
        /// Compressed stream
        data: PathBuf,
        /// Index file (default: <DATA>.index)
        #[arg(long)]
        index: Option<PathBuf>,
        /// Parallel split readers
        #[arg(short, long, default_value_t = 4)]
        splits: usize,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Print the split plan for N parallel readers
    Plan {
        /// Compressed stream
        data: PathBuf,
        #[arg(long)]
        index: Option<PathBuf>,
        #[arg(short, long, default_value_t = 4)]
        splits: usize,
    },
    /// Decode one split without touching the rest of the stream
    ReadSplit {
        /// Compressed stream
        data: PathBuf,
        #[arg(long)]
        index: Option<PathBuf>,
        /// Number of splits in the plan
        #[arg(short, long, default_value_t = 4)]
        splits: usize,
        /// Zero-based split to decode
        #[arg(short = 'n', long)]
        split: usize,
        /// Write raw bytes to a file instead of printing a hex dump
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Compress every regular file in a directory
    Batch {
        src_dir: PathBuf,
        /// Destination directory, or key prefix with --bucket
        dest_dir: PathBuf,
        /// Upload every pair to this S3 bucket (credentials from AWS_* env)
        #[cfg(feature = "s3")]
        #[arg(long)]
        bucket: Option<String>,
        #[command(flatten)]
        overrides: Overrides,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn load_settings(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<Settings> {
    let mut settings = match path {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(codec) = &overrides.codec {
        settings.pipeline.codec = codec.clone();
    }
    if let Some(interval) = overrides.interval {
        settings.pipeline.index_interval = interval;
    }
    if let Some(block_size) = overrides.block_size {
        settings.pipeline.block_size_hint = block_size;
    }
    if let Some(depth) = overrides.queue_depth {
        settings.pipeline.queue_depth = depth;
    }
    if let Some(parallelism) = overrides.parallelism {
        settings.batch.parallelism = parallelism;
    }
    settings.validate()?;
    Ok(settings)
}

fn codec_for(settings: &Settings) -> anyhow::Result<Arc<dyn Codec>> {
    codec_by_name(&settings.pipeline.codec)
        .map_err(|e| Error::Config(format!("{e:#}")))
        .context("resolving codec")
}

fn utf8(path: &Path) -> anyhow::Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::Config(format!("path is not valid UTF-8: {path:?}")).into())
}

/// `<data>.index`, the sidecar written next to a `.lzo` stream.
fn index_for(data: &Path, explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| {
        let mut name = data.as_os_str().to_owned();
        name.push(".index");
        PathBuf::from(name)
    })
}

fn load_index(path: &Path) -> anyhow::Result<Index> {
    let file = File::open(path).with_context(|| format!("opening index {path:?}"))?;
    Ok(Index::read_from(&mut BufReader::new(file))?)
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn throughput(bytes: u64, elapsed: f64) -> String {
    if elapsed <= 0.0 {
        return "n/a".to_string();
    }
    format!("{}/s", human_bytes((bytes as f64 / elapsed) as u64))
}

/// Hashes everything written through it.
struct DigestWriter<W> {
    inner: W,
    state: Xxh3,
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.state.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn hex_dump(label: &str, raw: &[u8]) {
    let preview = &raw[..raw.len().min(256)];
    println!("--- {} ({} bytes, first {} shown) ---", label, raw.len(), preview.len());
    for (i, chunk) in preview.chunks(16).enumerate() {
        print!("  {:08x}  ", i * 16);
        for b in chunk {
            print!("{:02x} ", b);
        }
        for _ in chunk.len()..16 {
            print!("   ");
        }
        print!("  |");
        for b in chunk {
            if b.is_ascii_graphic() || *b == b' ' {
                print!("{}", *b as char);
            } else {
                print!(".");
            }
        }
        println!("|");
    }
    if raw.len() > 256 {
        println!("  ... ({} bytes remaining not shown)", raw.len() - 256);
    }
}

// ── Subcommand implementations ─────────────────────────────────────────────

/// Local disk, or the named bucket when one is given.
#[cfg(feature = "s3")]
fn store_for(bucket: Option<&str>) -> anyhow::Result<Arc<dyn StreamProvider>> {
    let provider: Arc<dyn StreamProvider> = match bucket {
        Some(bucket) => Arc::new(lzsplit_core::storage::ObjectStoreProvider::s3_from_env(bucket)?),
        None => Arc::new(LocalFs::new()),
    };
    Ok(provider)
}

fn run_compress(
    settings: &Settings,
    input: &Path,
    dest: &Path,
    source: Arc<dyn StreamProvider>,
    sink: Arc<dyn StreamProvider>,
) -> anyhow::Result<()> {
    let codec = codec_for(settings)?;
    let codec_display = codec.name();
    let config = settings.pipeline_config(utf8(input)?, utf8(dest)?);
    info!(
        input = %input.display(),
        source = source.name(),
        sink = sink.name(),
        codec = codec_display,
        "compressing"
    );

    let t0 = Instant::now();
    let mut pipeline = Pipeline::new(config, codec, source, sink);
    let pair = pipeline.run(&CancelToken::new())?;
    let elapsed = t0.elapsed().as_secs_f64();

    eprintln!("  codec       : {}", codec_display);
    eprintln!("  block size  : {}", human_bytes(settings.pipeline.block_size_hint as u64));
    eprintln!("  interval    : {}", settings.pipeline.index_interval);
    eprintln!("  blocks      : {}", pair.blocks);
    eprintln!("  entries     : {}", pair.index_entries);
    eprintln!("  raw size    : {}", human_bytes(pair.uncompressed_bytes));
    eprintln!("  compressed  : {}", human_bytes(pair.compressed_bytes));
    eprintln!("  index       : {}", human_bytes(pair.index_bytes));
    eprintln!("  ratio       : {:.2}x", pair.ratio());
    eprintln!("  throughput  : {}", throughput(pair.uncompressed_bytes, elapsed));
    eprintln!("  elapsed     : {:.3}s", elapsed);
    eprintln!("  wrote       : {} + {}", pair.data_path, pair.index_path);
    Ok(())
}

fn run_decompress(settings: &Settings, input: &Path, output: &Path) -> anyhow::Result<()> {
    let codec = codec_for(settings)?;
    let source = BufReader::new(
        File::open(input).with_context(|| format!("opening compressed stream {input:?}"))?,
    );
    let dst: Box<dyn Write> = if output.to_str() == Some("-") {
        Box::new(io::stdout().lock())
    } else {
        Box::new(
            File::create(output).with_context(|| format!("creating output file {output:?}"))?,
        )
    };
    let mut dst = DigestWriter {
        inner: BufWriter::new(dst),
        state: Xxh3::new(),
    };

    let t0 = Instant::now();
    let total_raw = decode_all(source, codec, &mut dst)?;
    let elapsed = t0.elapsed().as_secs_f64();

    eprintln!("  raw size    : {}", human_bytes(total_raw));
    eprintln!("  xxh3        : {:016x}", dst.state.digest());
    eprintln!("  throughput  : {}", throughput(total_raw, elapsed));
    eprintln!("  elapsed     : {:.3}s", elapsed);
    Ok(())
}

fn run_index(settings: &Settings, data: &Path) -> anyhow::Result<()> {
    let report = reindex(
        &LocalFs::new(),
        utf8(data)?,
        settings.pipeline.index_interval,
    )?;
    eprintln!("  blocks      : {}", report.blocks);
    eprintln!("  entries     : {}", report.index.len());
    eprintln!("  raw size    : {}", human_bytes(report.uncompressed_len));
    eprintln!("  compressed  : {}", human_bytes(report.compressed_len));
    if report.ended_with_marker {
        eprintln!("  end marker  : present");
    }
    eprintln!("  wrote       : {}", index_for(data, None).display());
    Ok(())
}

fn run_inspect(index_path: &Path, data: Option<PathBuf>, show_entries: bool) -> anyhow::Result<()> {
    let index = load_index(index_path)?;
    let file_size = std::fs::metadata(index_path)?.len();

    println!("=== Index: {:?} ===", index_path);
    println!();
    println!("  format version : {}", lzsplit_core::INDEX_VERSION);
    println!("  interval       : {} blocks", index.interval());
    println!("  entries        : {}", index.len());
    println!("  file on disk   : {}", human_bytes(file_size));
    if let Some(last) = index.entries().last() {
        println!("  last entry     : compressed {} / raw {}", last.compressed_offset, last.uncompressed_offset);
    }

    if let Some(data) = data {
        let file = File::open(&data).with_context(|| format!("opening compressed stream {data:?}"))?;
        let report = scan(BufReader::new(file), index.interval())?;
        println!();
        println!("  stream         : {:?}", data);
        println!("  blocks         : {}", report.blocks);
        println!("  raw size       : {}", human_bytes(report.uncompressed_len));
        println!("  compressed     : {}", human_bytes(report.compressed_len));
        if report.uncompressed_len > 0 {
            println!(
                "  ratio          : {:.2}x",
                report.uncompressed_len as f64 / report.compressed_len as f64
            );
        }
        println!(
            "  index matches  : {}",
            if report.index == index { "yes" } else { "NO" }
        );
    }

    if show_entries {
        println!();
        println!("  {:>8}  {:>10}  {:>16}  {:>16}", "entry", "block", "compressed", "raw");
        println!("  {}", "-".repeat(58));
        for (i, e) in index.entries().iter().enumerate() {
            println!(
                "  {:>8}  {:>10}  {:>16}  {:>16}",
                i,
                index.block_of(i),
                e.compressed_offset,
                e.uncompressed_offset
            );
        }
    }
    Ok(())
}

fn run_verify(
    settings: &Settings,
    data: &Path,
    index: Option<PathBuf>,
    splits: usize,
) -> anyhow::Result<()> {
    let codec = codec_for(settings)?;
    let index_path = index_for(data, index);
    let t0 = Instant::now();
    let report = verify_pair(&LocalFs::new(), utf8(data)?, utf8(&index_path)?, codec, splits)?;
    let elapsed = t0.elapsed().as_secs_f64();

    println!("  blocks      : {}", report.blocks);
    println!("  entries     : {}", report.entries);
    println!("  splits      : {}", report.splits);
    println!("  raw size    : {}", human_bytes(report.uncompressed_len));
    println!("  compressed  : {}", human_bytes(report.compressed_len));
    println!("  xxh3        : {:016x}", report.digest);
    println!("  elapsed     : {:.3}s", elapsed);
    println!("  OK");
    Ok(())
}

fn run_plan(data: &Path, index: Option<PathBuf>, splits: usize) -> anyhow::Result<()> {
    let index = load_index(&index_for(data, index))?;
    let len = std::fs::metadata(data)
        .with_context(|| format!("reading size of {data:?}"))?
        .len();
    let plan = index.plan_splits(splits, len)?;

    println!(
        "  {:>6}  {:>8}  {:>14}  {:>14}  {:>12}  {:>14}",
        "split", "entry", "start", "end", "length", "raw offset"
    );
    println!("  {}", "-".repeat(76));
    for s in &plan {
        println!(
            "  {:>6}  {:>8}  {:>14}  {:>14}  {:>12}  {:>14}",
            s.ordinal,
            s.first_entry,
            s.start,
            s.end,
            human_bytes(s.compressed_len()),
            s.uncompressed_offset
        );
    }
    Ok(())
}

fn run_read_split(
    settings: &Settings,
    data: &Path,
    index: Option<PathBuf>,
    splits: usize,
    split: usize,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let codec = codec_for(settings)?;
    let mut reader = SplitReader::open(data, index_for(data, index), codec)?;
    let plan = reader.plan_splits(splits)?;
    let target = *plan.get(split).ok_or_else(|| {
        Error::Config(format!("split {split} out of range (plan has {})", plan.len()))
    })?;

    eprintln!(
        "seeking to split {} (offset {} bytes, raw offset {})...",
        split, target.start, target.uncompressed_offset
    );

    let t0 = Instant::now();
    let mut raw = Vec::new();
    reader.read_split(&target, &mut raw)?;
    let elapsed = t0.elapsed();
    eprintln!(
        "  decoded {} from {} in {:.3}ms",
        human_bytes(raw.len() as u64),
        human_bytes(target.compressed_len()),
        elapsed.as_secs_f64() * 1000.0
    );

    match output {
        Some(path) => {
            std::fs::write(&path, &raw)?;
            eprintln!("  written to {:?}", path);
        }
        None => hex_dump(&format!("split {split}"), &raw),
    }
    Ok(())
}

/// Compress every file in `src_dir`; artifact pairs go to `sink` under `dest_dir`.
fn run_batch_dir(
    settings: &Settings,
    src_dir: &Path,
    dest_dir: &Path,
    sink: Arc<dyn StreamProvider>,
) -> anyhow::Result<()> {
    let codec = codec_for(settings)?;
    let jobs = jobs_for_dir(src_dir, dest_dir)
        .with_context(|| format!("listing {src_dir:?}"))?;
    info!(
        jobs = jobs.len(),
        sink = sink.name(),
        parallelism = settings.batch.parallelism,
        "starting batch"
    );
    let local: Arc<dyn StreamProvider> = Arc::new(LocalFs::new());

    let outcomes = run_batch(jobs, settings, codec, local, sink, &CancelToken::new())?;
    let mut first_failure: Option<PipelineFailure> = None;
    for outcome in outcomes {
        match outcome.result {
            Ok(pair) => info!(
                source = %outcome.job.source_path,
                data = %pair.data_path,
                raw = %human_bytes(pair.uncompressed_bytes),
                compressed = %human_bytes(pair.compressed_bytes),
                "ok"
            ),
            Err(failure) => {
                warn!(source = %outcome.job.source_path, "failed: {failure}");
                if first_failure.is_none() {
                    first_failure = Some(failure);
                }
            }
        }
    }
    match first_failure {
        Some(failure) => Err(anyhow::Error::new(failure).context("batch had failed jobs")),
        None => Ok(()),
    }
}

// ── Exit codes ─────────────────────────────────────────────────────────────

fn exit_code(err: &anyhow::Error) -> u8 {
    let kind = err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<Error>() {
            Some(e.kind())
        } else {
            cause.downcast_ref::<PipelineFailure>().map(|f| f.kind())
        }
    });
    match kind {
        Some(ErrorKind::CorruptStream) => 2,
        Some(ErrorKind::MalformedIndex) => 3,
        Some(ErrorKind::Codec) => 4,
        Some(ErrorKind::Io) => 5,
        Some(ErrorKind::Config) => 6,
        Some(ErrorKind::Cancelled) => 130,
        None => 1,
    }
}

// ── Entry point ────────────────────────────────────────────────────────────

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Compress {
            input,
            dest,
            #[cfg(feature = "s3")]
            bucket,
            #[cfg(feature = "s3")]
            source_bucket,
            overrides,
        } => {
            #[cfg(feature = "s3")]
            let (source, sink) = (store_for(source_bucket.as_deref())?, store_for(bucket.as_deref())?);
            #[cfg(not(feature = "s3"))]
            let (source, sink): (Arc<dyn StreamProvider>, Arc<dyn StreamProvider>) =
                (Arc::new(LocalFs::new()), Arc::new(LocalFs::new()));
            run_compress(&load_settings(config, &overrides)?, &input, &dest, source, sink)
        }
        Commands::Decompress {
            input,
            output,
            overrides,
        } => run_decompress(&load_settings(config, &overrides)?, &input, &output),
        Commands::Index { data, overrides } => {
            run_index(&load_settings(config, &overrides)?, &data)
        }
        Commands::Inspect {
            index,
            data,
            entries,
        } => run_inspect(&index, data, entries),
        Commands::Verify {
            data,
            index,
            splits,
            overrides,
        } => run_verify(&load_settings(config, &overrides)?, &data, index, splits),
        Commands::Plan {
            data,
            index,
            splits,
        } => run_plan(&data, index, splits),
        Commands::ReadSplit {
            data,
            index,
            splits,
            split,
            output,
            overrides,
        } => run_read_split(
            &load_settings(config, &overrides)?,
            &data,
            index,
            splits,
            split,
            output,
        ),
        Commands::Batch {
            src_dir,
            dest_dir,
            #[cfg(feature = "s3")]
            bucket,
            overrides,
        } => {
            #[cfg(feature = "s3")]
            let sink = store_for(bucket.as_deref())?;
            #[cfg(not(feature = "s3"))]
            let sink: Arc<dyn StreamProvider> = Arc::new(LocalFs::new());
            run_batch_dir(&load_settings(config, &overrides)?, &src_dir, &dest_dir, sink)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code(&err);
            error!(exit_code = code, "{err:#}");
            ExitCode::from(code)
        }
    }
}
