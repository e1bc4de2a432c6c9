//! End-to-end transfer of one source into a compressed artifact pair.
//!
//! # Flow
//! ```text
//! source ──▶ BlockCompressor ──▶ Writer (+ IndexBuilder) ──▶ channel ──▶ writer thread ──▶ <dest>.lzo.tmp
//!                                                    index ──────────────────────────────▶ <dest>.lzo.index.tmp
//! ```
//! Once both temporaries are committed the stale final index is removed, the
//! data is renamed into place, and the index is renamed **last**. A reader
//! that finds `<dest>.lzo.index` can therefore rely on the matching
//! `<dest>.lzo` being complete.

use std::fmt;
use std::io::{self, BufWriter, Read, Write};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::codec::{BlockCompressor, Codec};
use crate::error::{Error, ErrorKind, Result};
use crate::format::{
    data_path, index_path, tmp_path, BLOCK_HEADER_SIZE, DEFAULT_BLOCK_SIZE, DEFAULT_INDEX_INTERVAL,
    MAX_BLOCK_SIZE,
};
use crate::index::Index;
use crate::indexer::{scan, ScanReport};
use crate::storage::{ArtifactSink, StreamProvider};
use crate::writer::Writer;

/// Frames buffered between the compressing thread and the writer thread.
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

/// Everything one pass needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub source_path: String,
    /// Artifact base path; `.lzo` and `.lzo.index` are appended.
    pub destination_path: String,
    /// Blocks between index entries.
    pub index_interval: u32,
    /// Raw bytes per block.
    pub block_size_hint: u32,
    pub queue_depth: usize,
}

impl PipelineConfig {
    pub fn new(source_path: impl Into<String>, destination_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            destination_path: destination_path.into(),
            index_interval: DEFAULT_INDEX_INTERVAL,
            block_size_hint: DEFAULT_BLOCK_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_path.is_empty() {
            return Err(Error::Config("source path is empty".to_string()));
        }
        if self.destination_path.is_empty() {
            return Err(Error::Config("destination path is empty".to_string()));
        }
        if self.index_interval == 0 {
            return Err(Error::Config("index interval must be at least 1".to_string()));
        }
        if self.block_size_hint == 0 || self.block_size_hint > MAX_BLOCK_SIZE {
            return Err(Error::Config(format!(
                "block size hint must be in 1..={MAX_BLOCK_SIZE}, got {}",
                self.block_size_hint
            )));
        }
        if self.queue_depth == 0 {
            return Err(Error::Config("queue depth must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    ReadingSource,
    CompressingAndIndexing,
    WritingArtifacts,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::ReadingSource => "reading source",
            PipelineState::CompressingAndIndexing => "compressing and indexing",
            PipelineState::WritingArtifacts => "writing artifacts",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A failed pass: the state it was in and what went wrong.
#[derive(Debug, thiserror::Error)]
#[error("pipeline failed while {state}: {error}")]
pub struct PipelineFailure {
    pub state: PipelineState,
    #[source]
    pub error: Error,
}

impl PipelineFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// The committed output of a successful pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPair {
    pub data_path: String,
    pub index_path: String,
    pub blocks: u64,
    pub uncompressed_bytes: u64,
    pub compressed_bytes: u64,
    pub index_entries: usize,
    pub index_bytes: u64,
}

impl ArtifactPair {
    /// Raw bytes per compressed byte.
    pub fn ratio(&self) -> f64 {
        if self.compressed_bytes == 0 {
            return 1.0;
        }
        self.uncompressed_bytes as f64 / self.compressed_bytes as f64
    }
}

struct Staging {
    data: String,
    data_tmp: String,
    index: String,
    index_tmp: String,
}

impl Staging {
    fn for_destination(dest: &str) -> Self {
        let data = data_path(dest);
        let index = index_path(dest);
        Self {
            data_tmp: tmp_path(&data),
            index_tmp: tmp_path(&index),
            data,
            index,
        }
    }
}

/// One indexing pass from a source provider to a sink provider.
pub struct Pipeline {
    config: PipelineConfig,
    codec: Arc<dyn Codec>,
    source: Arc<dyn StreamProvider>,
    sink: Arc<dyn StreamProvider>,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        codec: Arc<dyn Codec>,
        source: Arc<dyn StreamProvider>,
        sink: Arc<dyn StreamProvider>,
    ) -> Self {
        Self {
            config,
            codec,
            source,
            sink,
            state: PipelineState::Idle,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        info!(
            source = %self.config.source_path,
            from = %self.state,
            to = %next,
            "pipeline state"
        );
        self.state = next;
    }

    /// Run the pass to completion. A pipeline runs once; a second call fails
    /// with a config error.
    pub fn run(&mut self, cancel: &CancelToken) -> std::result::Result<ArtifactPair, PipelineFailure> {
        if self.state != PipelineState::Idle {
            return Err(PipelineFailure {
                state: self.state,
                error: Error::Config(format!("pipeline already ran (state: {})", self.state)),
            });
        }
        let staging = Staging::for_destination(&self.config.destination_path);
        match self.execute(cancel, &staging) {
            Ok(pair) => {
                self.transition(PipelineState::Done);
                info!(
                    data = %pair.data_path,
                    index = %pair.index_path,
                    blocks = pair.blocks,
                    uncompressed = pair.uncompressed_bytes,
                    compressed = pair.compressed_bytes,
                    entries = pair.index_entries,
                    "artifacts committed"
                );
                Ok(pair)
            }
            Err(error) => {
                let state = self.state;
                warn!(source = %self.config.source_path, %state, %error, "pass failed");
                self.discard(&staging);
                self.transition(PipelineState::Failed);
                Err(PipelineFailure { state, error })
            }
        }
    }

    fn execute(&mut self, cancel: &CancelToken, staging: &Staging) -> Result<ArtifactPair> {
        self.config.validate()?;
        cancel.check()?;

        self.transition(PipelineState::ReadingSource);
        let source = self.source.open(&self.config.source_path)?;
        let blocks = BlockCompressor::new(source, self.codec.clone(), self.config.block_size_hint)?;

        self.transition(PipelineState::CompressingAndIndexing);
        let data_sink = self.sink.create(&staging.data_tmp)?;
        let compressed = self.compress_into(blocks, data_sink, cancel)?;

        self.transition(PipelineState::WritingArtifacts);
        let mut index_sink = self.sink.create(&staging.index_tmp)?;
        compressed.index.write_to(&mut index_sink)?;
        let index_bytes = index_sink.commit()?;
        cancel.check()?;

        self.sink.remove(&staging.index)?;
        self.sink.rename(&staging.data_tmp, &staging.data)?;
        self.sink.rename(&staging.index_tmp, &staging.index)?;

        Ok(ArtifactPair {
            data_path: staging.data.clone(),
            index_path: staging.index.clone(),
            blocks: compressed.blocks,
            uncompressed_bytes: compressed.uncompressed_len,
            compressed_bytes: compressed.compressed_len,
            index_entries: compressed.index.len(),
            index_bytes,
        })
    }

    /// Frame every block and stream the bytes to a dedicated writer thread.
    ///
    /// The data sink is committed only after the producer signals a clean
    /// end, so an aborted pass never commits a truncated stream.
    fn compress_into<R: Read>(
        &self,
        blocks: BlockCompressor<R>,
        data_sink: Box<dyn ArtifactSink>,
        cancel: &CancelToken,
    ) -> Result<Compressed> {
        let (tx, rx) = bounded::<Frame>(self.config.queue_depth);
        let frame_capacity = self.config.block_size_hint as usize + BLOCK_HEADER_SIZE as usize;

        std::thread::scope(|scope| {
            let consumer = scope.spawn(move || drain_frames(rx, data_sink));

            let produced = (|| -> Result<Compressed> {
                let channel = BufWriter::with_capacity(frame_capacity, ChannelSink { tx });
                let mut writer = Writer::new(
                    channel,
                    self.codec.clone(),
                    self.config.block_size_hint,
                    self.config.index_interval,
                )?;
                for block in blocks {
                    cancel.check()?;
                    writer.write_block(&block?)?;
                }
                let finished = writer.finish()?;
                let channel = finished.sink.into_inner().map_err(|e| Error::Io(e.into_error()))?;
                channel
                    .tx
                    .send(Frame::End)
                    .map_err(|_| Error::Io(writer_stopped()))?;
                Ok(Compressed {
                    index: finished.index,
                    blocks: finished.blocks,
                    compressed_len: finished.compressed_len,
                    uncompressed_len: finished.uncompressed_len,
                })
            })();

            let written = consumer
                .join()
                .map_err(|_| Error::Io(io::Error::other("artifact writer thread panicked")))?;

            match (produced, written) {
                (Ok(compressed), Ok(bytes)) => {
                    debug!(bytes, blocks = compressed.blocks, "data stream committed");
                    if bytes != compressed.compressed_len {
                        return Err(Error::Io(io::Error::other(format!(
                            "writer committed {bytes} bytes, expected {}",
                            compressed.compressed_len
                        ))));
                    }
                    Ok(compressed)
                }
                // A stopped writer surfaces on the producer side as a broken
                // pipe; report the writer's own error instead.
                (Err(Error::Io(e)), Err(writer_err)) if e.kind() == io::ErrorKind::BrokenPipe => {
                    Err(writer_err)
                }
                (Err(e), _) => Err(e),
                (Ok(_), Err(e)) => Err(e),
            }
        })
    }

    /// Best-effort removal of both temporaries.
    fn discard(&self, staging: &Staging) {
        for path in [&staging.data_tmp, &staging.index_tmp] {
            if let Err(e) = self.sink.remove(path) {
                warn!(path = %path, error = %e, "failed to remove temporary artifact");
            }
        }
    }
}

struct Compressed {
    index: Index,
    blocks: u64,
    compressed_len: u64,
    uncompressed_len: u64,
}

enum Frame {
    Bytes(Vec<u8>),
    End,
}

/// `Write` adapter that forwards each write to the writer thread.
struct ChannelSink {
    tx: Sender<Frame>,
}

impl Write for ChannelSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(Frame::Bytes(buf.to_vec()))
            .map_err(|_| writer_stopped())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn writer_stopped() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "artifact writer stopped")
}

fn drain_frames(rx: Receiver<Frame>, mut sink: Box<dyn ArtifactSink>) -> Result<u64> {
    for frame in rx {
        match frame {
            Frame::Bytes(bytes) => sink.write_all(&bytes)?,
            Frame::End => return sink.commit(),
        }
    }
    Err(Error::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "producer stopped before the end of the stream",
    )))
}

/// Re-index an existing compressed stream and persist `<data_path>.index`.
///
/// The index goes through a temporary and a rename like a full pass, so an
/// interrupted re-index never leaves a half-written index behind.
pub fn reindex(provider: &dyn StreamProvider, data_path: &str, interval: u32) -> Result<ScanReport> {
    let report = scan(provider.open(data_path)?, interval)?;
    let index = format!("{data_path}.index");
    let index_tmp = tmp_path(&index);

    let persisted = (|| -> Result<()> {
        let mut sink = provider.create(&index_tmp)?;
        report.index.write_to(&mut sink)?;
        sink.commit()?;
        provider.rename(&index_tmp, &index)
    })();
    if let Err(e) = persisted {
        if let Err(cleanup) = provider.remove(&index_tmp) {
            warn!(path = %index_tmp, error = %cleanup, "failed to remove temporary index");
        }
        return Err(e);
    }

    info!(
        data = data_path,
        index = %index,
        blocks = report.blocks,
        entries = report.index.len(),
        "re-indexed stream"
    );
    Ok(report)
}
