//! Splittable block-compressed streams with a sidecar seek index.
//!
//! A stream is a run of independently compressed blocks. The index records
//! the offset of every K-th block header, so readers can start decoding at
//! any recorded block without touching the bytes before it.

pub mod batch;
pub mod cancel;
pub mod codec;
pub mod config;
pub mod error;
pub mod format;
pub mod index;
pub mod indexer;
pub mod pipeline;
pub mod reader;
pub mod storage;
pub mod verify;
pub mod writer;

pub use batch::{jobs_for_dir, run_batch, BatchJob, BatchOutcome};
pub use cancel::CancelToken;
pub use codec::{BlockCompressor, Codec, CompressedBlock};
pub use config::Settings;
pub use error::{Error, ErrorKind, Result};
pub use format::{BlockHeader, IndexEntry, IndexHeader, INDEX_MAGIC, INDEX_VERSION};
pub use index::{Index, Split};
pub use indexer::{scan, Block, BlockWalker, IndexBuilder, ScanReport};
pub use pipeline::{
    reindex, ArtifactPair, Pipeline, PipelineConfig, PipelineFailure, PipelineState,
};
pub use reader::{decode_all, BlockDecoder, DecodedBlock, SplitReader};
pub use verify::{verify_pair, VerifyReport};
pub use writer::{Finished, Writer};
