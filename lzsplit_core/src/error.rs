//! Error types shared by every stage of an indexing pass.

use thiserror::Error;

/// Errors surfaced by the codec adapter, indexer, index reader, and pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// The compression primitive failed. Fatal for the pass.
    #[error("codec error in block {block}: {reason}")]
    Codec { block: u64, reason: String },

    /// A block header is inconsistent with the bytes that follow it.
    #[error("corrupt stream at offset {offset} (block {block}): {reason}")]
    CorruptStream {
        offset: u64,
        block: u64,
        reason: String,
    },

    /// An index file violates its own invariants. `entry` is `None` when the
    /// header itself is bad.
    #[error("malformed index{}: {reason}", entry.map(|e| format!(" at entry {e}")).unwrap_or_default())]
    MalformedIndex { entry: Option<u64>, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Coarse classification of [`Error`], for callers that map failures to
/// exit codes or metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Codec,
    CorruptStream,
    MalformedIndex,
    Io,
    Config,
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Codec { .. } => ErrorKind::Codec,
            Error::CorruptStream { .. } => ErrorKind::CorruptStream,
            Error::MalformedIndex { .. } => ErrorKind::MalformedIndex,
            Error::Io(_) => ErrorKind::Io,
            Error::Config(_) => ErrorKind::Config,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn corrupt(offset: u64, block: u64, reason: impl Into<String>) -> Self {
        Error::CorruptStream {
            offset,
            block,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(entry: Option<u64>, reason: impl Into<String>) -> Self {
        Error::MalformedIndex {
            entry,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
