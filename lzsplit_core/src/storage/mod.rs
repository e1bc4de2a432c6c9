//! Byte-stream providers for artifact sources and destinations.
//!
//! The pipeline only ever talks to a [`StreamProvider`]; whether a path
//! resolves to local disk, an in-process map, or an object store is decided
//! by whoever constructs the provider. Credentials for remote stores are the
//! constructor's concern too: a provider is handed over already authenticated.

mod local;
mod memory;
#[cfg(feature = "object-store")]
mod object;

pub use local::LocalFs;
pub use memory::MemoryStore;
#[cfg(feature = "object-store")]
pub use object::ObjectStoreProvider;

use std::io::{Read, Seek, Write};

use crate::error::Result;

/// Readable and seekable stream, for split readers.
pub trait SeekRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekRead for T {}

/// A stream being written to a provider.
///
/// Bytes are only guaranteed to be durable at the sink's path once
/// [`commit`](ArtifactSink::commit) returns. Dropping a sink without
/// committing abandons whatever was written; callers remove the path
/// themselves if the backend left partial bytes behind.
pub trait ArtifactSink: Write + Send {
    /// Flush everything and make it visible at the path. Returns bytes written.
    fn commit(self: Box<Self>) -> Result<u64>;
}

/// Storage backend capability used uniformly by the core.
pub trait StreamProvider: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    fn open_seekable(&self, path: &str) -> Result<Box<dyn SeekRead>>;

    fn create(&self, path: &str) -> Result<Box<dyn ArtifactSink>>;

    /// Move `from` to `to`, replacing `to` if it exists.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Delete `path`. A missing path is not an error.
    fn remove(&self, path: &str) -> Result<()>;

    fn exists(&self, path: &str) -> Result<bool>;
}
