//! Provider over any `object_store` backend (S3-compatible stores, local
//! directories, in-memory).
//!
//! The core is synchronous, so the provider owns a small tokio runtime and
//! blocks on each request. Objects are uploaded whole on commit and fetched
//! whole on open, which suits artifact-sized objects.

use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tokio::runtime::Runtime;
use tracing::debug;

use super::{ArtifactSink, SeekRead, StreamProvider};
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct ObjectStoreProvider {
    store: Arc<dyn ObjectStore>,
    runtime: Arc<Runtime>,
}

impl ObjectStoreProvider {
    pub fn new(store: Arc<dyn ObjectStore>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("lzsplit-object-store")
            .enable_all()
            .build()?;
        Ok(Self {
            store,
            runtime: Arc::new(runtime),
        })
    }

    /// In-memory object store, mostly for tests.
    pub fn in_memory() -> Result<Self> {
        Self::new(Arc::new(object_store::memory::InMemory::new()))
    }

    /// S3 bucket configured from the standard `AWS_*` environment variables.
    #[cfg(feature = "s3")]
    pub fn s3_from_env(bucket: &str) -> Result<Self> {
        let store = object_store::aws::AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(|e| Error::Config(format!("S3 bucket {bucket:?}: {e}")))?;
        Self::new(Arc::new(store))
    }

    fn location(path: &str) -> Result<ObjectPath> {
        ObjectPath::parse(path)
            .map_err(|e| Error::Config(format!("invalid object path {path:?}: {e}")))
    }

    fn fetch(&self, path: &str) -> Result<Bytes> {
        let location = Self::location(path)?;
        let store = self.store.clone();
        let bytes = self
            .runtime
            .block_on(async move { store.get(&location).await?.bytes().await })
            .map_err(io::Error::from)?;
        debug!(path, len = bytes.len(), "fetched object");
        Ok(bytes)
    }
}

struct ObjectSink {
    provider: ObjectStoreProvider,
    location: ObjectPath,
    buf: Vec<u8>,
}

impl Write for ObjectSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ArtifactSink for ObjectSink {
    fn commit(self: Box<Self>) -> Result<u64> {
        let ObjectSink {
            provider,
            location,
            buf,
        } = *self;
        let written = buf.len() as u64;
        let store = provider.store.clone();
        let target = location.clone();
        provider
            .runtime
            .block_on(async move { store.put(&target, PutPayload::from(buf)).await })
            .map_err(io::Error::from)?;
        debug!(path = %location, len = written, "uploaded object");
        Ok(written)
    }
}

impl StreamProvider for ObjectStoreProvider {
    fn name(&self) -> &'static str {
        "object-store"
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.fetch(path)?)))
    }

    fn open_seekable(&self, path: &str) -> Result<Box<dyn SeekRead>> {
        Ok(Box::new(Cursor::new(self.fetch(path)?)))
    }

    fn create(&self, path: &str) -> Result<Box<dyn ArtifactSink>> {
        Ok(Box::new(ObjectSink {
            provider: self.clone(),
            location: Self::location(path)?,
            buf: Vec::new(),
        }))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (from, to) = (Self::location(from)?, Self::location(to)?);
        let store = self.store.clone();
        self.runtime
            .block_on(async move { store.rename(&from, &to).await })
            .map_err(io::Error::from)?;
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        let location = Self::location(path)?;
        let store = self.store.clone();
        match self
            .runtime
            .block_on(async move { store.delete(&location).await })
        {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(io::Error::from(e).into()),
        }
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let location = Self::location(path)?;
        let store = self.store.clone();
        match self
            .runtime
            .block_on(async move { store.head(&location).await })
        {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(io::Error::from(e).into()),
        }
    }
}
