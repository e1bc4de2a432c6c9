//! In-process provider backed by a shared map.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ArtifactSink, SeekRead, StreamProvider};
use crate::error::Result;

type Objects = BTreeMap<String, Arc<[u8]>>;

/// Clones share the same objects. Writes become visible on commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<Objects>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, Objects> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        let data: Vec<u8> = data.into();
        self.objects().insert(path.into(), data.into());
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects().get(path).map(|d| d.to_vec())
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }

    fn fetch(&self, path: &str) -> Result<Arc<[u8]>> {
        self.objects().get(path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no object at {path:?}")).into()
        })
    }
}

struct MemorySink {
    store: MemoryStore,
    path: String,
    buf: Vec<u8>,
}

impl Write for MemorySink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ArtifactSink for MemorySink {
    fn commit(self: Box<Self>) -> Result<u64> {
        let MemorySink { store, path, buf } = *self;
        let written = buf.len() as u64;
        store.insert(path, buf);
        Ok(written)
    }
}

impl StreamProvider for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.fetch(path)?)))
    }

    fn open_seekable(&self, path: &str) -> Result<Box<dyn SeekRead>> {
        Ok(Box::new(Cursor::new(self.fetch(path)?)))
    }

    fn create(&self, path: &str) -> Result<Box<dyn ArtifactSink>> {
        Ok(Box::new(MemorySink {
            store: self.clone(),
            path: path.to_string(),
            buf: Vec::new(),
        }))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut objects = self.objects();
        let data = objects.remove(from).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no object at {from:?}"))
        })?;
        objects.insert(to.to_string(), data);
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        self.objects().remove(path);
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.objects().contains_key(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncommitted_sink_is_invisible() {
        let store = MemoryStore::new();
        let mut sink = store.create("a").unwrap();
        sink.write_all(b"partial").unwrap();
        drop(sink);
        assert!(!store.exists("a").unwrap());

        let mut sink = store.create("a").unwrap();
        sink.write_all(b"whole").unwrap();
        assert_eq!(sink.commit().unwrap(), 5);
        assert_eq!(store.get("a").as_deref(), Some(&b"whole"[..]));
    }

    #[test]
    fn rename_replaces_destination() {
        let store = MemoryStore::new();
        store.insert("new.tmp", b"new".to_vec());
        store.insert("final", b"old".to_vec());
        store.rename("new.tmp", "final").unwrap();
        assert_eq!(store.paths(), vec!["final".to_string()]);
        assert_eq!(store.get("final").as_deref(), Some(&b"new"[..]));
        assert!(store.rename("missing", "x").is_err());
    }
}
