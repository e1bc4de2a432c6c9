#![allow(dead_code)]

use std::io::{self, Read};
use std::sync::Arc;

use lzsplit_core::storage::{ArtifactSink, MemoryStore, SeekRead, StreamProvider};
use lzsplit_core::{CancelToken, Codec, Index, Writer};

/// `len` deterministic bytes from a simple LCG.
pub fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

/// CSV trade rows truncated to exactly `len` bytes.
pub fn trade_csv(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + 64);
    let mut i = 0u64;
    while out.len() < len {
        let symbol = ["ES", "NQ", "CL", "GC"][(i % 4) as usize];
        let side = if i % 3 == 0 { "SELL" } else { "BUY" };
        out.extend_from_slice(
            format!("{i},{symbol},{side},{}.{:02},{}\n", 4000 + i % 500, i % 100, 1 + i % 40)
                .as_bytes(),
        );
        i += 1;
    }
    out.truncate(len);
    out
}

/// Compress `data` in memory, returning the stream and its index.
pub fn compress(data: &[u8], codec: Arc<dyn Codec>, block_size: u32, interval: u32) -> (Vec<u8>, Index) {
    let mut writer = Writer::new(Vec::new(), codec, block_size, interval).unwrap();
    writer.write(data).unwrap();
    let finished = writer.finish().unwrap();
    (finished.sink, finished.index)
}

/// Yields `data`, then fails.
pub struct FailingReader {
    data: io::Cursor<Vec<u8>>,
}

impl FailingReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: io::Cursor::new(data),
        }
    }
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.data.read(buf)? {
            0 => Err(io::Error::new(io::ErrorKind::ConnectionReset, "source went away")),
            n => Ok(n),
        }
    }
}

/// Cancels `token` once more than `after` bytes were read.
pub struct CancellingReader<R> {
    pub inner: R,
    pub token: CancelToken,
    pub after: u64,
    pub read: u64,
}

impl<R: Read> Read for CancellingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        if self.read > self.after {
            self.token.cancel();
        }
        Ok(n)
    }
}

/// Provider that hands out a caller-built reader for one path and defers
/// everything else to a [`MemoryStore`].
pub struct ScriptedSource<F> {
    pub store: MemoryStore,
    pub path: String,
    pub make: F,
}

impl<F> StreamProvider for ScriptedSource<F>
where
    F: Fn() -> Box<dyn Read + Send> + Send + Sync,
{
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn open(&self, path: &str) -> lzsplit_core::Result<Box<dyn Read + Send>> {
        if path == self.path {
            Ok((self.make)())
        } else {
            self.store.open(path)
        }
    }

    fn open_seekable(&self, path: &str) -> lzsplit_core::Result<Box<dyn SeekRead>> {
        self.store.open_seekable(path)
    }

    fn create(&self, path: &str) -> lzsplit_core::Result<Box<dyn ArtifactSink>> {
        self.store.create(path)
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
