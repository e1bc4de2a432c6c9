//! Local filesystem provider.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use super::{ArtifactSink, SeekRead, StreamProvider};
use crate::error::{Error, Result};

/// Paths resolve against `root` when one is set, otherwise as given.
#[derive(Debug, Clone, Default)]
pub struct LocalFs {
    root: Option<PathBuf>,
}

impl LocalFs {
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Confine every path to `root`. Absolute paths and `..` are rejected.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if path.is_empty() {
            return Err(Error::Config("empty path".to_string()));
        }
        let Some(root) = &self.root else {
            return Ok(PathBuf::from(path));
        };
        let rel = Path::new(path);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(Error::Config(format!(
                "path {path:?} escapes the provider root"
            )));
        }
        Ok(root.join(rel))
    }
}

struct LocalSink {
    file: BufWriter<File>,
    written: u64,
}

impl Write for LocalSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl ArtifactSink for LocalSink {
    fn commit(mut self: Box<Self>) -> Result<u64> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(self.written)
    }
}

impl StreamProvider for LocalFs {
    fn name(&self) -> &'static str {
        "local"
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(BufReader::new(File::open(self.resolve(path)?)?)))
    }

    fn open_seekable(&self, path: &str) -> Result<Box<dyn SeekRead>> {
        Ok(Box::new(BufReader::new(File::open(self.resolve(path)?)?)))
    }

    fn create(&self, path: &str) -> Result<Box<dyn ArtifactSink>> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Box::new(LocalSink {
            file: BufWriter::new(File::create(full)?),
            written: 0,
        }))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(self.resolve(from)?, self.resolve(to)?)?;
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.resolve(path)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path)?.try_exists()?)
    }
}
