//! File-per-chunk store
//!
//! Each namespace gets a uniquely named ephemeral directory; chunk `i` lives in
//! `part-<i>`. Writes go through a temporary file and a rename so a crashed
//! write never leaves a truncated chunk behind.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use log::{debug, warn};

use super::{sanitize, ChunkStore, ChunkStoreFactory};
use crate::core::error::{Error, Result};

const DIR_PREFIX: &str = "tmp-chunks-";

/// Creates chunk directories under a root directory
pub struct DirectoryStoreBackend {
    root: PathBuf,
}

impl DirectoryStoreBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ChunkStoreFactory for DirectoryStoreBackend {
    fn open(&self, namespace: &str) -> Result<Box<dyn ChunkStore>> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let dir = self
            .root
            .join(format!("{DIR_PREFIX}{}-{millis}", sanitize(namespace)));
        Ok(Box::new(DirectoryChunkStore::create(dir)?))
    }
}

pub struct DirectoryChunkStore {
    dir: PathBuf,
}

impl DirectoryChunkStore {
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!("Chunk directory ready: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn chunk_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("part-{index}"))
    }
}

impl ChunkStore for DirectoryChunkStore {
    fn put(&self, index: u64, data: &[u8]) -> Result<()> {
        let path = self.chunk_path(index);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        match fs::rename(&tmp, &path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                fs::remove_file(&path)?;
                fs::rename(&tmp, &path)?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn get(&self, index: u64) -> Result<Bytes> {
        match fs::read(self.chunk_path(index)) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(Error::CorruptState(format!(
                "chunk file part-{index} is missing from {}",
                self.dir.display()
            ))),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, index: u64) -> Result<()> {
        match fs::remove_file(self.chunk_path(index)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn contains(&self, index: u64) -> Result<bool> {
        Ok(self.chunk_path(index).is_file())
    }

    fn clear(&self) -> Result<()> {
        if let Err(err) = fs::remove_dir_all(&self.dir) {
            if err.kind() != ErrorKind::NotFound {
                warn!("Failed to clear chunk directory {}: {err}", self.dir.display());
            }
        }
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                debug!("Removed chunk directory {}", self.dir.display());
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warn!("Failed to remove chunk directory {}: {err}", self.dir.display());
            }
        }
        Ok(())
    }
}
