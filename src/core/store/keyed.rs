//! Sled-backed chunk store
//!
//! Records live under the composite key `(namespace, index)`. Each namespace
//! gets its own database directory below the backend root, so transfers with
//! distinct namespaces never contend for sled's file lock, whether they run
//! in one process or in several.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use log::{debug, warn};

use super::{sanitize, ChunkStore, ChunkStoreFactory};
use crate::core::error::{Error, Result};

enum Location {
    PerNamespace(PathBuf),
    Shared(sled::Db),
}

/// Opens keyed stores, one sled database per namespace under a root directory
pub struct KeyedStoreBackend {
    location: Location,
}

impl KeyedStoreBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::PerNamespace(root.into()),
        }
    }

    /// Keep every namespace in one already opened database
    pub fn with_db(db: sled::Db) -> Self {
        Self {
            location: Location::Shared(db),
        }
    }

    /// Database directory used for `namespace`, if the backend owns one
    pub fn database_path(&self, namespace: &str) -> Option<PathBuf> {
        match &self.location {
            Location::PerNamespace(root) => Some(root.join(sanitize(namespace))),
            Location::Shared(_) => None,
        }
    }
}

impl ChunkStoreFactory for KeyedStoreBackend {
    fn open(&self, namespace: &str) -> Result<Box<dyn ChunkStore>> {
        let store = match &self.location {
            Location::Shared(db) => KeyedChunkStore::new(db.clone(), namespace),
            Location::PerNamespace(root) => {
                let path = root.join(sanitize(namespace));
                let db = sled::open(&path)?;
                debug!("Opened keyed chunk store at {}", path.display());
                KeyedChunkStore::new(db, namespace).owning(path)
            }
        };
        Ok(Box::new(store))
    }
}

pub struct KeyedChunkStore {
    db: sled::Db,
    prefix: Vec<u8>,
    owned_path: Option<PathBuf>,
}

struct DbKeys;

impl DbKeys {
    // The length field keeps "a" from being a prefix of "a:b".
    fn namespace_prefix(namespace: &str) -> Vec<u8> {
        format!("chunk:{}:{}:", namespace.len(), namespace).into_bytes()
    }

    fn chunk_key(prefix: &[u8], index: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(prefix.len() + 8);
        key.extend_from_slice(prefix);
        key.extend_from_slice(&index.to_be_bytes());
        key
    }
}

impl KeyedChunkStore {
    pub fn new(db: sled::Db, namespace: &str) -> Self {
        Self {
            db,
            prefix: DbKeys::namespace_prefix(namespace),
            owned_path: None,
        }
    }

    /// Remove the database directory at `path` on destroy
    fn owning(mut self, path: PathBuf) -> Self {
        self.owned_path = Some(path);
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.owned_path.as_deref()
    }

    fn key(&self, index: u64) -> Vec<u8> {
        DbKeys::chunk_key(&self.prefix, index)
    }
}

impl ChunkStore for KeyedChunkStore {
    fn put(&self, index: u64, data: &[u8]) -> Result<()> {
        self.db.insert(self.key(index), data)?;
        Ok(())
    }

    fn get(&self, index: u64) -> Result<Bytes> {
        match self.db.get(self.key(index))? {
            Some(value) => Ok(Bytes::copy_from_slice(&value)),
            None => Err(Error::CorruptState(format!("chunk {index} is not in the store"))),
        }
    }

    fn delete(&self, index: u64) -> Result<()> {
        self.db.remove(self.key(index))?;
        Ok(())
    }

    fn contains(&self, index: u64) -> Result<bool> {
        Ok(self.db.contains_key(self.key(index))?)
    }

    fn clear(&self) -> Result<()> {
        let mut batch = sled::Batch::default();
        let mut removed = 0usize;
        for entry in self.db.scan_prefix(&self.prefix).keys() {
            batch.remove(entry?);
            removed += 1;
        }
        self.db.apply_batch(batch)?;
        debug!("Cleared {removed} keyed chunk records");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        self.clear()?;
        self.close()?;
        if let Some(path) = &self.owned_path {
            match fs::remove_dir_all(path) {
                Ok(()) => debug!("Removed keyed chunk store {}", path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!("Failed to remove keyed chunk store {}: {err}", path.display()),
            }
        }
        Ok(())
    }
}
