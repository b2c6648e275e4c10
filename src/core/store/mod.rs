//! Intermediate chunk storage
//!
//! Chunks are persisted here between fetching and reassembly. Two backends share
//! one contract: a sled-backed keyed store and a directory with one file per chunk.

use std::path::PathBuf;

use bytes::Bytes;

use crate::core::error::{Error, Result};

pub mod directory;
pub mod keyed;

pub use directory::{DirectoryChunkStore, DirectoryStoreBackend};
pub use keyed::{KeyedChunkStore, KeyedStoreBackend};

/// Default namespace prefix used when the caller does not pick one
pub const DEFAULT_STORE_NAME: &str = "chunks";

/// A namespace-scoped, index-addressed blob store.
///
/// After `put(i, b)` succeeds, `get(i)` returns `b` until `delete(i)`.
/// `get` on a missing index is `CorruptState`. `put` overwrites, `delete`
/// of a missing index is a no-op.
pub trait ChunkStore: Send + Sync {
    fn put(&self, index: u64, data: &[u8]) -> Result<()>;
    fn get(&self, index: u64) -> Result<Bytes>;
    fn delete(&self, index: u64) -> Result<()>;
    fn contains(&self, index: u64) -> Result<bool>;
    /// Remove every chunk in this namespace, leaving the store usable
    fn clear(&self) -> Result<()>;
    /// Flush and release backend resources
    fn close(&self) -> Result<()>;

    /// Remove the namespace and any transient artifacts for good
    fn destroy(&self) -> Result<()> {
        self.clear()?;
        self.close()
    }
}

/// Opens store handles for a namespace
pub trait ChunkStoreFactory: Send + Sync {
    fn open(&self, namespace: &str) -> Result<Box<dyn ChunkStore>>;
}

/// Run a blocking store call on tokio's blocking pool
pub(crate) async fn run_blocking<T, F>(operation: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(|e| Error::IoError(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

/// File-system safe form of a namespace
pub(crate) fn sanitize(namespace: &str) -> String {
    namespace
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Store backend selection for [`crate::TransferOptions`]
#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    /// Transactional key/value databases under `path`, one per namespace
    Keyed { path: PathBuf },
    /// One file per chunk in an ephemeral directory under `root`
    Directory { root: PathBuf },
}

impl Default for StoreBackend {
    fn default() -> Self {
        StoreBackend::Keyed {
            path: std::env::temp_dir().join("chunk-dl-store"),
        }
    }
}

impl StoreBackend {
    /// Default directory backend rooted in the system temp dir
    pub fn directory() -> Self {
        StoreBackend::Directory {
            root: std::env::temp_dir(),
        }
    }

    /// Build the factory for this backend
    pub fn factory(&self) -> Result<Box<dyn ChunkStoreFactory>> {
        match self {
            StoreBackend::Keyed { path } => Ok(Box::new(KeyedStoreBackend::new(path))),
            StoreBackend::Directory { root } => Ok(Box::new(DirectoryStoreBackend::new(root))),
        }
    }
}
