//! Transfer options, progress reporting and the streaming reader
//!
//! Provides the configuration passed to the engine and the AsyncRead handed out
//! by the streaming API.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::Serialize;
use tokio::io::{AsyncRead, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::error::{Error, Result};
use crate::core::fetch::RetryPolicy;
use crate::core::store::StoreBackend;
use crate::core::downloader::TransferReport;

/// Default chunk size (16 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

/// Snapshot emitted after every stored chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub parts_completed: u64,
    pub parts_total: u64,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.bytes_transferred as f64 * 100.0 / self.total_bytes as f64
    }
}

/// Progress observer. Called inline, so it must return quickly.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Overwrite behavior for existing files
#[derive(Debug, Clone, PartialEq, Default)]
pub enum OverwriteBehavior {
    /// Prompt user for confirmation (default)
    #[default]
    Prompt,
    /// Force overwrite without prompting
    Force,
    /// Never overwrite, fail if file exists
    NeverOverwrite,
}

/// Options for a transfer
#[derive(Clone)]
pub struct TransferOptions {
    /// Bytes per chunk, last chunk may be shorter
    pub chunk_size: u64,

    /// Maximum number of ranges fetched concurrently (1 = sequential)
    pub max_connections: usize,

    /// Retry bound, backoff and per-attempt timeout
    pub retry: RetryPolicy,

    /// Where chunks are kept between fetch and reassembly
    pub store: StoreBackend,

    /// Store namespace; derived from the transfer when unset
    pub namespace: Option<String>,

    /// Behavior when destination file already exists
    pub overwrite: OverwriteBehavior,

    /// Optional progress callback
    pub progress: Option<ProgressCallback>,

    /// Cancels the transfer between chunk operations
    pub cancel: Option<CancellationToken>,

    /// Pipe buffer for the streaming API
    pub buffer_size: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_connections: 1,
            retry: RetryPolicy::default(),
            store: StoreBackend::default(),
            namespace: None,
            overwrite: OverwriteBehavior::default(),
            progress: None,
            cancel: None,
            buffer_size: 64 * 1024, // 64KB
        }
    }
}

/// Reader side of a transfer running in the background.
///
/// EOF only means the engine closed its sink; call [`TransferStream::finish`]
/// to learn whether the transfer actually completed.
pub struct TransferStream {
    reader: DuplexStream,
    task: JoinHandle<Result<TransferReport>>,
    total_size: u64,
}

impl TransferStream {
    pub(crate) fn new(
        reader: DuplexStream,
        task: JoinHandle<Result<TransferReport>>,
        total_size: u64,
    ) -> Self {
        Self {
            reader,
            task,
            total_size,
        }
    }

    /// Size announced by the source
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Wait for the background transfer and return its outcome
    pub async fn finish(self) -> Result<TransferReport> {
        drop(self.reader);
        self.task
            .await
            .map_err(|e| Error::IoError(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }
}

impl AsyncRead for TransferStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}
