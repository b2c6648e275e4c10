//! # Chunk-dl Library
//!
//! A resumable, chunked HTTP transfer engine. Large resources are fetched in
//! fixed-size byte ranges, each range is persisted in an intermediate chunk
//! store, and the stored chunks are streamed out in order to the destination
//! without ever holding the whole object in memory.
//!
//! ## Features
//!
//! - **Ranged fetching**: one `Range` request per chunk, with linear-backoff retries
//! - **Durable staging**: chunks live in a sled database or a directory of part files
//! - **Bounded memory**: reassembly keeps at most one chunk resident
//! - **Streaming support**: write to a file, to stdout, or read through an `AsyncRead`
//! - **Progress tracking**: optional per-chunk progress callbacks
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Download to a file named after the URL
//!     chunk_dl::get("https://example.com/files/disk.img", None).await?;
//!
//!     // Download to a specific file
//!     chunk_dl::get("https://example.com/files/disk.img", Some("./disk.img")).await?;
//!
//!     // Stream download
//!     let mut stream = chunk_dl::get_stream("https://example.com/files/disk.img").await?;
//!     // Use stream with any AsyncRead-compatible code
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Progress Tracking
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     chunk_dl::get_with_progress(
//!         "https://example.com/files/disk.img",
//!         Some("disk.img"),
//!         |progress| {
//!             println!("Parts {}/{}", progress.parts_completed, progress.parts_total);
//!         }
//!     ).await?;
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub use crate::core::downloader::{Phase, TransferEngine, TransferReport, TransferState};
pub use crate::core::error::{Error, Result};
pub use crate::core::fetch::{Capability, ChunkFetcher, RetryPolicy};
pub use crate::core::plan::{plan, RangeDescriptor};
pub use crate::core::reassembly::{pipe, ReassemblyStream};
pub use crate::core::sink::{
    create_file_sink, part_path_for, pipe_sink, stdout_sink, FileSink, OutputSink, WriterSink,
};
pub use crate::core::source::{resolve_output_filename, TransferSpec};
pub use crate::core::store::{
    ChunkStore, ChunkStoreFactory, DirectoryChunkStore, DirectoryStoreBackend, KeyedChunkStore,
    KeyedStoreBackend, StoreBackend,
};
pub use crate::core::stream::{
    OverwriteBehavior, Progress, ProgressCallback, TransferOptions, TransferStream, DEFAULT_CHUNK_SIZE,
};

// Internal modules
mod core;

/// Destination name meaning standard output
pub const STDOUT_DESTINATION: &str = "-";

/// Download a resource to a file
///
/// # Arguments
/// * `url` - HTTP(S) URL of a server that answers byte-range requests
/// * `dest` - Optional destination path. If None, named after the URL's last path segment
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// chunk_dl::get("https://example.com/big.iso", Some("./big.iso")).await?;
/// # Ok(())
/// # }
/// ```
pub async fn get(url: &str, dest: Option<&str>) -> Result<TransferReport> {
    get_with_options(url, dest, TransferOptions::default()).await
}

/// Download with progress tracking
///
/// The callback receives a [`Progress`] snapshot after every stored chunk.
pub async fn get_with_progress<F>(url: &str, dest: Option<&str>, progress: F) -> Result<TransferReport>
where
    F: Fn(Progress) + Send + Sync + 'static,
{
    let options = TransferOptions {
        progress: Some(Arc::new(progress)),
        ..Default::default()
    };
    get_with_options(url, dest, options).await
}

/// Download with custom options
///
/// `dest` of `"-"` writes to standard output. File destinations are written to
/// `<dest>.part` and renamed into place only once the transfer completed.
///
/// # Examples
/// ```rust,no_run
/// use chunk_dl::{OverwriteBehavior, StoreBackend, TransferOptions};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let options = TransferOptions {
///     chunk_size: 8 * 1024 * 1024,
///     max_connections: 4,
///     store: StoreBackend::directory(),
///     overwrite: OverwriteBehavior::Force,
///     ..Default::default()
/// };
///
/// chunk_dl::get_with_options("https://example.com/big.iso", None, options).await?;
/// # Ok(())
/// # }
/// ```
pub async fn get_with_options(url: &str, dest: Option<&str>, options: TransferOptions) -> Result<TransferReport> {
    let file_path = match dest {
        Some(path) => path.to_string(),
        None => resolve_output_filename(url),
    };
    let spec = TransferSpec::new(url, &file_path, options.chunk_size)?;

    if file_path == STDOUT_DESTINATION {
        let mut sink = stdout_sink();
        return TransferEngine::new(spec, options).run(&mut sink).await;
    }

    let mut sink = create_file_sink(&file_path, &options.overwrite).await?;
    match TransferEngine::new(spec, options).run(&mut sink).await {
        Ok(report) => {
            sink.persist().await?;
            Ok(report)
        }
        Err(e) => {
            sink.discard().await;
            Err(e)
        }
    }
}

/// Download and return a stream
///
/// The transfer runs on a background task; the returned stream yields the
/// reassembled bytes in order. Call [`TransferStream::finish`] after reading to
/// confirm the transfer completed.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use tokio::io::AsyncReadExt;
///
/// let mut stream = chunk_dl::get_stream("https://example.com/small.bin").await?;
/// let mut buffer = Vec::new();
/// stream.read_to_end(&mut buffer).await?;
/// stream.finish().await?;
/// println!("Downloaded {} bytes", buffer.len());
/// # Ok(())
/// # }
/// ```
pub async fn get_stream(url: &str) -> Result<TransferStream> {
    get_stream_with_options(url, TransferOptions::default()).await
}

/// Streaming download with custom options
pub async fn get_stream_with_options(url: &str, options: TransferOptions) -> Result<TransferStream> {
    let spec = TransferSpec::new(url, &resolve_output_filename(url), options.chunk_size)?;

    // Fail fast on unusable sources before spawning anything
    let client = crate::core::fetch::default_client();
    let capability = crate::core::fetch::probe(&client, url, &options.retry).await?;

    let (sink, reader) = pipe_sink(options.buffer_size);
    let mut sink = sink.with_size_hint(capability.total_size);
    let mut engine = TransferEngine::new(spec, options)
        .with_client(client)
        .with_capability(capability);
    let task = tokio::spawn(async move { engine.run(&mut sink).await });

    Ok(TransferStream::new(reader, task, capability.total_size))
}
