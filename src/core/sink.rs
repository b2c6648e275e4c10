//! Final destinations for reassembled bytes
//!
//! A sink accepts sequential writes and must be closed exactly once. The
//! engine closes it on every exit path; writes after `close` fail with
//! `SinkClosed`.

use std::future::Future;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use log::{debug, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream};

use crate::core::error::{Error, Result};
use crate::core::stream::OverwriteBehavior;

/// Sequential, write-once byte destination
pub trait OutputSink: Send {
    fn write(&mut self, block: Bytes) -> impl Future<Output = Result<()>> + Send;

    /// Flush and release the destination
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Sink over any async writer: a file, stdout, or one end of an in-process pipe
pub struct WriterSink<W> {
    writer: W,
    closed: bool,
    written: u64,
    size_hint: Option<u64>,
}

impl<W> WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            closed: false,
            written: 0,
            size_hint: None,
        }
    }

    /// Expected total size, for pipe consumers that want to announce a length
    pub fn with_size_hint(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }

    pub fn size_hint(&self) -> Option<u64> {
        self.size_hint
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<W> OutputSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, block: Bytes) -> Result<()> {
        if self.closed {
            return Err(Error::SinkClosed);
        }
        self.writer
            .write_all(&block)
            .await
            .map_err(Error::SinkWriteFailed)?;
        self.written += block.len() as u64;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::SinkClosed);
        }
        self.closed = true;
        self.writer.flush().await.map_err(Error::SinkWriteFailed)?;
        self.writer.shutdown().await.map_err(Error::SinkWriteFailed)?;
        debug!("Sink closed after {} bytes", self.written);
        Ok(())
    }
}

/// File destination staged in a `.part` sibling.
///
/// The destination itself is untouched until [`FileSink::persist`] renames the
/// staged file over it, so a failed transfer never damages an existing file.
pub struct FileSink {
    inner: WriterSink<tokio::fs::File>,
    part_path: PathBuf,
    final_path: PathBuf,
}

impl FileSink {
    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn bytes_written(&self) -> u64 {
        self.inner.bytes_written()
    }

    /// Move the closed, complete file into place
    pub async fn persist(self) -> Result<()> {
        if !self.inner.is_closed() {
            return Err(Error::CorruptState(format!(
                "{} persisted before it was closed",
                self.part_path.display()
            )));
        }
        tokio::fs::rename(&self.part_path, &self.final_path).await?;
        debug!("Moved {} into place", self.final_path.display());
        Ok(())
    }

    /// Drop the staged file and leave the destination as it was
    pub async fn discard(self) {
        if let Err(e) = tokio::fs::remove_file(&self.part_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove incomplete output {}: {e}", self.part_path.display());
            }
        }
    }
}

impl OutputSink for FileSink {
    async fn write(&mut self, block: Bytes) -> Result<()> {
        self.inner.write(block).await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

/// Staging path for a file destination
pub fn part_path_for(file_path: &str) -> PathBuf {
    PathBuf::from(format!("{file_path}.part"))
}

/// Open a file destination after checking overwrite permission
pub async fn create_file_sink(file_path: &str, overwrite: &OverwriteBehavior) -> Result<FileSink> {
    check_overwrite_permission(file_path, overwrite).await?;
    let part_path = part_path_for(file_path);
    let file = tokio::fs::File::create(&part_path).await?;
    Ok(FileSink {
        inner: WriterSink::new(file),
        part_path,
        final_path: PathBuf::from(file_path),
    })
}

/// Sink writing to the process's standard output
pub fn stdout_sink() -> WriterSink<tokio::io::Stdout> {
    WriterSink::new(tokio::io::stdout())
}

/// Back-pressured in-process pipe: bytes written to the sink are readable
/// from the returned stream. Writes block once `buffer_size` bytes are unread.
pub fn pipe_sink(buffer_size: usize) -> (WriterSink<DuplexStream>, DuplexStream) {
    let (writer, reader) = tokio::io::duplex(buffer_size);
    (WriterSink::new(writer), reader)
}

/// Check if destination file exists and handle overwrite behavior
pub(crate) async fn check_overwrite_permission(file_path: &str, behavior: &OverwriteBehavior) -> Result<bool> {
    if !Path::new(file_path).exists() {
        return Ok(true);
    }

    match behavior {
        OverwriteBehavior::Force => {
            log::warn!("Overwriting existing file: {file_path}");
            Ok(true)
        }
        OverwriteBehavior::NeverOverwrite => Err(Error::IoError(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("File already exists: {file_path} (use --force to overwrite)"),
        ))),
        OverwriteBehavior::Prompt => {
            eprintln!("File already exists: {file_path}");
            eprint!("Overwrite? [y/N]: ");

            use std::io::Write;
            std::io::stderr().flush().map_err(Error::IoError)?;

            let input = tokio::task::spawn_blocking(|| {
                let mut input = String::new();
                std::io::stdin().read_line(&mut input).map(|_| input)
            })
            .await
            .map_err(|e| Error::IoError(std::io::Error::new(std::io::ErrorKind::Other, e)))?
            .map_err(Error::IoError)?;

            match input.trim().to_lowercase().as_str() {
                "y" | "yes" => Ok(true),
                _ => Err(Error::IoError(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    "Transfer cancelled by user",
                ))),
            }
        }
    }
}
