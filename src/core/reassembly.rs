//! Ordered reassembly of stored chunks
//!
//! [`ReassemblyStream`] reads chunk 0..N-1 back out of a [`ChunkStore`] one at a
//! time. A chunk is deleted from the store as soon as the consumer asks for the
//! next one, which is after the sink has accepted it.

use std::sync::Arc;

use bytes::Bytes;
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::core::error::{Error, Result};
use crate::core::sink::OutputSink;
use crate::core::store::{run_blocking, ChunkStore};

/// Single-pass, strictly ordered sequence of stored chunks
pub struct ReassemblyStream {
    store: Arc<dyn ChunkStore>,
    count: u64,
    cursor: u64,
    handed_out: Option<u64>,
    finished: bool,
}

impl ReassemblyStream {
    pub fn new(store: Arc<dyn ChunkStore>, count: u64) -> Self {
        Self {
            store,
            count,
            cursor: 0,
            handed_out: None,
            finished: false,
        }
    }

    /// Index of the next chunk to be yielded
    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// Async form of [`Iterator::next`]: store I/O runs on the blocking pool.
    pub async fn next_block(&mut self) -> Option<Result<Bytes>> {
        if self.finished {
            return None;
        }
        let store = Arc::clone(&self.store);
        let release = self.handed_out.take();
        let next = (self.cursor < self.count).then_some(self.cursor);
        let pulled = run_blocking(move || step(store.as_ref(), release, next)).await;
        self.advance(pulled)
    }

    fn advance(&mut self, pulled: Result<Option<Bytes>>) -> Option<Result<Bytes>> {
        match pulled {
            Ok(Some(block)) => {
                self.handed_out = Some(self.cursor);
                self.cursor += 1;
                Some(Ok(block))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Release the chunk handed out last, then read the next one
fn step(store: &dyn ChunkStore, release: Option<u64>, next: Option<u64>) -> Result<Option<Bytes>> {
    if let Some(index) = release {
        store.delete(index)?;
        debug!("Released chunk {index} from store");
    }
    next.map(|index| store.get(index)).transpose()
}

impl Iterator for ReassemblyStream {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let release = self.handed_out.take();
        let next = (self.cursor < self.count).then_some(self.cursor);
        let pulled = step(self.store.as_ref(), release, next);
        self.advance(pulled)
    }
}

impl std::iter::FusedIterator for ReassemblyStream {}

/// Drain `stream` into `sink`, one block at a time.
///
/// The next chunk is not read until the sink has accepted the previous write,
/// so at most one chunk is resident. Returns the number of bytes written.
/// The sink is not closed here.
pub async fn pipe<S>(
    mut stream: ReassemblyStream,
    sink: &mut S,
    cancel: Option<&CancellationToken>,
) -> Result<u64>
where
    S: OutputSink,
{
    let mut written = 0u64;
    while let Some(block) = stream.next_block().await {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(Error::Cancelled);
        }
        let block = block?;
        written += block.len() as u64;
        sink.write(block).await?;
    }
    Ok(written)
}
