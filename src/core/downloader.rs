//! Transfer engine for chunk-dl
//!
//! Drives one transfer through `Probing → Fetching → Reassembling → Completed`,
//! with `Aborted` reachable from every non-terminal phase. The engine owns the
//! chunk store handle, decides every abort, and cleans up afterwards.

use std::sync::Arc;

use futures::StreamExt;
use log::{debug, error, info, warn};
use reqwest::Client;
use serde::Serialize;

use crate::core::error::{Error, Result};
use crate::core::fetch::{default_client, probe, Capability, ChunkFetcher};
use crate::core::plan::{plan, RangeDescriptor};
use crate::core::reassembly::{pipe, ReassemblyStream};
use crate::core::sink::OutputSink;
use crate::core::source::TransferSpec;
use crate::core::store::{run_blocking, ChunkStore, ChunkStoreFactory};
use crate::core::stream::{Progress, TransferOptions};

/// Lifecycle phase of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Probing,
    Fetching,
    Reassembling,
    Completed,
    Aborted,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Aborted)
    }
}

/// Mutable progress of the running transfer, owned by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransferState {
    pub parts_completed: u64,
    pub bytes_transferred: u64,
    pub phase: Phase,
}

/// Summary of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub url: String,
    pub destination: String,
    pub namespace: String,
    pub total_bytes: u64,
    pub parts_total: u64,
    pub bytes_written: u64,
    pub phase: Phase,
}

/// Single-use orchestrator for one chunked transfer
pub struct TransferEngine {
    spec: TransferSpec,
    options: TransferOptions,
    client: Client,
    factory: Option<Arc<dyn ChunkStoreFactory>>,
    state: TransferState,
    capability: Option<Capability>,
    started: bool,
}

impl TransferEngine {
    /// Create an engine; the store backend comes from `options.store`
    pub fn new(spec: TransferSpec, options: TransferOptions) -> Self {
        Self {
            spec,
            options,
            client: default_client(),
            factory: None,
            state: TransferState {
                parts_completed: 0,
                bytes_transferred: 0,
                phase: Phase::Probing,
            },
            capability: None,
            started: false,
        }
    }

    /// Use a specific store factory instead of `options.store`
    pub fn with_store_factory(mut self, factory: Box<dyn ChunkStoreFactory>) -> Self {
        self.factory = Some(Arc::from(factory));
        self
    }

    /// Skip the probe and trust a capability the caller already obtained
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }

    /// Use a specific HTTP client
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Probe result, once probing succeeded
    pub fn capability(&self) -> Option<Capability> {
        self.capability
    }

    pub fn spec(&self) -> &TransferSpec {
        &self.spec
    }

    pub fn namespace(&self) -> String {
        self.options
            .namespace
            .clone()
            .unwrap_or_else(|| self.spec.namespace())
    }

    /// Run the transfer into `sink`.
    ///
    /// The sink is closed exactly once before this returns, whatever the
    /// outcome. The engine cannot be run twice.
    pub async fn run<S>(&mut self, sink: &mut S) -> Result<TransferReport>
    where
        S: OutputSink,
    {
        if self.started {
            return Err(Error::InvalidSpec("transfer engine is single-use".to_string()));
        }
        self.started = true;
        info!("Starting transfer of {} to {}", self.spec.url(), self.spec.destination());

        let mut store: Option<Arc<dyn ChunkStore>> = None;
        let outcome = self.drive(sink, &mut store).await;

        let close_result = sink.close().await;
        let outcome = match (outcome, close_result) {
            (Ok(written), Ok(())) => Ok(written),
            (Ok(_), Err(close_error)) => Err(close_error),
            (Err(e), Err(close_error)) => {
                warn!("Closing output after failure also failed: {close_error}");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        };

        match &outcome {
            Ok(_) => self.enter(Phase::Completed),
            Err(e) => {
                error!("Transfer aborted: {e}");
                self.enter(Phase::Aborted);
            }
        }

        if let Some(store) = store {
            self.cleanup(store, outcome.as_ref().err()).await;
        }

        outcome.map(|bytes_written| self.report(bytes_written))
    }

    async fn drive<S>(&mut self, sink: &mut S, store_slot: &mut Option<Arc<dyn ChunkStore>>) -> Result<u64>
    where
        S: OutputSink,
    {
        self.check_cancelled()?;
        let capability = match self.capability {
            Some(known) => known,
            None => probe(&self.client, self.spec.url(), &self.options.retry).await?,
        };
        self.capability = Some(capability);
        let ranges = plan(capability.total_size, self.spec.chunk_size())?;

        self.check_cancelled()?;
        self.enter(Phase::Fetching);
        let factory = match &self.factory {
            Some(factory) => Arc::clone(factory),
            None => Arc::from(self.options.store.factory()?),
        };
        let namespace = self.namespace();
        let store: Arc<dyn ChunkStore> = run_blocking({
            let namespace = namespace.clone();
            move || {
                let handle = factory.open(&namespace)?;
                // Records left over from an earlier run of this namespace are not trusted
                handle.clear()?;
                Ok(Arc::from(handle))
            }
        })
        .await?;
        *store_slot = Some(Arc::clone(&store));
        debug!("Opened chunk store namespace {namespace}");

        let fetcher = ChunkFetcher::new(
            self.client.clone(),
            self.spec.url(),
            capability.total_size,
            self.options.retry.clone(),
        );
        self.fetch_all(&fetcher, &ranges, &store, capability.total_size).await?;

        self.check_cancelled()?;
        self.enter(Phase::Reassembling);
        let stream = ReassemblyStream::new(store, ranges.len() as u64);
        let written = pipe(stream, sink, self.options.cancel.as_ref()).await?;
        if written != capability.total_size {
            return Err(Error::CorruptState(format!(
                "reassembled {written} bytes, expected {}",
                capability.total_size
            )));
        }

        Ok(written)
    }

    async fn fetch_all(
        &mut self,
        fetcher: &ChunkFetcher,
        ranges: &[RangeDescriptor],
        store: &Arc<dyn ChunkStore>,
        total_size: u64,
    ) -> Result<()> {
        let parts_total = ranges.len() as u64;
        let connections = calculate_optimal_connections(ranges.len(), self.options.max_connections);
        debug!("Fetching {} ranges over {connections} connection(s)", ranges.len());

        let results = futures::stream::iter(ranges.iter().copied())
            .map(|range| {
                let fetcher = fetcher.clone();
                async move {
                    let bytes = fetcher.fetch(&range).await?;
                    Ok::<_, Error>((range, bytes))
                }
            })
            .buffer_unordered(connections);
        tokio::pin!(results);

        loop {
            let next = match self.options.cancel.clone() {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    next = results.next() => next,
                },
                None => results.next().await,
            };
            let Some(result) = next else {
                break;
            };

            let (range, bytes) = result?;
            self.check_cancelled()?;
            let target = Arc::clone(store);
            let len = bytes.len();
            run_blocking(move || target.put(range.index, &bytes)).await?;
            debug!("Stored chunk {} ({len} bytes)", range.index);
            self.record_stored(&range, parts_total, total_size);
        }

        Ok(())
    }

    fn record_stored(&mut self, range: &RangeDescriptor, parts_total: u64, total_size: u64) {
        self.state.parts_completed += 1;
        self.state.bytes_transferred += range.len();

        let progress = Progress {
            parts_completed: self.state.parts_completed,
            parts_total,
            bytes_transferred: self.state.bytes_transferred,
            total_bytes: total_size,
        };
        info!(
            "downloaded parts: {}/{}, progress: {:.2}%",
            progress.parts_completed,
            progress.parts_total,
            progress.percent()
        );
        if let Some(ref observer) = self.options.progress {
            observer(progress);
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.options.cancel {
            Some(token) if token.is_cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    fn enter(&mut self, phase: Phase) {
        debug_assert!(!self.state.phase.is_terminal(), "phase {:?} re-entered", phase);
        info!("Transfer phase {:?} -> {:?}", self.state.phase, phase);
        self.state.phase = phase;
    }

    /// Best-effort cleanup once the outcome is decided. Never escalates.
    async fn cleanup(&self, store: Arc<dyn ChunkStore>, failure: Option<&Error>) {
        if let Some(Error::FetchFailed { index, .. }) = failure {
            warn!(
                "Keeping {} stored chunk(s) in namespace {} after chunk {index} failed",
                self.state.parts_completed,
                self.namespace()
            );
            if let Err(e) = run_blocking(move || store.close()).await {
                warn!("Failed to close chunk store: {e}");
            }
            return;
        }

        if let Err(e) = run_blocking(move || store.destroy()).await {
            warn!("Failed to clean up chunk store: {e}");
        }
    }

    fn report(&self, bytes_written: u64) -> TransferReport {
        let capability = self.capability.unwrap_or(Capability {
            total_size: 0,
            supports_ranges: false,
        });
        TransferReport {
            url: self.spec.url().to_string(),
            destination: self.spec.destination().to_string(),
            namespace: self.namespace(),
            total_bytes: capability.total_size,
            parts_total: crate::core::plan::chunk_count(capability.total_size, self.spec.chunk_size()),
            bytes_written,
            phase: self.state.phase,
        }
    }
}

/// Calculate the number of concurrent fetches from the request and machine limits
fn calculate_optimal_connections(pending_ranges: usize, max_connections: usize) -> usize {
    let cpu_limit = num_cpus::get() * 2;
    max_connections.max(1).min(cpu_limit).min(pending_ranges.max(1))
}
