//! Network side of a transfer: capability probe and ranged chunk retrieval
//!
//! Transient failures are retried here and nowhere else. Everything that
//! survives the retry budget is handed back to the engine.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::TryStreamExt;
use log::{debug, warn};
use once_cell::sync::Lazy;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::Serialize;

use crate::core::error::{Error, Result};
use crate::core::plan::RangeDescriptor;

/// Global HTTP client shared by all transfers.
///
/// reqwest is built without its decompression features: byte ranges address
/// the stored representation, so no client may ever decode a body.
static GLOBAL_CLIENT: Lazy<Client> = Lazy::new(|| {
    ClientBuilder::new()
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(20)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(format!("chunk-dl/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
});

/// Shared client used when the caller does not provide one
pub fn default_client() -> Client {
    GLOBAL_CLIENT.clone()
}

/// Retry bound and linear backoff for a single range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per range, including the first
    pub max_attempts: u32,
    /// After failed attempt `n` the fetcher waits `n * backoff_unit`
    pub backoff_unit: Duration,
    /// Deadline for one attempt, body included
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        self.backoff_unit * failed_attempt
    }
}

/// What the source told us during the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub total_size: u64,
    pub supports_ranges: bool,
}

/// Issue a metadata-only probe and require both a size and range support.
pub async fn probe(client: &Client, url: &str, policy: &RetryPolicy) -> Result<Capability> {
    let response = retry_transient(policy, "probe", || async {
        let response = tokio::time::timeout(policy.attempt_timeout, client.head(url).send())
            .await
            .map_err(|_| Error::NetworkError("probe timed out".to_string()))??;
        Ok::<_, Error>(response)
    })
    .await?;

    if !response.status().is_success() {
        return Err(create_helpful_probe_error(url, response.status()));
    }

    let total_size = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|size| *size > 0)
        .ok_or_else(|| {
            Error::PreconditionFailed("server did not report a positive content length".to_string())
        })?;

    let supports_ranges = response
        .headers()
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|unit| unit.trim().eq_ignore_ascii_case("bytes")));

    if !supports_ranges {
        return Err(Error::PreconditionFailed(
            "server does not support resumable ranges".to_string(),
        ));
    }

    debug!("Probe of {url}: {total_size} bytes, ranges supported");
    Ok(Capability {
        total_size,
        supports_ranges,
    })
}

/// Retrieves single byte ranges of one resource
#[derive(Clone)]
pub struct ChunkFetcher {
    client: Client,
    url: String,
    total_size: u64,
    policy: RetryPolicy,
}

impl ChunkFetcher {
    pub fn new(client: Client, url: &str, total_size: u64, policy: RetryPolicy) -> Self {
        Self {
            client,
            url: url.to_string(),
            total_size,
            policy,
        }
    }

    /// Fetch one range with retries. Exhausting the budget yields `FetchFailed`.
    pub async fn fetch(&self, range: &RangeDescriptor) -> Result<Bytes> {
        let label = format!("chunk {}", range.index);
        retry_transient(&self.policy, &label, || self.fetch_once(range))
            .await
            .map_err(|last_error| Error::FetchFailed {
                index: range.index,
                last_error: Box::new(last_error),
            })
    }

    async fn fetch_once(&self, range: &RangeDescriptor) -> Result<Bytes> {
        tokio::time::timeout(self.policy.attempt_timeout, self.request_range(range))
            .await
            .map_err(|_| {
                Error::NetworkError(format!(
                    "attempt timed out after {:?}",
                    self.policy.attempt_timeout
                ))
            })?
    }

    async fn request_range(&self, range: &RangeDescriptor) -> Result<Bytes> {
        let response = self
            .client
            .get(&self.url)
            .header(RANGE, range.header_value())
            .send()
            .await?;

        let status = response.status();
        let whole_resource = range.start == 0 && range.end + 1 == self.total_size;
        let accepted = status == StatusCode::PARTIAL_CONTENT
            || (status == StatusCode::OK && whole_resource);
        if !accepted {
            return Err(Error::ProtocolError(format!(
                "unexpected status {status} for range {}",
                range.header_value()
            )));
        }

        let expected = range.len();
        let mut body = BytesMut::with_capacity(expected as usize);
        let mut stream = response.bytes_stream();
        while let Some(piece) = stream.try_next().await? {
            if body.len() as u64 + piece.len() as u64 > expected {
                return Err(Error::ProtocolError(format!(
                    "range {} returned more than {expected} bytes",
                    range.header_value()
                )));
            }
            body.extend_from_slice(&piece);
        }

        if body.len() as u64 != expected {
            return Err(Error::ProtocolError(format!(
                "range {} returned {} bytes, expected {expected}",
                range.header_value(),
                body.len()
            )));
        }

        Ok(body.freeze())
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or the
/// policy's attempt budget is spent. Returns the last error in the latter case.
pub async fn retry_transient<F, Fut, T>(policy: &RetryPolicy, label: &str, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!("{label}: attempt {attempt}/{max_attempts} failed: {e}. Retrying in {delay:?}");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Turn a failed probe status into a readable precondition failure
fn create_helpful_probe_error(url: &str, status: StatusCode) -> Error {
    let hint = match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => "resource not found, check the URL",
        StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => {
            "server does not answer metadata probes"
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            "access denied, authenticated sources are not supported"
        }
        _ => "unexpected response to metadata probe",
    };
    Error::PreconditionFailed(format!("{hint} ({status}): {url}"))
}
