//! Transfer description and destination naming
//!
//! Holds the immutable description of one transfer and derives default
//! output names and store namespaces from it.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::core::error::{Error, Result};

/// Fallback file name when the URL has no usable last segment
const DEFAULT_OUTPUT_NAME: &str = "download.bin";

/// What to transfer, where to, and in which chunk size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSpec {
    url: String,
    destination: String,
    chunk_size: u64,
}

impl TransferSpec {
    pub fn new(url: &str, destination: &str, chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidSpec("chunk size must be positive".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::InvalidSpec(format!("unsupported URL scheme: {url}")));
        }
        Ok(Self {
            url: url.to_string(),
            destination: destination.to_string(),
            chunk_size,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Store namespace for this transfer: destination name plus a URL fingerprint.
    ///
    /// Distinct URLs or destinations get distinct namespaces, so concurrent
    /// transfers do not collide in a shared store.
    pub fn namespace(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.url.hash(&mut hasher);
        self.destination.hash(&mut hasher);
        let name = resolve_output_filename(&self.destination);
        format!("{name}-{:016x}", hasher.finish())
    }
}

/// Derive an output file name from the last path segment of a URL or path
pub fn resolve_output_filename(source: &str) -> String {
    let without_query = source.split(['?', '#']).next().unwrap_or(source);
    let path = without_query
        .split_once("://")
        .map(|(_, rest)| rest.split_once('/').map(|(_, path)| path).unwrap_or(""))
        .unwrap_or(without_query);

    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .map(|segment| segment.to_string())
        .unwrap_or_else(|| DEFAULT_OUTPUT_NAME.to_string())
}
