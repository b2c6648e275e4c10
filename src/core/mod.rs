//! Core library modules for chunk-dl
//!
//! This module contains the internal implementation details of the chunk-dl library.

pub mod error;
pub mod plan;
pub mod fetch;
pub mod store;
pub mod reassembly;
pub mod sink;
pub mod source;
pub mod stream;
pub mod downloader;

// Re-export main types for internal use
pub use source::{TransferSpec, resolve_output_filename};
pub use downloader::TransferEngine;
