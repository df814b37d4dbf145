//! Error types shared across the crawler.
//!
//! Only failures that cross a component boundary live here. Per-page fetch
//! outcomes are not errors (see `worker::FetchOutcome`); the worker loop
//! absorbs them and continues.

use thiserror::Error;

/// Errors surfaced by crawler components.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Shared state store (frontier, filter, leases, robots cache) failure
    #[error("shared store error: {0}")]
    SharedStore(#[from] redis::RedisError),

    /// Durable page store failure
    #[error("page store error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Outbound HTTP failure that is not a normal per-page outcome
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Frontier entry or link-list encoding failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression or decompression failure
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),

    /// Stored page content is not valid UTF-8
    #[error("encoding error: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    /// Invalid or incomplete configuration
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience alias for results produced by crawler components.
pub type CrawlResult<T> = Result<T, CrawlError>;
