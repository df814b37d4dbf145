//! crawlhive: a decentralized, horizontally scalable web crawler.
//!
//! Workers are fully autonomous; all coordination happens through a shared
//! Redis instance (priority frontier, approximate URL filter, per-host
//! politeness leases, robots.txt cache) and pages land compressed and
//! deduplicated in a SQLite page store.

pub mod config;
pub mod error;
pub mod frontier;
pub mod politeness;
pub mod robots;
pub mod storage;
pub mod url_filter;
pub mod utils;
pub mod worker;

pub use config::CrawlerConfig;
pub use error::{CrawlError, CrawlResult};
pub use frontier::{Frontier, FrontierEntry, PoppedEntry};
pub use politeness::{PolitenessManager, RequeueManager};
pub use robots::RobotsCache;
pub use storage::{PageStore, StorageStats, StoredPage};
pub use url_filter::{FilterStats, UrlFilter};
pub use worker::{FetchOutcome, PageFetcher, Worker, WorkerStats};
