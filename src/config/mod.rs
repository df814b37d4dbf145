//! Worker configuration.
//!
//! A single explicit record threaded through every component constructor;
//! no process-wide state. Build one with the fluent `with_*` methods or
//! from the environment with [`CrawlerConfig::from_env`].

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CrawlError, CrawlResult};
use crate::utils::{
    DEFAULT_BATCH_SIZE, DEFAULT_CRAWL_DELAY_SECS, DEFAULT_FILTER_CAPACITY,
    DEFAULT_FILTER_ERROR_RATE, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_REQUEUE_PENALTY,
    DEFAULT_ROBOTS_CACHE_TTL_SECS, FETCH_CONNECT_TIMEOUT_MS, FETCH_READ_TIMEOUT_SECS,
    ROBOTS_CONNECT_TIMEOUT_SECS, ROBOTS_TOTAL_TIMEOUT_SECS, USER_AGENTS,
};

/// Configuration for one crawl worker process.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Shared state store connection URL.
    pub redis_url: String,
    /// Path of the SQLite page store.
    pub database_path: PathBuf,
    /// Worker identifier; generated (`worker-{8 hex}`) when `None`.
    pub worker_id: Option<String>,
    /// Pages buffered before a storage batch flush.
    pub batch_size: usize,
    /// Expected URL count the shared filter is sized for.
    pub filter_capacity: u64,
    /// Acceptable filter false-positive rate.
    pub filter_error_rate: f64,
    /// Per-host crawl delay when no robots.txt or domain state overrides it.
    pub default_crawl_delay: f64,
    /// Priority subtracted when a frontier entry is snoozed.
    pub requeue_penalty: f64,
    /// robots.txt cache lifetime, both tiers.
    pub robots_cache_ttl: Duration,
    /// Worker exits after the frontier stays empty this long.
    pub idle_timeout: Duration,
    /// Per-worker page cap; `None` = unlimited.
    pub max_pages: Option<u64>,
    /// URLs seeded into the frontier at startup.
    pub seed_urls: Vec<String>,
    /// User-Agent rotation pool for page fetches.
    pub user_agents: Vec<String>,
    /// Page fetch connect timeout.
    pub fetch_connect_timeout: Duration,
    /// Page fetch total timeout.
    pub fetch_timeout: Duration,
    /// robots.txt fetch connect timeout.
    pub robots_connect_timeout: Duration,
    /// robots.txt fetch total timeout.
    pub robots_timeout: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379/".to_string(),
            database_path: PathBuf::from("./crawlhive.sqlite"),
            worker_id: None,
            batch_size: DEFAULT_BATCH_SIZE,
            filter_capacity: DEFAULT_FILTER_CAPACITY,
            filter_error_rate: DEFAULT_FILTER_ERROR_RATE,
            default_crawl_delay: DEFAULT_CRAWL_DELAY_SECS,
            requeue_penalty: DEFAULT_REQUEUE_PENALTY,
            robots_cache_ttl: Duration::from_secs(DEFAULT_ROBOTS_CACHE_TTL_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            max_pages: None,
            seed_urls: Vec::new(),
            user_agents: USER_AGENTS.iter().map(|ua| ua.to_string()).collect(),
            fetch_connect_timeout: Duration::from_millis(FETCH_CONNECT_TIMEOUT_MS),
            fetch_timeout: Duration::from_secs(FETCH_READ_TIMEOUT_SECS),
            robots_connect_timeout: Duration::from_secs(ROBOTS_CONNECT_TIMEOUT_SECS),
            robots_timeout: Duration::from_secs(ROBOTS_TOTAL_TIMEOUT_SECS),
        }
    }
}

impl CrawlerConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable, then validate it.
    ///
    /// Recognized variables: `REDIS_URL`, `CRAWLER_DB`, `CRAWLER_WORKER_ID`,
    /// `CRAWLER_BATCH_SIZE`, `CRAWLER_MAX_PAGES` (0 = unlimited),
    /// `CRAWLER_IDLE_TIMEOUT`, `CRAWLER_CRAWL_DELAY`,
    /// `CRAWLER_ROBOTS_CACHE_TTL`, `CRAWLER_SEED_URLS` (comma-separated).
    pub fn from_env() -> CrawlResult<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("REDIS_URL") {
            config.redis_url = url;
        }
        if let Ok(path) = std::env::var("CRAWLER_DB") {
            config.database_path = PathBuf::from(path);
        }
        if let Ok(id) = std::env::var("CRAWLER_WORKER_ID") {
            config.worker_id = Some(id);
        }
        if let Some(size) = env_parse::<usize>("CRAWLER_BATCH_SIZE") {
            config.batch_size = size.max(1);
        }
        if let Some(max) = env_parse::<u64>("CRAWLER_MAX_PAGES") {
            config.max_pages = (max > 0).then_some(max);
        }
        if let Some(secs) = env_parse::<u64>("CRAWLER_IDLE_TIMEOUT") {
            config.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(delay) = env_parse::<f64>("CRAWLER_CRAWL_DELAY") {
            config.default_crawl_delay = delay;
        }
        if let Some(ttl) = env_parse::<u64>("CRAWLER_ROBOTS_CACHE_TTL") {
            config.robots_cache_ttl = Duration::from_secs(ttl);
        }
        if let Ok(seeds) = std::env::var("CRAWLER_SEED_URLS") {
            config.seed_urls = seeds
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the record can actually drive a worker.
    ///
    /// Rejects an empty store URL or database path, a zero filter
    /// capacity, an error rate outside (0, 1), and an empty User-Agent
    /// pool. Run automatically by `from_env` and again at worker startup,
    /// so builder-assembled configs are covered too.
    pub fn validate(&self) -> CrawlResult<()> {
        if self.redis_url.trim().is_empty() {
            return Err(CrawlError::Config("redis_url must not be empty".into()));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(CrawlError::Config("database_path must not be empty".into()));
        }
        if self.filter_capacity == 0 {
            return Err(CrawlError::Config("filter_capacity must be positive".into()));
        }
        if !(self.filter_error_rate > 0.0 && self.filter_error_rate < 1.0) {
            return Err(CrawlError::Config(format!(
                "filter_error_rate must be between 0 and 1, got {}",
                self.filter_error_rate
            )));
        }
        if self.default_crawl_delay < 0.0 {
            return Err(CrawlError::Config("default_crawl_delay must not be negative".into()));
        }
        if self.user_agents.is_empty() {
            return Err(CrawlError::Config("user_agents pool must not be empty".into()));
        }
        Ok(())
    }

    /// Set the shared state store URL.
    #[must_use]
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Set the SQLite page store path.
    #[must_use]
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    /// Set an explicit worker id.
    #[must_use]
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = Some(id.into());
        self
    }

    /// Set the storage batch size (minimum 1).
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the filter capacity and false-positive rate.
    #[must_use]
    pub fn with_filter_sizing(mut self, capacity: u64, error_rate: f64) -> Self {
        self.filter_capacity = capacity;
        self.filter_error_rate = error_rate;
        self
    }

    /// Set the default per-host crawl delay in seconds.
    #[must_use]
    pub fn with_default_crawl_delay(mut self, secs: f64) -> Self {
        self.default_crawl_delay = secs;
        self
    }

    /// Set the snooze-requeue priority penalty.
    #[must_use]
    pub fn with_requeue_penalty(mut self, penalty: f64) -> Self {
        self.requeue_penalty = penalty;
        self
    }

    /// Set the robots.txt cache lifetime.
    #[must_use]
    pub fn with_robots_cache_ttl(mut self, ttl: Duration) -> Self {
        self.robots_cache_ttl = ttl;
        self
    }

    /// Set the empty-frontier idle timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set a per-worker page cap.
    #[must_use]
    pub fn with_max_pages(mut self, max: u64) -> Self {
        self.max_pages = Some(max);
        self
    }

    /// Set the seed URL list.
    #[must_use]
    pub fn with_seed_urls(mut self, urls: Vec<String>) -> Self {
        self.seed_urls = urls;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CrawlerConfig::default();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.user_agents.len(), 10);
        assert!(config.max_pages.is_none());
        assert_eq!(config.default_crawl_delay, 1.0);
    }

    #[test]
    fn builder_round_trip() {
        let config = CrawlerConfig::default()
            .with_redis_url("redis://cache:6379/")
            .with_batch_size(0)
            .with_max_pages(25)
            .with_filter_sizing(1_000, 0.01);
        assert_eq!(config.redis_url, "redis://cache:6379/");
        assert_eq!(config.batch_size, 1); // clamped
        assert_eq!(config.max_pages, Some(25));
        assert_eq!(config.filter_capacity, 1_000);
    }

    #[test]
    fn defaults_validate_cleanly() {
        assert!(CrawlerConfig::default().validate().is_ok());
    }

    #[test]
    fn validation_rejects_unusable_configs() {
        let empty_url = CrawlerConfig::default().with_redis_url("  ");
        assert!(matches!(empty_url.validate(), Err(CrawlError::Config(_))));

        let zero_capacity = CrawlerConfig::default().with_filter_sizing(0, 0.001);
        assert!(matches!(zero_capacity.validate(), Err(CrawlError::Config(_))));

        let bad_rate = CrawlerConfig::default().with_filter_sizing(1_000, 1.5);
        assert!(matches!(bad_rate.validate(), Err(CrawlError::Config(_))));

        let mut no_agents = CrawlerConfig::default();
        no_agents.user_agents.clear();
        assert!(matches!(no_agents.validate(), Err(CrawlError::Config(_))));
    }
}
