//! The autonomous crawl worker.
//!
//! Each worker owns one instance of every component and runs the full
//! pipeline with no central coordinator: pop the frontier, acquire the host
//! lease (or snooze the entry), fetch, extract links, expand the frontier
//! through the URL filter and robots checks, persist the page. All
//! cross-worker coordination happens through the shared store.
//!
//! Nothing bubbles past the per-page boundary. Fetch failures, robots
//! denials, and storage conflicts become stats and log lines; the loop
//! always returns to the frontier. Only startup (store unreachable) and
//! shutdown errors propagate.

pub mod fetcher;

pub use fetcher::{FetchOutcome, PageFetcher, extract_links};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::seq::IndexedRandom;
use redis::aio::ConnectionManager;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::CrawlerConfig;
use crate::error::CrawlResult;
use crate::frontier::{Frontier, FrontierEntry, PoppedEntry};
use crate::politeness::{PolitenessManager, RequeueManager};
use crate::robots::RobotsCache;
use crate::storage::PageStore;
use crate::url_filter::UrlFilter;
use crate::utils::{BLOOM_KEY, IDLE_POLL_SECS, SHUTDOWN_KEY, host_of, score_url};

/// Per-worker counters, logged in the final summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerStats {
    pub pages_crawled: u64,
    pub links_extracted: u64,
    pub links_added: u64,
    pub links_duplicate: u64,
    pub links_robots_blocked: u64,
    pub re_queued: u64,
    pub errors: u64,
    pub timeouts: u64,
}

/// Outcome of one frontier pull.
enum Pull {
    /// Frontier is empty.
    Empty,
    /// Entry was snoozed because its host lease was unavailable.
    Snoozed,
    /// Entry popped and host lease acquired.
    Ready(PoppedEntry),
}

/// One autonomous crawl worker.
pub struct Worker {
    id: String,
    config: CrawlerConfig,
    conn: ConnectionManager,
    frontier: Frontier,
    filter: UrlFilter,
    politeness: PolitenessManager,
    requeue: RequeueManager,
    robots: RobotsCache,
    storage: PageStore,
    fetcher: PageFetcher,
    stats: WorkerStats,
    running: Arc<AtomicBool>,
}

impl Worker {
    /// Validate the configuration, connect to the shared store and the
    /// page store, and build every component. An invalid configuration or
    /// an unreachable store is fatal; the binary exits non-zero.
    pub async fn new(config: CrawlerConfig) -> CrawlResult<Self> {
        config.validate()?;

        let id = config.worker_id.clone().unwrap_or_else(|| {
            let uuid = Uuid::new_v4().simple().to_string();
            format!("worker-{}", &uuid[..8])
        });

        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = ConnectionManager::new(client).await?;

        let frontier = Frontier::new(conn.clone());
        let filter = UrlFilter::new(
            conn.clone(),
            BLOOM_KEY,
            config.filter_capacity,
            config.filter_error_rate,
        )
        .await?;
        let politeness = PolitenessManager::new(conn.clone(), config.default_crawl_delay);
        let requeue = RequeueManager::new(conn.clone(), config.requeue_penalty);

        let robots_agent = config
            .user_agents
            .choose(&mut rand::rng())
            .cloned()
            .unwrap_or_else(|| "crawlhive/0.3".to_string());
        let robots = RobotsCache::new(
            conn.clone(),
            robots_agent,
            config.robots_cache_ttl,
            config.robots_connect_timeout,
            config.robots_timeout,
        )?;

        let storage = PageStore::open(&config.database_path, config.batch_size).await?;
        let fetcher = PageFetcher::new(&config)?;

        info!(worker_id = %id, "worker initialized");

        Ok(Self {
            id,
            config,
            conn,
            frontier,
            filter,
            politeness,
            requeue,
            robots,
            storage,
            fetcher,
            stats: WorkerStats::default(),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Worker identifier (`worker-{8 hex}` unless configured).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Run the crawl loop until the frontier stays empty past the idle
    /// timeout, the page cap is reached, a shutdown is signalled, or an
    /// interrupt arrives. Always flushes the page store on the way out.
    pub async fn run(&mut self) -> CrawlResult<()> {
        if !self.config.seed_urls.is_empty() {
            let seeds = self.config.seed_urls.clone();
            let added = self.frontier.seed(&self.filter, &seeds).await?;
            info!(worker_id = %self.id, added, "seeded frontier");
        }

        self.spawn_signal_listener();

        info!(
            worker_id = %self.id,
            max_pages = ?self.config.max_pages,
            idle_timeout_secs = self.config.idle_timeout.as_secs(),
            "worker starting"
        );

        let mut idle = Duration::ZERO;

        while self.running.load(Ordering::Relaxed) {
            if let Some(max) = self.config.max_pages {
                if self.stats.pages_crawled >= max {
                    info!(worker_id = %self.id, max, "page cap reached");
                    break;
                }
            }

            if self.shutdown_signalled().await {
                info!(worker_id = %self.id, "shutdown signal received");
                break;
            }

            match self.pull_next().await {
                Pull::Empty => {
                    idle += Duration::from_secs(IDLE_POLL_SECS);
                    if idle >= self.config.idle_timeout {
                        info!(
                            worker_id = %self.id,
                            idle_secs = idle.as_secs(),
                            "frontier stayed empty, stopping"
                        );
                        break;
                    }
                    debug!(worker_id = %self.id, "frontier empty, waiting");
                    tokio::time::sleep(Duration::from_secs(IDLE_POLL_SECS)).await;
                }
                Pull::Snoozed => {
                    // Host cooling down; another entry may be ready now.
                }
                Pull::Ready(popped) => {
                    idle = Duration::ZERO;
                    self.crawl_page(&popped.entry).await;
                }
            }
        }

        self.shutdown().await
    }

    /// Pop the top entry and gate it on the host lease. Lease misses put
    /// the exact member back at a demoted priority. Shared-store hiccups
    /// are logged and treated as an empty pull.
    async fn pull_next(&mut self) -> Pull {
        let popped = match self.frontier.pop().await {
            Ok(Some(popped)) => popped,
            Ok(None) => return Pull::Empty,
            Err(error) => {
                error!(worker_id = %self.id, %error, "frontier pop failed");
                return Pull::Empty;
            }
        };

        let url = popped.entry.url.clone();
        let delay = match self.politeness.get_crawl_delay(&url).await {
            Ok(delay) => delay,
            Err(error) => {
                warn!(worker_id = %self.id, %error, "crawl delay lookup failed, using default");
                self.config.default_crawl_delay
            }
        };

        match self.politeness.can_crawl(&url, delay).await {
            Ok(true) => Pull::Ready(popped),
            Ok(false) => {
                if let Err(error) = self.requeue.requeue(&popped.raw, popped.priority).await {
                    error!(worker_id = %self.id, %error, url = %url, "requeue failed, entry lost");
                } else {
                    self.stats.re_queued += 1;
                    debug!(worker_id = %self.id, url = %url, "host busy, entry snoozed");
                }
                Pull::Snoozed
            }
            Err(error) => {
                error!(worker_id = %self.id, %error, url = %url, "lease acquisition failed");
                Pull::Snoozed
            }
        }
    }

    /// Full pipeline for one page. Absorbs every failure into stats.
    async fn crawl_page(&mut self, entry: &FrontierEntry) {
        let url = &entry.url;
        info!(worker_id = %self.id, url = %url, depth = entry.depth, "crawling");

        let html = match self.fetcher.fetch(url).await {
            FetchOutcome::Html(html) => html,
            FetchOutcome::NonHtml => {
                self.stats.errors += 1;
                return;
            }
            FetchOutcome::Timeout => {
                self.stats.timeouts += 1;
                return;
            }
            FetchOutcome::Failed => {
                self.stats.errors += 1;
                return;
            }
        };

        let links = extract_links(&html, url);
        self.stats.links_extracted += links.len() as u64;

        self.process_links(&links, url, entry.depth).await;

        let domain = host_of(url).unwrap_or_else(|| "unknown".to_string());
        match self
            .storage
            .add_page(url, &html, &links, &domain, entry.depth, &self.id)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(worker_id = %self.id, url = %url, "page content already stored"),
            Err(error) => {
                warn!(worker_id = %self.id, %error, url = %url, "page persist failed");
                self.stats.errors += 1;
            }
        }

        self.stats.pages_crawled += 1;
        info!(
            worker_id = %self.id,
            url = %url,
            links = links.len(),
            "crawled"
        );
    }

    /// Expand the frontier with newly discovered links: filter out seen
    /// URLs, batch-check robots for the rest, and push what survives.
    async fn process_links(&mut self, links: &[String], parent: &str, depth: u32) {
        if links.is_empty() {
            return;
        }

        let mut new_links: Vec<String> = Vec::new();
        for link in links {
            match self.filter.contains(link).await {
                Ok(true) => self.stats.links_duplicate += 1,
                Ok(false) => {
                    if !new_links.contains(link) {
                        new_links.push(link.clone());
                    }
                }
                Err(error) => {
                    warn!(worker_id = %self.id, %error, "filter lookup failed, link skipped");
                }
            }
        }
        if new_links.is_empty() {
            return;
        }

        let decisions = match self.robots.can_fetch_batch(&new_links).await {
            Ok(decisions) => decisions,
            Err(error) => {
                // Robots failures never block a link, matching the
                // fetch-side allow-all rule.
                warn!(worker_id = %self.id, %error, "robots batch check failed, allowing links");
                Default::default()
            }
        };

        for link in &new_links {
            if !decisions.get(link).copied().unwrap_or(true) {
                self.stats.links_robots_blocked += 1;
                debug!(worker_id = %self.id, url = %link, "link blocked by robots.txt");
                continue;
            }

            if let Err(error) = self.filter.add(link).await {
                warn!(worker_id = %self.id, %error, "filter add failed, link skipped");
                continue;
            }

            let child_depth = depth + 1;
            let priority = score_url(link, child_depth);
            let entry = FrontierEntry::new(link.clone(), parent, child_depth);
            match self.frontier.push(&entry, priority).await {
                Ok(()) => self.stats.links_added += 1,
                Err(error) => {
                    warn!(worker_id = %self.id, %error, url = %link, "frontier push failed");
                }
            }
        }
    }

    /// Check the fleet-wide shutdown key. Store errors read as "no".
    async fn shutdown_signalled(&self) -> bool {
        let mut conn = self.conn.clone();
        let signalled: Result<bool, redis::RedisError> = redis::cmd("EXISTS")
            .arg(SHUTDOWN_KEY)
            .query_async(&mut conn)
            .await;
        match signalled {
            Ok(signalled) => signalled,
            Err(error) => {
                warn!(worker_id = %self.id, %error, "shutdown flag check failed");
                false
            }
        }
    }

    /// Flip the running flag on SIGINT/SIGTERM so the loop stops after the
    /// page in flight.
    fn spawn_signal_listener(&self) {
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            if wait_for_shutdown_signal().await {
                info!("interrupt received, finishing current page");
                running.store(false, Ordering::Relaxed);
            }
        });
    }

    /// Flush storage, close pools, and log the final summary.
    async fn shutdown(&mut self) -> CrawlResult<()> {
        info!(worker_id = %self.id, "shutting down");

        self.storage.flush_batch().await?;
        let storage_stats = self.storage.get_stats();
        self.storage.close().await?;

        info!(
            worker_id = %self.id,
            pages_crawled = self.stats.pages_crawled,
            links_extracted = self.stats.links_extracted,
            links_added = self.stats.links_added,
            links_duplicate = self.stats.links_duplicate,
            links_robots_blocked = self.stats.links_robots_blocked,
            re_queued = self.stats.re_queued,
            errors = self.stats.errors,
            timeouts = self.stats.timeouts,
            "final worker statistics"
        );
        if storage_stats.pages_stored > 0 {
            info!(
                worker_id = %self.id,
                pages_stored = storage_stats.pages_stored,
                saved_pct = %format!("{:.1}", (1.0 - storage_stats.compression_ratio) * 100.0),
                saved_mb = %format!(
                    "{:.1}",
                    (storage_stats.bytes_original - storage_stats.bytes_compressed) as f64
                        / 1024.0
                        / 1024.0
                ),
                "final storage statistics"
            );
        }

        info!(worker_id = %self.id, "worker stopped");
        Ok(())
    }
}

/// Resolve when SIGINT (or SIGTERM on unix) arrives. Returns `false` only
/// if signal registration itself failed.
async fn wait_for_shutdown_signal() -> bool {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(error) => {
                warn!(%error, "SIGTERM handler registration failed");
                return tokio::signal::ctrl_c().await.is_ok();
            }
        };
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.is_ok(),
            _ = term.recv() => true,
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_start_at_zero() {
        let stats = WorkerStats::default();
        assert_eq!(stats, WorkerStats {
            pages_crawled: 0,
            links_extracted: 0,
            links_added: 0,
            links_duplicate: 0,
            links_robots_blocked: 0,
            re_queued: 0,
            errors: 0,
            timeouts: 0,
        });
    }
}
