//! robots.txt retrieval, caching, and permission checks.
//!
//! Two cache tiers sit in front of the network: a per-worker in-process map
//! and the shared `robots_cache:{host}` hashes. Hosts missing from both are
//! fetched concurrently, one task per host, so a batch of a few dozen hosts
//! resolves in seconds instead of minutes. `https` is tried first, then
//! `http`; 404/403 and every failure mode mean "no robots.txt, allow all".
//!
//! The in-process cache is local to one worker and single-threaded; only
//! the shared tier is visible fleet-wide.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures::future::join_all;
use redis::aio::ConnectionManager;
use reqwest::StatusCode;
use robotstxt::DefaultMatcher;
use tracing::{debug, info, warn};

use crate::error::CrawlResult;
use crate::utils::{ROBOTS_DELAY_TTL_SECS, host_of};

/// Outcome of fetching one host's robots.txt.
#[derive(Debug, Clone)]
pub struct FetchedRobots {
    /// Raw file content; `None` means no robots.txt (allow all).
    pub content: Option<String>,
    /// First valid `Crawl-delay:` value, if any.
    pub crawl_delay: Option<f64>,
}

struct CachedRobots {
    content: Option<String>,
    fetched_at: Instant,
}

/// Two-tier robots.txt cache with a parallel batch fetcher.
pub struct RobotsCache {
    conn: ConnectionManager,
    client: reqwest::Client,
    user_agent: String,
    cache_ttl: Duration,
    local: HashMap<String, CachedRobots>,
}

impl RobotsCache {
    /// Build a cache with its own tightly-bounded HTTP client
    /// (connect and total timeouts are per robots request).
    pub fn new(
        conn: ConnectionManager,
        user_agent: impl Into<String>,
        cache_ttl: Duration,
        connect_timeout: Duration,
        total_timeout: Duration,
    ) -> CrawlResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(total_timeout)
            .build()?;

        Ok(Self {
            conn,
            client,
            user_agent: user_agent.into(),
            cache_ttl,
            local: HashMap::new(),
        })
    }

    /// Decide, for every input URL, whether robots rules permit fetching it.
    ///
    /// URLs are grouped by host; unknown hosts are resolved through the
    /// cache tiers and then fetched concurrently. A URL whose host cannot
    /// be determined is allowed.
    pub async fn can_fetch_batch(&mut self, urls: &[String]) -> CrawlResult<HashMap<String, bool>> {
        if urls.is_empty() {
            return Ok(HashMap::new());
        }

        let mut hosts: Vec<String> = Vec::new();
        for url in urls {
            if let Some(host) = host_of(url) {
                if !hosts.contains(&host) {
                    hosts.push(host);
                }
            }
        }

        self.resolve_hosts(&hosts).await?;

        let mut decisions = HashMap::with_capacity(urls.len());
        for url in urls {
            let allowed = match host_of(url).and_then(|host| self.local.get(&host)) {
                Some(cached) => allowed_by(cached.content.as_deref(), &self.user_agent, url),
                None => true,
            };
            decisions.insert(url.clone(), allowed);
        }

        Ok(decisions)
    }

    /// Make sure every host has a fresh in-process cache entry, consulting
    /// the shared tier and then the network.
    async fn resolve_hosts(&mut self, hosts: &[String]) -> CrawlResult<()> {
        let mut to_fetch: Vec<String> = Vec::new();

        for host in hosts {
            if let Some(cached) = self.local.get(host) {
                if cached.fetched_at.elapsed() < self.cache_ttl {
                    continue;
                }
            }

            if let Some(content) = self.shared_lookup(host).await? {
                self.local.insert(
                    host.clone(),
                    CachedRobots {
                        content: Some(content),
                        fetched_at: Instant::now(),
                    },
                );
                continue;
            }

            to_fetch.push(host.clone());
        }

        if to_fetch.is_empty() {
            return Ok(());
        }

        info!(hosts = to_fetch.len(), "fetching robots.txt in parallel");
        let started = Instant::now();

        let fetches = to_fetch.iter().map(|host| {
            let client = self.client.clone();
            let user_agent = self.user_agent.clone();
            let host = host.clone();
            async move {
                let fetched = fetch_for_host(&client, &user_agent, &host).await;
                (host, fetched)
            }
        });
        let results = join_all(fetches).await;

        for (host, fetched) in results {
            if fetched.content.is_some() || fetched.crawl_delay.is_some() {
                self.persist(&host, &fetched).await?;
            }
            self.local.insert(
                host,
                CachedRobots {
                    content: fetched.content,
                    fetched_at: Instant::now(),
                },
            );
        }

        debug!(
            hosts = to_fetch.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "robots.txt batch fetched"
        );
        Ok(())
    }

    /// Shared-tier lookup: the `content` field of `robots_cache:{host}`.
    async fn shared_lookup(&self, host: &str) -> CrawlResult<Option<String>> {
        let mut conn = self.conn.clone();
        let cached: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(format!("robots_cache:{host}"))
            .query_async(&mut conn)
            .await?;
        Ok(cached.get("content").cloned())
    }

    /// Write fetched content and crawl delay into the shared tier.
    async fn persist(&self, host: &str, fetched: &FetchedRobots) -> CrawlResult<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();

        if let Some(content) = &fetched.content {
            let cache_key = format!("robots_cache:{host}");
            pipe.cmd("HSET")
                .arg(&cache_key)
                .arg("content")
                .arg(content)
                .arg("fetched_at")
                .arg(chrono::Utc::now().timestamp())
                .ignore()
                .cmd("EXPIRE")
                .arg(&cache_key)
                .arg(self.cache_ttl.as_secs())
                .ignore();
        }

        if let Some(delay) = fetched.crawl_delay {
            pipe.cmd("SETEX")
                .arg(format!("crawler:robots:delay:{host}"))
                .arg(ROBOTS_DELAY_TTL_SECS)
                .arg(delay)
                .ignore()
                .cmd("HSET")
                .arg(format!("crawler:domain_state:{host}"))
                .arg("crawl_delay")
                .arg(delay)
                .ignore();
        }

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}

/// Check one URL against robots content. Missing or empty content allows
/// everything.
fn allowed_by(content: Option<&str>, user_agent: &str, url: &str) -> bool {
    match content {
        Some(body) => DefaultMatcher::default().one_agent_allowed_by_robots(body, user_agent, url),
        None => true,
    }
}

/// Fetch robots.txt for a single host: https first, then http, each within
/// the client's timeouts. 404/403 and all errors collapse to allow-all.
pub async fn fetch_for_host(client: &reqwest::Client, user_agent: &str, host: &str) -> FetchedRobots {
    for scheme in ["https", "http"] {
        let robots_url = format!("{scheme}://{host}/robots.txt");

        let response = match client
            .get(&robots_url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                debug!(host = %host, scheme, %error, "robots.txt fetch failed");
                continue;
            }
        };

        match response.status() {
            StatusCode::OK => match response.text().await {
                Ok(content) => {
                    let crawl_delay = extract_crawl_delay(&content);
                    debug!(host = %host, scheme, ?crawl_delay, "robots.txt fetched");
                    return FetchedRobots {
                        content: Some(content),
                        crawl_delay,
                    };
                }
                Err(error) => {
                    warn!(host = %host, %error, "robots.txt body read failed");
                    continue;
                }
            },
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => {
                debug!(host = %host, status = %response.status(), "no robots.txt");
                return FetchedRobots {
                    content: None,
                    crawl_delay: None,
                };
            }
            status => {
                debug!(host = %host, %status, "unexpected robots.txt status");
                continue;
            }
        }
    }

    FetchedRobots {
        content: None,
        crawl_delay: None,
    }
}

/// First valid `Crawl-delay:` float in a robots.txt body.
fn extract_crawl_delay(content: &str) -> Option<f64> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim().to_ascii_lowercase();
            line.strip_prefix("crawl-delay:")
                .and_then(|rest| rest.trim().parse::<f64>().ok())
        })
        .next()
}
