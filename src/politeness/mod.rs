//! Distributed per-host politeness.
//!
//! Every worker self-regulates through short-lived leases in the shared
//! store: one atomic SET-NX-EX per fetch attempt, keyed by the page's
//! origin. Holding the key means "some worker recently fetched this host";
//! the TTL equals the host's crawl delay, and expiry is the only release.
//! No coordinator, no explicit unlock.
//!
//! A worker that loses the race snoozes the frontier entry instead of
//! waiting: the entry goes back at a reduced priority and the worker moves
//! on to another host.

use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use crate::error::CrawlResult;
use crate::utils::{FRONTIER_KEY, ROBOTS_DELAY_TTL_SECS, host_of, origin_of};

/// Lease TTL for a crawl delay: rounded up to whole seconds, minimum 1.
fn lease_ttl_secs(delay_s: f64) -> u64 {
    (delay_s.ceil() as i64).max(1) as u64
}

/// Priority after a snooze, clamped so entries are demoted but never lost.
fn demoted_priority(current: f64, penalty: f64) -> f64 {
    (current - penalty).max(1.0)
}

/// Per-host lease acquisition and crawl-delay resolution.
pub struct PolitenessManager {
    conn: ConnectionManager,
    default_delay: f64,
}

impl PolitenessManager {
    pub fn new(conn: ConnectionManager, default_delay: f64) -> Self {
        Self {
            conn,
            default_delay,
        }
    }

    fn lock_key(url: &str) -> String {
        let origin = origin_of(url).unwrap_or_else(|| "unknown".to_string());
        format!("lock:{origin}")
    }

    /// Try to acquire the host lease for `url`.
    ///
    /// Returns `true` if the lease was acquired and the caller may fetch;
    /// `false` if the host is cooling down. The lease expires on its own
    /// after `delay_s` (rounded up, minimum 1 s); nothing deletes it on the
    /// success path.
    pub async fn can_crawl(&self, url: &str, delay_s: f64) -> CrawlResult<bool> {
        let key = Self::lock_key(url);
        let ttl = lease_ttl_secs(delay_s);
        let mut conn = self.conn.clone();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl)
            .query_async(&mut conn)
            .await?;

        if acquired.is_some() {
            debug!(key = %key, ttl, "host lease acquired");
            Ok(true)
        } else {
            debug!(key = %key, "host lease unavailable");
            Ok(false)
        }
    }

    /// Resolve the crawl delay for a URL's host.
    ///
    /// Order: the robots-derived `crawler:robots:delay:{host}` key, then the
    /// `crawler:domain_state:{host}` hash, then the configured default.
    pub async fn get_crawl_delay(&self, url: &str) -> CrawlResult<f64> {
        let Some(host) = host_of(url) else {
            return Ok(self.default_delay);
        };
        let mut conn = self.conn.clone();

        let cached: Option<String> = redis::cmd("GET")
            .arg(format!("crawler:robots:delay:{host}"))
            .query_async(&mut conn)
            .await?;
        if let Some(delay) = cached.and_then(|v| v.parse().ok()) {
            return Ok(delay);
        }

        let state: Option<String> = redis::cmd("HGET")
            .arg(format!("crawler:domain_state:{host}"))
            .arg("crawl_delay")
            .query_async(&mut conn)
            .await?;
        if let Some(delay) = state.and_then(|v| v.parse().ok()) {
            return Ok(delay);
        }

        Ok(self.default_delay)
    }

    /// Record a crawl delay for a URL's host, in both the domain state hash
    /// and the TTL-bounded robots delay key.
    pub async fn set_crawl_delay(&self, url: &str, delay: f64) -> CrawlResult<()> {
        let Some(host) = host_of(url) else {
            return Ok(());
        };
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .cmd("HSET")
            .arg(format!("crawler:domain_state:{host}"))
            .arg("crawl_delay")
            .arg(delay)
            .ignore()
            .cmd("SETEX")
            .arg(format!("crawler:robots:delay:{host}"))
            .arg(ROBOTS_DELAY_TTL_SECS)
            .arg(delay)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(host = %host, delay, "crawl delay recorded");
        Ok(())
    }

    /// Remaining seconds on a host lease, or `None` if the host is free.
    /// Monitor/debug surface.
    pub async fn lock_ttl(&self, url: &str) -> CrawlResult<Option<i64>> {
        let mut conn = self.conn.clone();
        let ttl: i64 = redis::cmd("TTL")
            .arg(Self::lock_key(url))
            .query_async(&mut conn)
            .await?;
        Ok((ttl > 0).then_some(ttl))
    }

    /// Delete a host lease ahead of its expiry. Operational tooling only;
    /// the worker never calls this.
    pub async fn force_release(&self, url: &str) -> CrawlResult<()> {
        let key = Self::lock_key(url);
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL").arg(&key).query_async(&mut conn).await?;
        warn!(key = %key, "host lease force released");
        Ok(())
    }
}

/// Snooze helper: re-inserts a frontier entry that lost its host lease.
pub struct RequeueManager {
    conn: ConnectionManager,
    penalty: f64,
}

impl RequeueManager {
    pub fn new(conn: ConnectionManager, penalty: f64) -> Self {
        Self { conn, penalty }
    }

    /// Push the exact popped member back into the frontier at a demoted
    /// priority. Returns the new priority.
    pub async fn requeue(&self, raw_entry: &str, current_priority: f64) -> CrawlResult<f64> {
        let new_priority = demoted_priority(current_priority, self.penalty);
        let mut conn = self.conn.clone();

        let _: () = redis::cmd("ZADD")
            .arg(FRONTIER_KEY)
            .arg(new_priority)
            .arg(raw_entry)
            .query_async(&mut conn)
            .await?;

        debug!(
            from = current_priority,
            to = new_priority,
            "frontier entry snoozed"
        );
        Ok(new_priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_ttl_rounds_up_with_floor_of_one() {
        assert_eq!(lease_ttl_secs(0.0), 1);
        assert_eq!(lease_ttl_secs(0.2), 1);
        assert_eq!(lease_ttl_secs(1.0), 1);
        assert_eq!(lease_ttl_secs(1.1), 2);
        assert_eq!(lease_ttl_secs(2.0), 2);
        assert_eq!(lease_ttl_secs(-3.0), 1);
    }

    #[test]
    fn demotion_subtracts_penalty_and_clamps() {
        assert_eq!(demoted_priority(99.0, 5.0), 94.0);
        assert_eq!(demoted_priority(4.0, 5.0), 1.0);
        assert_eq!(demoted_priority(1.0, 5.0), 1.0);
    }

    #[test]
    fn lock_keys_carry_scheme_and_host() {
        assert_eq!(
            PolitenessManager::lock_key("https://example.com/a/b"),
            "lock:https://example.com"
        );
        assert_eq!(
            PolitenessManager::lock_key("http://example.com:8080/x"),
            "lock:http://example.com:8080"
        );
        assert_eq!(PolitenessManager::lock_key("garbage"), "lock:unknown");
    }
}
