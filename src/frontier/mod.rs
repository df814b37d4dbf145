//! Shared priority frontier.
//!
//! A sorted set in the shared store maps opaque serialized entries to a
//! float priority; higher scores pop first. Pop is a single atomic ZPOPMAX,
//! which is the only cross-worker coordination the frontier needs. Entries
//! are not deduplicated here (the URL filter owns that), so a URL may
//! briefly appear twice; the durable store's unique index absorbs it.

use chrono::Utc;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::CrawlResult;
use crate::url_filter::UrlFilter;
use crate::utils::{FRONTIER_KEY, SEED_PRIORITY};

/// One discovered-but-not-fetched URL.
///
/// Serialized as canonical JSON in this field order; the sorted set member
/// is the exact byte string, and equality across workers is byte equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub url: String,
    pub parent: String,
    pub depth: u32,
    pub added_at: f64,
}

impl FrontierEntry {
    /// Entry for a link discovered on `parent` at `depth`.
    #[must_use]
    pub fn new(url: impl Into<String>, parent: impl Into<String>, depth: u32) -> Self {
        Self {
            url: url.into(),
            parent: parent.into(),
            depth,
            added_at: now_secs(),
        }
    }

    /// Entry for a seed URL: no parent, depth zero.
    #[must_use]
    pub fn seed(url: impl Into<String>) -> Self {
        Self::new(url, "", 0)
    }
}

/// A popped frontier entry.
///
/// `raw` is the exact member string removed from the sorted set; a snooze
/// requeue must re-insert those bytes, not a re-serialization.
#[derive(Debug, Clone)]
pub struct PoppedEntry {
    pub raw: String,
    pub entry: FrontierEntry,
    pub priority: f64,
}

/// Handle to the shared frontier sorted set.
pub struct Frontier {
    conn: ConnectionManager,
}

impl Frontier {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Insert an entry at the given priority.
    pub async fn push(&self, entry: &FrontierEntry, priority: f64) -> CrawlResult<()> {
        let member = serde_json::to_string(entry)?;
        let mut conn = self.conn.clone();

        let _: () = redis::cmd("ZADD")
            .arg(FRONTIER_KEY)
            .arg(priority)
            .arg(member)
            .query_async(&mut conn)
            .await?;

        debug!(url = %entry.url, priority, depth = entry.depth, "frontier push");
        Ok(())
    }

    /// Atomically remove and return the highest-priority entry.
    ///
    /// Returns `None` when the frontier is empty. A member that fails to
    /// deserialize is dropped with a warning rather than wedging the queue.
    pub async fn pop(&self) -> CrawlResult<Option<PoppedEntry>> {
        let mut conn = self.conn.clone();
        let popped: Vec<(String, f64)> = redis::cmd("ZPOPMAX")
            .arg(FRONTIER_KEY)
            .arg(1)
            .query_async(&mut conn)
            .await?;

        let Some((raw, priority)) = popped.into_iter().next() else {
            return Ok(None);
        };

        match serde_json::from_str::<FrontierEntry>(&raw) {
            Ok(entry) => Ok(Some(PoppedEntry {
                raw,
                entry,
                priority,
            })),
            Err(error) => {
                warn!(%error, member = %raw, "dropping malformed frontier entry");
                Ok(None)
            }
        }
    }

    /// Number of entries currently queued.
    pub async fn size(&self) -> CrawlResult<u64> {
        let mut conn = self.conn.clone();
        let size: u64 = redis::cmd("ZCARD")
            .arg(FRONTIER_KEY)
            .query_async(&mut conn)
            .await?;
        Ok(size)
    }

    /// Seed URLs into the frontier at the seed priority, recording each in
    /// the URL filter. Already-seen URLs are skipped. Returns the number
    /// actually seeded.
    pub async fn seed(&self, filter: &UrlFilter, urls: &[String]) -> CrawlResult<usize> {
        let mut added = 0;
        for url in urls {
            if filter.contains(url).await? {
                debug!(url = %url, "seed already seen, skipped");
                continue;
            }
            filter.add(url).await?;
            self.push(&FrontierEntry::seed(url.clone()), SEED_PRIORITY).await?;
            added += 1;
            info!(url = %url, "seeded");
        }
        Ok(added)
    }
}

fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
