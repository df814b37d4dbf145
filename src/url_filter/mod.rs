//! Approximate URL membership over a shared bitmap.
//!
//! A bloom-style filter whose bits live in a Redis bitmap, shared by every
//! worker in the fleet. Memory for 10M URLs is ~17 MB versus ~800 MB for an
//! exact set; the price is a tunable false-positive rate and no deletion,
//! both acceptable for crawl dedup.
//!
//! `add` runs two pipelined rounds (GETBIT probe, then SETBIT). The rounds
//! are not atomic across workers, so the returned "probably new" flag is
//! best-effort; callers must tolerate the occasional duplicate frontier
//! insertion. The durable store's unique URL index is the backstop.

use std::collections::HashMap;
use std::f64::consts::LN_2;
use std::io::Cursor;

use murmur3::murmur3_32;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use crate::error::CrawlResult;

/// Filter sizing and identity, as mirrored in the `{key}:info` hash.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterStats {
    pub size_bits: u64,
    pub size_mb: f64,
    pub hash_count: u32,
    pub capacity: u64,
    pub error_rate: f64,
}

/// Shared approximate URL filter.
pub struct UrlFilter {
    conn: ConnectionManager,
    key: String,
    info_key: String,
    size: u64,
    hash_count: u32,
    capacity: u64,
    error_rate: f64,
}

/// Optimal bitmap size and hash count for a target capacity and error rate.
///
/// m = ceil(-n * ln(p) / ln(2)^2), k = ceil((m / n) * ln(2)).
fn optimal_params(capacity: u64, error_rate: f64) -> (u64, u32) {
    let n = capacity.max(1) as f64;
    let m = (-(n * error_rate.ln()) / LN_2.powi(2)).ceil();
    let k = ((m / n) * LN_2).ceil();
    (m.max(1.0) as u64, k.max(1.0) as u32)
}

impl UrlFilter {
    /// Create a filter over the bitmap at `key`, sized for `capacity` URLs
    /// at `error_rate`, and mirror the sizing into `{key}:info`.
    pub async fn new(
        conn: ConnectionManager,
        key: impl Into<String>,
        capacity: u64,
        error_rate: f64,
    ) -> CrawlResult<Self> {
        let key = key.into();
        let info_key = format!("{key}:info");
        let (size, hash_count) = optimal_params(capacity, error_rate);

        let mut filter = Self {
            conn,
            key,
            info_key,
            size,
            hash_count,
            capacity,
            error_rate,
        };

        let _: () = redis::cmd("HSET")
            .arg(&filter.info_key)
            .arg("size")
            .arg(size)
            .arg("hash_count")
            .arg(hash_count)
            .arg("capacity")
            .arg(capacity)
            .arg("error_rate")
            .arg(error_rate.to_string())
            .query_async(&mut filter.conn)
            .await?;

        info!(
            size_bits = size,
            hash_count,
            capacity,
            error_rate,
            "url filter initialized"
        );

        Ok(filter)
    }

    /// Bit positions for a URL: `hash_count` seeded MurmurHash3-32 digests
    /// mod the bitmap size.
    fn positions(&self, url: &str) -> Vec<u64> {
        (0..self.hash_count)
            .map(|seed| {
                let hash = murmur3_32(&mut Cursor::new(url.as_bytes()), seed).unwrap_or_default();
                u64::from(hash) % self.size
            })
            .collect()
    }

    /// Record a URL. Returns `true` if it was probably unseen.
    ///
    /// The probe and the write are separate pipelines, so the flag can
    /// spuriously report "new" under concurrent adds of the same URL.
    pub async fn add(&self, url: &str) -> CrawlResult<bool> {
        let positions = self.positions(url);
        let mut conn = self.conn.clone();

        let mut probe = redis::pipe();
        for &pos in &positions {
            probe.cmd("GETBIT").arg(&self.key).arg(pos);
        }
        let bits: Vec<bool> = probe.query_async(&mut conn).await?;
        let already_present = bits.iter().all(|set| *set);

        let mut write = redis::pipe();
        for &pos in &positions {
            write.cmd("SETBIT").arg(&self.key).arg(pos).arg(1).ignore();
        }
        let _: () = write.query_async(&mut conn).await?;

        Ok(!already_present)
    }

    /// Check whether a URL was probably seen before.
    ///
    /// `false` is definitive; `true` may be a false positive at roughly the
    /// configured error rate.
    pub async fn contains(&self, url: &str) -> CrawlResult<bool> {
        let positions = self.positions(url);
        let mut conn = self.conn.clone();

        let mut probe = redis::pipe();
        for &pos in &positions {
            probe.cmd("GETBIT").arg(&self.key).arg(pos);
        }
        let bits: Vec<bool> = probe.query_async(&mut conn).await?;

        Ok(bits.iter().all(|set| *set))
    }

    /// Record many URLs in one pipelined round. Returns the input count.
    pub async fn add_batch(&self, urls: &[String]) -> CrawlResult<usize> {
        if urls.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.clone();
        let mut write = redis::pipe();
        for url in urls {
            for pos in self.positions(url) {
                write.cmd("SETBIT").arg(&self.key).arg(pos).arg(1).ignore();
            }
        }
        let _: () = write.query_async(&mut conn).await?;

        debug!(count = urls.len(), "urls added to filter in batch");
        Ok(urls.len())
    }

    /// Read the filter's sizing metadata from the shared store.
    pub async fn stats(&self) -> CrawlResult<FilterStats> {
        let mut conn = self.conn.clone();
        let info: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&self.info_key)
            .query_async(&mut conn)
            .await?;

        fn field<T: std::str::FromStr>(info: &HashMap<String, String>, name: &str) -> Option<T> {
            info.get(name).and_then(|value| value.parse().ok())
        }

        let size_bits = field(&info, "size").unwrap_or(self.size);

        Ok(FilterStats {
            size_bits,
            size_mb: size_bits as f64 / 8.0 / 1024.0 / 1024.0,
            hash_count: field(&info, "hash_count").unwrap_or(self.hash_count),
            capacity: field(&info, "capacity").unwrap_or(self.capacity),
            error_rate: field(&info, "error_rate").unwrap_or(self.error_rate),
        })
    }

    /// Delete the bitmap and its metadata. Admin/reset surface; never
    /// called during a crawl.
    pub async fn clear(&self) -> CrawlResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(&self.key)
            .arg(&self.info_key)
            .query_async(&mut conn)
            .await?;
        info!(key = %self.key, "url filter cleared");
        Ok(())
    }

    /// Number of hash functions in use.
    #[must_use]
    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    /// Bitmap size in bits.
    #[must_use]
    pub fn size_bits(&self) -> u64 {
        self.size
    }
}
