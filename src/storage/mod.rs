//! Batched, deduplicated, compressed page persistence.
//!
//! Pages are split across two tables: `pages_metadata` (small rows for fast
//! queries) and `pages_content` (zlib-compressed HTML plus the full link
//! list). Writes are buffered and flushed in batches; content bodies are
//! deduplicated by SHA-256 before buffering, and the unique URL index is
//! the last line of defense against concurrent workers persisting the same
//! page.
//!
//! The flush is the subtle part. Metadata rows go first, each as
//! `INSERT OR IGNORE` inside one transaction; the per-row change count
//! yields the exact set of ids that actually landed. Content rows are then
//! filtered to that set, which keeps the two tables in lock-step without
//! any server-side transaction spanning workers. Buffers are cleared even
//! when the flush fails, to bound memory; the failure is logged and the
//! batch is lost.

use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::CrawlResult;

/// SQL schema for the page store.
const SCHEMA_SQL: &str = r#"
-- Small rows for fast queries; content lives in pages_content.
CREATE TABLE IF NOT EXISTS pages_metadata (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    domain TEXT NOT NULL,
    depth INTEGER NOT NULL,
    link_count INTEGER NOT NULL,
    links_preview TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    content_size INTEGER NOT NULL,
    compressed_size INTEGER NOT NULL,
    compression_ratio REAL NOT NULL,
    worker_id TEXT NOT NULL,
    crawled_at INTEGER NOT NULL
);

-- The unique url index doubles as the concurrent-duplicate backstop.
CREATE UNIQUE INDEX IF NOT EXISTS idx_metadata_url ON pages_metadata(url);
CREATE INDEX IF NOT EXISTS idx_metadata_domain ON pages_metadata(domain);
CREATE INDEX IF NOT EXISTS idx_metadata_crawled_at ON pages_metadata(crawled_at);
CREATE INDEX IF NOT EXISTS idx_metadata_content_hash ON pages_metadata(content_hash);
CREATE INDEX IF NOT EXISTS idx_metadata_domain_crawled
    ON pages_metadata(domain ASC, crawled_at DESC);

-- Compressed HTML and the full ordered link list.
CREATE TABLE IF NOT EXISTS pages_content (
    page_id TEXT NOT NULL,
    compressed_html BLOB NOT NULL,
    all_links TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_content_page_id ON pages_content(page_id);
"#;

/// How many links each metadata row previews.
const LINKS_PREVIEW_LEN: usize = 100;

/// One buffered metadata row.
#[derive(Debug, Clone)]
pub struct PageMetadata {
    pub id: String,
    pub url: String,
    pub domain: String,
    pub depth: u32,
    pub link_count: u64,
    pub links_preview: Vec<String>,
    pub content_hash: String,
    pub content_size: u64,
    pub compressed_size: u64,
    pub compression_ratio: f64,
    pub worker_id: String,
    pub crawled_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct PageContentRow {
    page_id: String,
    compressed_html: Vec<u8>,
    all_links: Vec<String>,
}

/// A retrieved page with its HTML decompressed.
#[derive(Debug, Clone)]
pub struct StoredPage {
    pub url: String,
    pub domain: String,
    pub depth: u32,
    pub html: String,
    pub links: Vec<String>,
    pub crawled_at: DateTime<Utc>,
}

/// In-memory write statistics, as returned by [`PageStore::get_stats`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageStats {
    pub pages_stored: u64,
    pub bytes_original: u64,
    pub bytes_compressed: u64,
    pub compression_ratio: f64,
    pub batches_flushed: u64,
    pub pending_in_batch: usize,
}

/// Aggregate statistics for one domain.
#[derive(Debug, Clone, Default)]
pub struct DomainStats {
    pub total_pages: u64,
    pub total_links: u64,
    pub total_size: u64,
    pub total_compressed: u64,
    pub compression_ratio: f64,
    pub first_crawl: Option<DateTime<Utc>>,
    pub last_crawl: Option<DateTime<Utc>>,
}

/// SHA-256 of the UTF-8 HTML, lowercase hex. The content dedup key.
#[must_use]
pub fn content_hash(html: &str) -> String {
    hex::encode(Sha256::digest(html.as_bytes()))
}

/// zlib-compress HTML at level 6.
pub fn compress_html(html: &str) -> CrawlResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(6));
    encoder.write_all(html.as_bytes())?;
    Ok(encoder.finish()?)
}

/// Inverse of [`compress_html`].
pub fn decompress_html(compressed: &[u8]) -> CrawlResult<String> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(String::from_utf8(buf)?)
}

/// Buffered, deduplicating page writer over SQLite.
pub struct PageStore {
    pool: SqlitePool,
    batch_size: usize,
    metadata_batch: Vec<PageMetadata>,
    content_batch: Vec<PageContentRow>,
    pages_stored: u64,
    bytes_original: u64,
    bytes_compressed: u64,
    batches_flushed: u64,
}

impl PageStore {
    /// Open (or create) the store at `path` and ensure the schema and
    /// indexes exist.
    pub async fn open(path: &Path, batch_size: usize) -> CrawlResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        info!(path = %path.display(), batch_size, "page store opened");

        Ok(Self {
            pool,
            batch_size: batch_size.max(1),
            metadata_batch: Vec::new(),
            content_batch: Vec::new(),
            pages_stored: 0,
            bytes_original: 0,
            bytes_compressed: 0,
            batches_flushed: 0,
        })
    }

    /// Buffer one page for persistence.
    ///
    /// Returns `false` when a page with the same content hash is already
    /// stored (the page is skipped). Triggers a flush once the buffer
    /// reaches the batch size.
    pub async fn add_page(
        &mut self,
        url: &str,
        html: &str,
        links: &[String],
        domain: &str,
        depth: u32,
        worker_id: &str,
    ) -> CrawlResult<bool> {
        let hash = content_hash(html);

        let duplicate = sqlx::query("SELECT 1 FROM pages_metadata WHERE content_hash = ? LIMIT 1")
            .bind(&hash)
            .fetch_optional(&self.pool)
            .await?;
        if duplicate.is_some() {
            debug!(url = %url, "duplicate content skipped");
            return Ok(false);
        }

        let page_id = Uuid::new_v4().to_string();
        let compressed = compress_html(html)?;
        let original_size = html.len() as u64;
        let compressed_size = compressed.len() as u64;

        self.bytes_original += original_size;
        self.bytes_compressed += compressed_size;

        self.metadata_batch.push(PageMetadata {
            id: page_id.clone(),
            url: url.to_string(),
            domain: domain.to_string(),
            depth,
            link_count: links.len() as u64,
            links_preview: links.iter().take(LINKS_PREVIEW_LEN).cloned().collect(),
            content_hash: hash,
            content_size: original_size,
            compressed_size,
            compression_ratio: if original_size > 0 {
                compressed_size as f64 / original_size as f64
            } else {
                0.0
            },
            worker_id: worker_id.to_string(),
            crawled_at: Utc::now(),
        });
        self.content_batch.push(PageContentRow {
            page_id,
            compressed_html: compressed,
            all_links: links.to_vec(),
        });

        if self.metadata_batch.len() >= self.batch_size {
            self.flush_batch().await?;
        }

        Ok(true)
    }

    /// Flush buffered pages: metadata first (duplicates ignored), then the
    /// content rows whose metadata actually landed.
    ///
    /// Buffers are cleared unconditionally; a failed flush is logged and
    /// absorbed rather than propagated, so a poisoned batch cannot grow
    /// the buffers without bound.
    pub async fn flush_batch(&mut self) -> CrawlResult<()> {
        if self.metadata_batch.is_empty() {
            return Ok(());
        }

        let metadata = std::mem::take(&mut self.metadata_batch);
        let content = std::mem::take(&mut self.content_batch);

        match self.write_batch(&metadata, &content).await {
            Ok(0) => {
                warn!("batch flush: every row was a duplicate url, nothing stored");
            }
            Ok(count) => {
                self.pages_stored += count;
                self.batches_flushed += 1;
                let ratio = if self.bytes_original > 0 {
                    self.bytes_compressed as f64 / self.bytes_original as f64
                } else {
                    0.0
                };
                info!(
                    pages = count,
                    saved_pct = %format!("{:.1}", (1.0 - ratio) * 100.0),
                    "batch flushed"
                );
            }
            Err(error) => {
                warn!(%error, dropped = metadata.len(), "batch flush failed, buffers cleared");
            }
        }

        Ok(())
    }

    /// One transaction: per-row INSERT OR IGNORE for metadata, the change
    /// count deciding the persisted-id set, then the matching content rows.
    async fn write_batch(
        &self,
        metadata: &[PageMetadata],
        content: &[PageContentRow],
    ) -> CrawlResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut persisted: Vec<&str> = Vec::with_capacity(metadata.len());

        for doc in metadata {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO pages_metadata
                    (id, url, domain, depth, link_count, links_preview, content_hash,
                     content_size, compressed_size, compression_ratio, worker_id, crawled_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&doc.id)
            .bind(&doc.url)
            .bind(&doc.domain)
            .bind(doc.depth as i64)
            .bind(doc.link_count as i64)
            .bind(serde_json::to_string(&doc.links_preview)?)
            .bind(&doc.content_hash)
            .bind(doc.content_size as i64)
            .bind(doc.compressed_size as i64)
            .bind(doc.compression_ratio)
            .bind(&doc.worker_id)
            .bind(doc.crawled_at.timestamp())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 1 {
                persisted.push(doc.id.as_str());
            } else {
                debug!(url = %doc.url, "metadata insert ignored (duplicate url)");
            }
        }

        for row in content {
            if !persisted.contains(&row.page_id.as_str()) {
                continue;
            }
            sqlx::query(
                "INSERT INTO pages_content (page_id, compressed_html, all_links) VALUES (?, ?, ?)",
            )
            .bind(&row.page_id)
            .bind(&row.compressed_html)
            .bind(serde_json::to_string(&row.all_links)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(persisted.len() as u64)
    }

    /// Retrieve a stored page by URL, with its HTML decompressed.
    ///
    /// Pages still sitting in the write buffer are not visible.
    pub async fn get_page(&self, url: &str) -> CrawlResult<Option<StoredPage>> {
        let meta = sqlx::query("SELECT id, domain, depth, crawled_at FROM pages_metadata WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        let Some(meta) = meta else {
            return Ok(None);
        };

        let id: String = meta.get("id");
        let content =
            sqlx::query("SELECT compressed_html, all_links FROM pages_content WHERE page_id = ?")
                .bind(&id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(content) = content else {
            return Ok(None);
        };

        let compressed: Vec<u8> = content.get("compressed_html");
        let links_json: String = content.get("all_links");

        Ok(Some(StoredPage {
            url: url.to_string(),
            domain: meta.get("domain"),
            depth: meta.get::<i64, _>("depth") as u32,
            html: decompress_html(&compressed)?,
            links: serde_json::from_str(&links_json)?,
            crawled_at: DateTime::from_timestamp(meta.get("crawled_at"), 0).unwrap_or_default(),
        }))
    }

    /// Metadata-only lookup; no content row is touched.
    pub async fn get_metadata(&self, url: &str) -> CrawlResult<Option<PageMetadata>> {
        let row = sqlx::query(
            r#"
            SELECT id, url, domain, depth, link_count, links_preview, content_hash,
                   content_size, compressed_size, compression_ratio, worker_id, crawled_at
            FROM pages_metadata WHERE url = ?
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let links_preview: String = row.get("links_preview");
        Ok(Some(PageMetadata {
            id: row.get("id"),
            url: row.get("url"),
            domain: row.get("domain"),
            depth: row.get::<i64, _>("depth") as u32,
            link_count: row.get::<i64, _>("link_count") as u64,
            links_preview: serde_json::from_str(&links_preview)?,
            content_hash: row.get("content_hash"),
            content_size: row.get::<i64, _>("content_size") as u64,
            compressed_size: row.get::<i64, _>("compressed_size") as u64,
            compression_ratio: row.get("compression_ratio"),
            worker_id: row.get("worker_id"),
            crawled_at: DateTime::from_timestamp(row.get("crawled_at"), 0).unwrap_or_default(),
        }))
    }

    /// Aggregate page/link/size totals for one domain.
    pub async fn domain_stats(&self, domain: &str) -> CrawlResult<DomainStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total_pages,
                   COALESCE(SUM(link_count), 0) AS total_links,
                   COALESCE(SUM(content_size), 0) AS total_size,
                   COALESCE(SUM(compressed_size), 0) AS total_compressed,
                   MIN(crawled_at) AS first_crawl,
                   MAX(crawled_at) AS last_crawl
            FROM pages_metadata WHERE domain = ?
            "#,
        )
        .bind(domain)
        .fetch_one(&self.pool)
        .await?;

        let total_size = row.get::<i64, _>("total_size") as u64;
        let total_compressed = row.get::<i64, _>("total_compressed") as u64;

        Ok(DomainStats {
            total_pages: row.get::<i64, _>("total_pages") as u64,
            total_links: row.get::<i64, _>("total_links") as u64,
            total_size,
            total_compressed,
            compression_ratio: if total_size > 0 {
                total_compressed as f64 / total_size as f64
            } else {
                0.0
            },
            first_crawl: row
                .get::<Option<i64>, _>("first_crawl")
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            last_crawl: row
                .get::<Option<i64>, _>("last_crawl")
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
        })
    }

    /// Current in-memory write statistics.
    #[must_use]
    pub fn get_stats(&self) -> StorageStats {
        StorageStats {
            pages_stored: self.pages_stored,
            bytes_original: self.bytes_original,
            bytes_compressed: self.bytes_compressed,
            compression_ratio: if self.bytes_original > 0 {
                self.bytes_compressed as f64 / self.bytes_original as f64
            } else {
                0.0
            },
            batches_flushed: self.batches_flushed,
            pending_in_batch: self.metadata_batch.len(),
        }
    }

    /// Repair procedure for orphaned rows: content without metadata and
    /// metadata without content are both deleted. Provided for the cleanup
    /// utility; the worker never invokes it.
    ///
    /// Returns `(content_removed, metadata_removed)`.
    pub async fn reconcile(&self) -> CrawlResult<(u64, u64)> {
        let content_removed = sqlx::query(
            "DELETE FROM pages_content WHERE page_id NOT IN (SELECT id FROM pages_metadata)",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        let metadata_removed = sqlx::query(
            "DELETE FROM pages_metadata WHERE id NOT IN (SELECT page_id FROM pages_content)",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        if content_removed > 0 || metadata_removed > 0 {
            warn!(content_removed, metadata_removed, "orphaned rows reconciled");
        }
        Ok((content_removed, metadata_removed))
    }

    /// Flush any buffered pages and close the pool.
    pub async fn close(&mut self) -> CrawlResult<()> {
        self.flush_batch().await?;
        self.pool.close().await;
        info!("page store closed");
        Ok(())
    }
}
