//! Integration tests for the batched page store: lock-step flushes,
//! content deduplication, duplicate-url reconciliation, and orphan repair.

mod common;

use anyhow::Result;
use crawlhive::storage::{PageStore, content_hash, decompress_html};
use sqlx::{Row, SqlitePool};

use common::{temp_store_path, test_html, test_links};

async fn raw_counts(path: &std::path::Path) -> Result<(i64, i64)> {
    let pool = SqlitePool::connect(&format!("sqlite:{}", path.display())).await?;
    let metadata: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pages_metadata")
        .fetch_one(&pool)
        .await?;
    let content: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pages_content")
        .fetch_one(&pool)
        .await?;
    pool.close().await;
    Ok((metadata.0, content.0))
}

#[tokio::test]
async fn flush_writes_metadata_and_content_in_lock_step() -> Result<()> {
    let (_dir, path) = temp_store_path();
    let mut store = PageStore::open(&path, 10).await?;

    let links = test_links("a.test", 5);
    for i in 0..3 {
        let html = test_html(&format!("page {i}"), &format!("<p>body {i}</p>"));
        let added = store
            .add_page(
                &format!("https://a.test/p{i}"),
                &html,
                &links,
                "a.test",
                1,
                "worker-test",
            )
            .await?;
        assert!(added);
    }

    // Nothing visible before the flush.
    assert_eq!(store.get_stats().pending_in_batch, 3);
    assert!(store.get_page("https://a.test/p0").await?.is_none());

    store.flush_batch().await?;

    let stats = store.get_stats();
    assert_eq!(stats.pages_stored, 3);
    assert_eq!(stats.batches_flushed, 1);
    assert_eq!(stats.pending_in_batch, 0);
    assert!(stats.bytes_compressed <= stats.bytes_original);

    let page = store.get_page("https://a.test/p1").await?.expect("stored page");
    assert_eq!(page.domain, "a.test");
    assert_eq!(page.depth, 1);
    assert_eq!(page.links, links);
    assert!(page.html.contains("body 1"));

    store.close().await?;
    assert_eq!(raw_counts(&path).await?, (3, 3));
    Ok(())
}

#[tokio::test]
async fn buffer_flushes_automatically_at_batch_size() -> Result<()> {
    let (_dir, path) = temp_store_path();
    let mut store = PageStore::open(&path, 2).await?;

    store
        .add_page(
            "https://a.test/1",
            &test_html("one", "<p>1</p>"),
            &[],
            "a.test",
            0,
            "w",
        )
        .await?;
    assert_eq!(store.get_stats().pending_in_batch, 1);

    store
        .add_page(
            "https://a.test/2",
            &test_html("two", "<p>2</p>"),
            &[],
            "a.test",
            0,
            "w",
        )
        .await?;

    // Second add reached the batch size and triggered the flush.
    let stats = store.get_stats();
    assert_eq!(stats.pending_in_batch, 0);
    assert_eq!(stats.pages_stored, 2);
    assert_eq!(stats.batches_flushed, 1);

    store.close().await?;
    Ok(())
}

#[tokio::test]
async fn byte_identical_bodies_persist_exactly_once() -> Result<()> {
    let (_dir, path) = temp_store_path();
    let mut store = PageStore::open(&path, 10).await?;

    let html = test_html("same", "<p>identical</p>");
    assert!(
        store
            .add_page("https://c.test/p1", &html, &[], "c.test", 0, "w")
            .await?
    );
    store.flush_batch().await?;

    // Same bytes under a different URL: skipped by the content hash check.
    assert!(
        !store
            .add_page("https://c.test/p2", &html, &[], "c.test", 0, "w")
            .await?
    );
    store.flush_batch().await?;

    assert_eq!(store.get_stats().pages_stored, 1);
    assert_eq!(raw_counts(&path).await?, (1, 1));
    assert!(store.get_page("https://c.test/p2").await?.is_none());

    let meta = store
        .get_metadata("https://c.test/p1")
        .await?
        .expect("metadata");
    assert_eq!(meta.content_hash, content_hash(&html));

    store.close().await?;
    Ok(())
}

#[tokio::test]
async fn duplicate_url_in_batch_filters_its_content_row() -> Result<()> {
    let (_dir, path) = temp_store_path();
    let mut store = PageStore::open(&path, 100).await?;

    // Pre-existing page at url U.
    store
        .add_page(
            "https://b.test/u",
            &test_html("original", "<p>v1</p>"),
            &[],
            "b.test",
            0,
            "w",
        )
        .await?;
    store.flush_batch().await?;
    assert_eq!(store.get_stats().pages_stored, 1);

    // A batch carrying U again (new body, so the hash check passes) plus
    // four fresh pages.
    store
        .add_page(
            "https://b.test/u",
            &test_html("replay", "<p>v2</p>"),
            &[],
            "b.test",
            0,
            "w",
        )
        .await?;
    for i in 0..4 {
        store
            .add_page(
                &format!("https://b.test/new-{i}"),
                &test_html(&format!("new {i}"), &format!("<p>n{i}</p>")),
                &[],
                "b.test",
                1,
                "w",
            )
            .await?;
    }
    store.flush_batch().await?;

    // Only the four new pages landed; the duplicate url was ignored and its
    // content row filtered out, leaving zero orphans on either side.
    assert_eq!(store.get_stats().pages_stored, 5);
    assert_eq!(raw_counts(&path).await?, (5, 5));
    assert_eq!(store.reconcile().await?, (0, 0));

    // The original body at U is untouched.
    let page = store.get_page("https://b.test/u").await?.expect("page");
    assert!(page.html.contains("v1"));

    store.close().await?;
    Ok(())
}

#[tokio::test]
async fn reconcile_removes_orphans_on_both_sides() -> Result<()> {
    let (_dir, path) = temp_store_path();
    let mut store = PageStore::open(&path, 10).await?;

    store
        .add_page(
            "https://a.test/keep",
            &test_html("keep", "<p>keep</p>"),
            &[],
            "a.test",
            0,
            "w",
        )
        .await?;
    store.flush_batch().await?;

    // Inject one orphan on each side behind the store's back.
    let pool = SqlitePool::connect(&format!("sqlite:{}", path.display())).await?;
    sqlx::query(
        "INSERT INTO pages_content (page_id, compressed_html, all_links) VALUES ('ghost', x'00', '[]')",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        r#"
        INSERT INTO pages_metadata
            (id, url, domain, depth, link_count, links_preview, content_hash,
             content_size, compressed_size, compression_ratio, worker_id, crawled_at)
        VALUES ('headless', 'https://a.test/headless', 'a.test', 0, 0, '[]', 'deadbeef',
                1, 1, 1.0, 'w', 0)
        "#,
    )
    .execute(&pool)
    .await?;
    pool.close().await;

    assert_eq!(store.reconcile().await?, (1, 1));
    assert_eq!(raw_counts(&path).await?, (1, 1));

    // The intact pair survived.
    assert!(store.get_page("https://a.test/keep").await?.is_some());

    store.close().await?;
    Ok(())
}

#[tokio::test]
async fn stored_html_round_trips_through_compression() -> Result<()> {
    let (_dir, path) = temp_store_path();
    let mut store = PageStore::open(&path, 1).await?;

    let body = "<p>repeated content </p>".repeat(200);
    let html = test_html("big", &body);
    store
        .add_page("https://a.test/big", &html, &[], "a.test", 2, "w")
        .await?;

    let page = store.get_page("https://a.test/big").await?.expect("page");
    assert_eq!(page.html, html);

    // The raw row really is compressed.
    let pool = SqlitePool::connect(&format!("sqlite:{}", path.display())).await?;
    let row = sqlx::query("SELECT compressed_html FROM pages_content LIMIT 1")
        .fetch_one(&pool)
        .await?;
    let compressed: Vec<u8> = row.get("compressed_html");
    pool.close().await;

    assert!(compressed.len() < html.len());
    assert_eq!(decompress_html(&compressed)?, html);

    store.close().await?;
    Ok(())
}

#[tokio::test]
async fn metadata_previews_first_hundred_links() -> Result<()> {
    let (_dir, path) = temp_store_path();
    let mut store = PageStore::open(&path, 1).await?;

    let links = test_links("a.test", 150);
    store
        .add_page(
            "https://a.test/hub",
            &test_html("hub", "<p>links</p>"),
            &links,
            "a.test",
            0,
            "w",
        )
        .await?;

    let meta = store.get_metadata("https://a.test/hub").await?.expect("metadata");
    assert_eq!(meta.link_count, 150);
    assert_eq!(meta.links_preview.len(), 100);
    assert_eq!(meta.links_preview[0], links[0]);

    // The content side keeps the full ordered list.
    let page = store.get_page("https://a.test/hub").await?.expect("page");
    assert_eq!(page.links.len(), 150);
    assert_eq!(page.links, links);

    store.close().await?;
    Ok(())
}

#[tokio::test]
async fn domain_stats_aggregate_by_domain() -> Result<()> {
    let (_dir, path) = temp_store_path();
    let mut store = PageStore::open(&path, 10).await?;

    for i in 0..3 {
        store
            .add_page(
                &format!("https://a.test/{i}"),
                &test_html(&format!("a{i}"), &format!("<p>{i}</p>")),
                &test_links("a.test", 4),
                "a.test",
                0,
                "w",
            )
            .await?;
    }
    store
        .add_page(
            "https://b.test/only",
            &test_html("b", "<p>b</p>"),
            &[],
            "b.test",
            0,
            "w",
        )
        .await?;
    store.flush_batch().await?;

    let stats = store.domain_stats("a.test").await?;
    assert_eq!(stats.total_pages, 3);
    assert_eq!(stats.total_links, 12);
    assert!(stats.total_compressed <= stats.total_size);
    assert!(stats.first_crawl.is_some());

    let other = store.domain_stats("b.test").await?;
    assert_eq!(other.total_pages, 1);

    let empty = store.domain_stats("missing.test").await?;
    assert_eq!(empty.total_pages, 0);
    assert!(empty.first_crawl.is_none());

    store.close().await?;
    Ok(())
}

#[tokio::test]
async fn close_flushes_pending_pages() -> Result<()> {
    let (_dir, path) = temp_store_path();
    let mut store = PageStore::open(&path, 100).await?;

    store
        .add_page(
            "https://a.test/pending",
            &test_html("pending", "<p>p</p>"),
            &[],
            "a.test",
            0,
            "w",
        )
        .await?;
    assert_eq!(store.get_stats().pending_in_batch, 1);

    store.close().await?;
    assert_eq!(raw_counts(&path).await?, (1, 1));
    Ok(())
}
