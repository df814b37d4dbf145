//! Crawl worker entry point.
//!
//! Configuration comes from the environment (see `CrawlerConfig::from_env`);
//! seeding and fleet control belong to the admin tool, which shares the
//! frontier and the `crawler:shutdown` key with every worker.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crawlhive::{CrawlerConfig, Worker};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = CrawlerConfig::from_env()?;

    // An unreachable shared store or page store is fatal here; the process
    // exits non-zero before touching the frontier.
    let mut worker = Worker::new(config).await?;
    worker.run().await?;

    Ok(())
}
