//! Page fetching and link extraction.
//!
//! One pooled HTTP client per worker, a random User-Agent per request, and
//! a short retry loop for retryable 5xx statuses. Fetch failures are plain
//! outcomes, not errors; the worker loop records a stat and moves on.

use std::time::Duration;

use rand::seq::IndexedRandom;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::config::CrawlerConfig;
use crate::error::CrawlResult;
use crate::utils::{FETCH_BACKOFF_FACTOR, FETCH_MAX_RETRIES, is_crawlable_url};

/// Result of one page fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// 2xx response with an HTML content type.
    Html(String),
    /// 2xx response whose content type is not text/html.
    NonHtml,
    /// Connect or read deadline exceeded.
    Timeout,
    /// Any other failure: DNS, refused, non-2xx after retries, bad body.
    Failed,
}

/// HTTP page fetcher with User-Agent rotation.
pub struct PageFetcher {
    client: reqwest::Client,
    user_agents: Vec<String>,
}

impl PageFetcher {
    /// Build the pooled client. Redirects are followed; connect and total
    /// timeouts come from the configuration.
    pub fn new(config: &CrawlerConfig) -> CrawlResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.fetch_connect_timeout)
            .timeout(config.fetch_timeout)
            .pool_max_idle_per_host(20)
            .build()?;

        Ok(Self {
            client,
            user_agents: config.user_agents.clone(),
        })
    }

    fn random_user_agent(&self) -> Option<&str> {
        self.user_agents
            .choose(&mut rand::rng())
            .map(String::as_str)
    }

    /// Fetch one page.
    ///
    /// Retries 500/502/503/504 up to three attempts with exponential
    /// backoff (factor 0.3 s); every other failure is terminal for this
    /// URL. The response must carry a content type starting with
    /// `text/html`.
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        for attempt in 1..=FETCH_MAX_RETRIES {
            let mut request = self.client.get(url);
            if let Some(user_agent) = self.random_user_agent() {
                request = request.header(reqwest::header::USER_AGENT, user_agent);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(error) if error.is_timeout() => {
                    debug!(url = %url, "fetch timeout");
                    return FetchOutcome::Timeout;
                }
                Err(error) => {
                    debug!(url = %url, %error, "fetch failed");
                    return FetchOutcome::Failed;
                }
            };

            let status = response.status();
            if is_retryable(status) {
                if attempt < FETCH_MAX_RETRIES {
                    let backoff = FETCH_BACKOFF_FACTOR * f64::from(1 << (attempt - 1));
                    debug!(url = %url, %status, attempt, "retryable status, backing off");
                    tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                    continue;
                }
                debug!(url = %url, %status, "retries exhausted");
                return FetchOutcome::Failed;
            }

            if !is_html(&response) {
                debug!(url = %url, "skipping non-HTML response");
                return FetchOutcome::NonHtml;
            }

            if !status.is_success() {
                debug!(url = %url, %status, "unsuccessful response");
                return FetchOutcome::Failed;
            }

            return match response.text().await {
                Ok(html) => FetchOutcome::Html(html),
                Err(error) if error.is_timeout() => {
                    debug!(url = %url, "body read timeout");
                    FetchOutcome::Timeout
                }
                Err(error) => {
                    debug!(url = %url, %error, "body read failed");
                    FetchOutcome::Failed
                }
            };
        }

        FetchOutcome::Failed
    }
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 500 | 502 | 503 | 504)
}

fn is_html(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().to_ascii_lowercase().starts_with("text/html"))
}

/// Extract all anchor hrefs from a page, resolved against the page URL and
/// filtered to crawlable URLs. Malformed HTML yields whatever anchors the
/// parser can recover; a malformed base URL yields nothing.
#[must_use]
pub fn extract_links(html: &str, base_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    document
        .select(&selector)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .map(|resolved| resolved.to_string())
        .filter(|resolved| is_crawlable_url(resolved))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_resolves_relative_links() {
        let html = r#"
            <html><body>
                <a href="/a">one</a>
                <a href="b/c.html">two</a>
                <a href="https://other.test/x">three</a>
                <a>no href</a>
            </body></html>
        "#;
        let links = extract_links(html, "https://example.com/dir/page.html");
        assert_eq!(
            links,
            vec![
                "https://example.com/a",
                "https://example.com/dir/b/c.html",
                "https://other.test/x",
            ]
        );
    }

    #[test]
    fn filters_out_uncrawlable_links() {
        let html = r#"
            <html><body>
                <a href="mailto:x@example.com">mail</a>
                <a href="/photo.jpg">image</a>
                <a href="javascript:void(0)">js</a>
                <a href="/ok">ok</a>
            </body></html>
        "#;
        let links = extract_links(html, "https://example.com/");
        assert_eq!(links, vec!["https://example.com/ok"]);
    }

    #[test]
    fn malformed_inputs_yield_nothing() {
        assert!(extract_links("<html>", "not a base url").is_empty());
        assert!(extract_links("", "https://example.com/").is_empty());
    }

    #[test]
    fn retryable_statuses_are_the_5xx_gateway_set() {
        assert!(is_retryable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable(StatusCode::GATEWAY_TIMEOUT));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
        assert!(!is_retryable(StatusCode::TOO_MANY_REQUESTS));
    }

    #[tokio::test]
    async fn fetch_returns_html_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/page")
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body("<html><body>hi</body></html>")
            .create_async()
            .await;

        let fetcher = PageFetcher::new(&CrawlerConfig::default()).unwrap();
        let outcome = fetcher.fetch(&format!("{}/page", server.url())).await;
        assert!(matches!(outcome, FetchOutcome::Html(body) if body.contains("hi")));
    }

    #[tokio::test]
    async fn fetch_skips_non_html_content() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/data.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .create_async()
            .await;

        let fetcher = PageFetcher::new(&CrawlerConfig::default()).unwrap();
        let outcome = fetcher.fetch(&format!("{}/data.json", server.url())).await;
        assert!(matches!(outcome, FetchOutcome::NonHtml));
    }

    #[tokio::test]
    async fn fetch_retries_gateway_errors_until_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/down")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let fetcher = PageFetcher::new(&CrawlerConfig::default()).unwrap();
        let outcome = fetcher.fetch(&format!("{}/down", server.url())).await;

        failing.assert_async().await;
        assert!(matches!(outcome, FetchOutcome::Failed));
    }

    #[tokio::test]
    async fn fetch_does_not_retry_plain_client_errors() {
        let mut server = mockito::Server::new_async().await;
        let missing = server
            .mock("GET", "/gone")
            .with_status(404)
            .with_header("content-type", "text/html")
            .expect(1)
            .create_async()
            .await;

        let fetcher = PageFetcher::new(&CrawlerConfig::default()).unwrap();
        let outcome = fetcher.fetch(&format!("{}/gone", server.url())).await;

        missing.assert_async().await;
        assert!(matches!(outcome, FetchOutcome::Failed));
    }
}
