//! URL validation, host extraction, and priority scoring.
//!
//! Workers apply these rules at link-insertion time; the frontier itself
//! treats entries as opaque.

use url::Url;

/// File extensions that are never worth fetching as HTML.
const EXCLUDED_EXTENSIONS: [&str; 9] = [
    ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".zip", ".exe", ".mp4", ".avi",
];

/// Maximum accepted URL length.
const MAX_URL_LEN: usize = 500;

/// Check whether a URL is eligible for the frontier.
///
/// Accepts http/https URLs with a host, at most 500 bytes long, whose path
/// does not end in a known binary extension.
#[must_use]
pub fn is_crawlable_url(url: &str) -> bool {
    if url.len() > MAX_URL_LEN {
        return false;
    }

    let Ok(parsed) = Url::parse(url) else {
        return false;
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return false;
    }

    let path = parsed.path().to_ascii_lowercase();
    !EXCLUDED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Extract the host (including any non-default port) from a URL.
#[must_use]
pub fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{host}:{port}")),
        None => Some(host.to_string()),
    }
}

/// Extract the `{scheme}://{host}` origin used for politeness lease keys.
#[must_use]
pub fn origin_of(url: &str) -> Option<String> {
    let host = host_of(url)?;
    let parsed = Url::parse(url).ok()?;
    Some(format!("{}://{host}", parsed.scheme()))
}

/// Score a URL for frontier insertion. Higher is crawled sooner.
///
/// Starts from the seed base of 100 and adjusts: deeper pages rank lower,
/// index and content-ish paths rank higher, auth pages and very long URLs
/// rank lower. The result is clamped to >= 1.0.
#[must_use]
pub fn score_url(url: &str, depth: u32) -> f64 {
    let mut priority = 100.0;

    priority -= f64::from(depth) * 5.0;

    if url.ends_with('/') || url.ends_with("/index.html") {
        priority += 5.0;
    }

    let path = Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_default();

    if ["/blog/", "/article/", "/post/", "/docs/"]
        .iter()
        .any(|kw| path.contains(kw))
    {
        priority += 3.0;
    }

    if ["/login", "/signup", "/register", "/auth"]
        .iter()
        .any(|kw| path.contains(kw))
    {
        priority -= 10.0;
    }

    if url.len() > 200 {
        priority -= 10.0;
    }

    priority.max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_http_and_https() {
        assert!(is_crawlable_url("https://example.com/"));
        assert!(is_crawlable_url("http://example.com/a/b?q=1"));
    }

    #[test]
    fn rejects_non_http_schemes_and_hostless() {
        assert!(!is_crawlable_url("ftp://example.com/file"));
        assert!(!is_crawlable_url("mailto:someone@example.com"));
        assert!(!is_crawlable_url("javascript:void(0)"));
        assert!(!is_crawlable_url("not a url"));
    }

    #[test]
    fn rejects_binary_extensions_case_insensitively() {
        assert!(!is_crawlable_url("https://example.com/report.pdf"));
        assert!(!is_crawlable_url("https://example.com/IMG.JPG"));
        assert!(!is_crawlable_url("https://example.com/movie.Mp4"));
        assert!(is_crawlable_url("https://example.com/pdf-guide"));
    }

    #[test]
    fn rejects_overlong_urls() {
        let long = format!("https://example.com/{}", "a".repeat(500));
        assert!(!is_crawlable_url(&long));
    }

    #[test]
    fn host_and_origin_extraction() {
        assert_eq!(host_of("https://example.com/x"), Some("example.com".into()));
        assert_eq!(
            host_of("http://example.com:8080/x"),
            Some("example.com:8080".into())
        );
        assert_eq!(
            origin_of("https://example.com/a/b"),
            Some("https://example.com".into())
        );
        assert_eq!(origin_of("nope"), None);
    }

    #[test]
    fn seed_depth_scores_highest() {
        let root = score_url("https://example.com/", 0);
        let deep = score_url("https://example.com/", 4);
        assert!(root > deep);
        assert_eq!(root, 105.0); // base 100 + trailing slash bonus
    }

    #[test]
    fn content_paths_outrank_auth_paths() {
        let blog = score_url("https://example.com/blog/post-1", 1);
        let login = score_url("https://example.com/login", 1);
        assert!(blog > login);
        assert_eq!(blog, 98.0); // 100 - 5 + 3
        assert_eq!(login, 85.0); // 100 - 5 - 10
    }

    #[test]
    fn long_urls_are_penalized_and_clamped() {
        let long = format!("https://example.com/{}?q={}", "p".repeat(100), "x".repeat(90));
        assert_eq!(score_url(&long, 0), 90.0);
        // Depth alone can push the raw score negative; the clamp holds.
        assert_eq!(score_url("https://example.com/login", 30), 1.0);
    }
}
