//! Test utilities shared by the crawlhive integration suite.

use std::path::PathBuf;

use tempfile::TempDir;

/// Creates a temporary directory holding a page store database path.
#[allow(dead_code)]
pub fn temp_store_path() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("pages.sqlite");
    (dir, path)
}

/// Creates a small HTML document with the given title and body.
#[allow(dead_code)]
pub fn test_html(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
</head>
<body>
    {body}
</body>
</html>"#
    )
}

/// A list of synthetic absolute links on one host.
#[allow(dead_code)]
pub fn test_links(host: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("https://{host}/page-{i}"))
        .collect()
}
