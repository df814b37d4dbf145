//! Shared configuration constants for crawlhive
//!
//! Default values and shared-store key names used throughout the codebase
//! to ensure consistency and avoid magic numbers.

/// Shared-store key of the priority frontier sorted set.
pub const FRONTIER_KEY: &str = "crawler:frontier";

/// Shared-store key of the URL filter bitmap. The sibling `{key}:info`
/// hash carries the filter's sizing metadata.
pub const BLOOM_KEY: &str = "crawler:bloom";

/// Shared-store key whose presence signals a fleet-wide graceful shutdown.
/// Written by the admin tool with a 300 s TTL; workers poll it between pages.
pub const SHUTDOWN_KEY: &str = "crawler:shutdown";

/// Priority assigned to seed URLs.
///
/// The link heuristic starts from the same base and only subtracts, so
/// seeds always outrank discovered links at equal depth.
pub const SEED_PRIORITY: f64 = 100.0;

/// Default per-host crawl delay in seconds when neither robots.txt nor the
/// domain state specifies one.
pub const DEFAULT_CRAWL_DELAY_SECS: f64 = 1.0;

/// Priority subtracted when a frontier entry is snoozed because its host
/// lease was unavailable. The result is clamped to >= 1.0 so busy hosts
/// cycle to the back of the queue without being dropped.
pub const DEFAULT_REQUEUE_PENALTY: f64 = 5.0;

/// Default number of pages buffered before a storage batch flush.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default URL filter capacity: 10M URLs.
///
/// At the default error rate this sizes the shared bitmap at roughly
/// 17 MB, versus ~800 MB for an exact set of the same URLs.
pub const DEFAULT_FILTER_CAPACITY: u64 = 10_000_000;

/// Default URL filter false-positive rate (0.1%).
pub const DEFAULT_FILTER_ERROR_RATE: f64 = 0.001;

/// Default robots.txt cache lifetime: 24 hours.
///
/// Applies to both the in-process cache and the shared `robots_cache:{host}`
/// entries.
pub const DEFAULT_ROBOTS_CACHE_TTL_SECS: u64 = 86_400;

/// TTL of the `crawler:robots:delay:{host}` crawl-delay keys.
pub const ROBOTS_DELAY_TTL_SECS: u64 = 86_400;

/// Seconds a worker waits before exiting once the frontier stays empty.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Sleep between frontier polls while the frontier is empty.
pub const IDLE_POLL_SECS: u64 = 5;

/// Page fetch connect timeout. The odd 3.05 s keeps the connect deadline
/// just past common 3 s server accept windows.
pub const FETCH_CONNECT_TIMEOUT_MS: u64 = 3_050;

/// Page fetch total timeout.
pub const FETCH_READ_TIMEOUT_SECS: u64 = 10;

/// robots.txt fetch connect timeout.
pub const ROBOTS_CONNECT_TIMEOUT_SECS: u64 = 1;

/// robots.txt fetch total timeout.
pub const ROBOTS_TOTAL_TIMEOUT_SECS: u64 = 3;

/// Retry attempts for page fetches that hit a retryable 5xx status.
pub const FETCH_MAX_RETRIES: u32 = 3;

/// Exponential backoff factor between page fetch retries, in seconds.
pub const FETCH_BACKOFF_FACTOR: f64 = 0.3;

/// Rotation pool of realistic browser User-Agent strings; one is chosen at
/// random per page request.
pub const USER_AGENTS: [&str; 10] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.2; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];
