pub mod constants;
pub mod url_utils;

pub use constants::*;
pub use url_utils::{host_of, is_crawlable_url, origin_of, score_url};
