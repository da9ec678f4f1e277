//! Harvests publications and their posts from a paginated, rate-limited API,
//! deduplicates them and writes one JSON artifact per phase and query term.
//!
//! `request` does single fetches with retry and proxy rotation, `collect`
//! drives the three pagination strategies, `process` sequences them.

pub mod api;
pub mod collect;
pub mod config;
pub mod enrich;
mod error;
mod macros;
pub mod model;
pub mod parse;
pub mod persist;
pub mod process;
pub mod request;

pub use error::{Error, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_MS: u64 = 1000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_SEARCH_BATCH: usize = 50;
pub const DEFAULT_LATEST_BATCH: usize = 10;
pub const DEFAULT_POPULAR_BATCH: usize = 10;
/// Publications below this many free subscribers are never stored.
pub const SUBSCRIBER_THRESHOLD: u64 = 5000;

pub const LATEST_PAGE_SIZE: usize = 10;
pub const POPULAR_PAGE_SIZE: usize = 13;
/// One less than the page size, so consecutive pages overlap by a post.
pub const POPULAR_OFFSET_STEP: usize = 12;
pub const POPULAR_MAX_RAW_POSTS: usize = 50;
pub const POPULAR_TOP_N: usize = 10;

const SEARCH_LAST_SEARCH: &str = "1727768370290";
const CONTENT_REGION_SELECTOR: &str = ".available-content";
