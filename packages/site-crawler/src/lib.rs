//! Fetch layer for the MarketSense batch pipeline.
//!
//! This crate owns everything between a task URL and its raw HTML:
//! - [`PageFetcher`] - HTTP fetching with browser-like headers
//! - [`DomainThrottle`] - per-domain courtesy delays with backoff
//! - [`RobotsCache`] - robots-exclusion rules with TTL caching
//! - URL normalization and host allow/deny checks
//!
//! It has no knowledge of the task store; the pipeline crate drives it.

pub mod block;
pub mod fetch;
pub mod robots;
pub mod throttle;
pub mod url;

pub use block::detect_block_signals;
pub use fetch::{FetchConfig, FetchPage, FetchedPage, PageFetcher};
pub use robots::{HttpRobotsFetcher, RobotsCache, RobotsConfig, RobotsFetcher, RobotsRules};
pub use throttle::{DomainThrottle, FetchOutcome, ThrottleConfig};
pub use url::{host_of, is_domain_allowed, normalize_url};
