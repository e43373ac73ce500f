//! The Crawler Worker (C5): URL normalization, HTTP fetch with 4xx/5xx
//! classification, link/metadata extraction, sitemap discovery, and the
//! per-task BFS frontier/dedup state kept entirely in the broker (§4.5).

pub mod extract;
pub mod fetch;
pub mod firecrawl;
pub mod normalize;
pub mod sitemap;
pub mod worker;

pub use fetch::{FetchClient, FetchOutcome, FetchResponse};
pub use firecrawl::{CrawlStatus, FirecrawlClient, FirecrawlPage, HttpFirecrawlClient};
pub use normalize::{normalize, resolve_and_normalize};
pub use worker::{CrawlTaskConfig, CrawlerWorker, ProcessOutcome};
