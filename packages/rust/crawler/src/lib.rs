//! Page fetching for documentation crawls.
//!
//! [`Fetcher`] wraps a shared HTTP client with retry, link extraction, and
//! URL normalization; [`sitemap`] discovers a site's page list before BFS
//! falls back to following links. Crawl orchestration (frontier, status,
//! events) lives in `docrag-core`; this crate only knows how to fetch one
//! page well.

mod fetcher;
pub mod sitemap;

pub use fetcher::{CrawlScope, FetchedPage, Fetcher, normalize_url};
