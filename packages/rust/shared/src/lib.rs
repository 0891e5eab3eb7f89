//! Shared types, error model, configuration, and retry policy for DocRAG.
//!
//! This crate is the foundation depended on by all other DocRAG crates.
//! It provides:
//! - [`DocRagError`] — the unified error type with the fetch/embedding taxonomy
//! - Domain types ([`Site`], [`Chunk`], [`CrawlEvent`], [`SourcePassage`])
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading)
//! - [`RetryPolicy`] — the shared retry-with-backoff policy

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlConfig, EmbeddingConfig, LlmConfig, StorageConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{DocRagError, EmbeddingErrorKind, FetchErrorKind, Result};
pub use retry::RetryPolicy;
pub use types::{
    ChatEvent, Chunk, ChunkId, CrawlEvent, Site, SiteId, SiteStatus, SourcePassage,
};
