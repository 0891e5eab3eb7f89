//! Core orchestration and retrieval for DocRAG.
//!
//! This crate ties the lower layers together: crawl jobs that fetch, chunk,
//! embed, and index documentation sites ([`pipeline`]), live progress
//! broadcasting ([`bus`]), hybrid keyword+vector retrieval ([`retrieval`]),
//! grounded answer generation ([`chat`]), and the [`service::DocRag`] facade
//! the CLI talks to.

pub mod bus;
pub mod chat;
pub mod pipeline;
pub mod retrieval;
pub mod service;

pub use bus::ProgressBus;
pub use chat::{AnswerGenerator, ChatStream, ExtractiveGenerator, HttpGenerator};
pub use pipeline::CrawlOrchestrator;
pub use retrieval::HybridRetriever;
pub use service::{DocRag, OpenOptions};
