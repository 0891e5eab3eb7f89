//! The `DocRag` facade: one handle owning storage, the bus, the crawl
//! orchestrator, and retrieval, exposed to the CLI (or any other frontend).

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use docrag_crawler::Fetcher;
use docrag_embedder::{Embedder, build_embedder};
use docrag_shared::{AppConfig, CrawlEvent, Result, RetryPolicy, Site, SiteId};
use docrag_storage::Storage;

use crate::bus::ProgressBus;
use crate::chat::{self, AnswerGenerator, ChatStream, ExtractiveGenerator, HttpGenerator};
use crate::pipeline::CrawlOrchestrator;
use crate::retrieval::HybridRetriever;

/// Open-time options not carried in the config file.
#[derive(Debug, Default)]
pub struct OpenOptions {
    /// Override the configured database path (tests, scratch runs).
    pub db_path: Option<PathBuf>,
    /// Permit crawling loopback and private hosts (local doc servers, tests).
    pub allow_localhost: bool,
}

/// Top-level service handle.
pub struct DocRag {
    storage: Arc<Storage>,
    bus: Arc<ProgressBus>,
    orchestrator: CrawlOrchestrator,
    retriever: Arc<HybridRetriever>,
    generator: Arc<dyn AnswerGenerator>,
}

impl DocRag {
    /// Open with the given config at its configured database path.
    pub async fn open(config: AppConfig) -> Result<Self> {
        Self::open_with(config, OpenOptions::default()).await
    }

    /// Open with explicit options.
    ///
    /// Any site left non-terminal by a previous process is marked errored
    /// before anything else runs; in-flight crawl state is not recoverable.
    pub async fn open_with(config: AppConfig, options: OpenOptions) -> Result<Self> {
        let db_path = match options.db_path {
            Some(path) => path,
            None => config.storage.resolved_db_path()?,
        };
        let storage = Arc::new(Storage::open(&db_path).await?);
        storage.mark_interrupted_sites().await?;

        let retry = RetryPolicy::new(
            config.crawl.retry_max_attempts,
            config.crawl.retry_base_delay_ms,
        );
        let embedder: Arc<dyn Embedder> = build_embedder(&config.embedding, retry)?;

        let mut fetcher = Fetcher::new(&config.crawl)?;
        if options.allow_localhost {
            fetcher = fetcher.allow_localhost();
        }
        let fetcher = Arc::new(fetcher);

        let bus = Arc::new(ProgressBus::default());
        let orchestrator = CrawlOrchestrator::new(
            Arc::clone(&storage),
            Arc::clone(&embedder),
            fetcher,
            Arc::clone(&bus),
            config.crawl.clone(),
        );
        let retriever = Arc::new(HybridRetriever::new(
            Arc::clone(&storage),
            Arc::clone(&embedder),
        ));

        // Without an API key the service still answers, extractively.
        let generator: Arc<dyn AnswerGenerator> =
            if std::env::var(&config.llm.api_key_env).is_ok() {
                Arc::new(HttpGenerator::from_config(&config.llm))
            } else {
                info!(
                    key_env = %config.llm.api_key_env,
                    "no LLM API key in environment, using extractive answers"
                );
                Arc::new(ExtractiveGenerator)
            };

        Ok(Self {
            storage,
            bus,
            orchestrator,
            retriever,
            generator,
        })
    }

    /// Submit a documentation site for crawling and indexing.
    pub async fn submit_site(&self, url: &str, name: Option<String>) -> Result<Site> {
        self.orchestrator.submit(url, name).await
    }

    /// Delete a site, cancelling its crawl if still running.
    pub async fn delete_site(&self, site_id: SiteId) -> Result<Site> {
        self.orchestrator.delete(site_id).await
    }

    /// Remove every site and the whole index.
    pub async fn clear_database(&self) -> Result<()> {
        self.orchestrator.clear().await
    }

    /// Latest durable snapshot for one site.
    pub async fn site_status(&self, site_id: SiteId) -> Result<Site> {
        self.orchestrator.status(site_id).await
    }

    /// All sites, newest first.
    pub async fn list_sites(&self) -> Result<Vec<Site>> {
        self.storage.list_sites().await
    }

    /// Subscribe to live progress: catch-up burst plus live receiver.
    pub fn subscribe(&self) -> (Vec<CrawlEvent>, broadcast::Receiver<CrawlEvent>) {
        self.bus.subscribe()
    }

    /// Ask a question over everything indexed so far.
    pub fn ask(&self, question: &str) -> ChatStream {
        chat::ask(
            Arc::clone(&self.retriever),
            Arc::clone(&self.generator),
            question.to_string(),
        )
    }

    /// Watch one site until it reaches a terminal state, invoking `on_event`
    /// for each of its progress events. Returns the final snapshot.
    pub async fn watch_site(
        &self,
        site_id: SiteId,
        mut on_event: impl FnMut(&CrawlEvent),
    ) -> Result<Site> {
        let (_, mut rx) = self.subscribe();

        // The job may already have finished before we subscribed.
        let site = self.site_status(site_id).await?;
        if site.status.is_terminal() {
            return Ok(site);
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.site_id() != Some(site_id) {
                        continue;
                    }
                    on_event(&event);
                    match event {
                        CrawlEvent::CrawlCompleted { .. }
                        | CrawlEvent::CrawlError { .. }
                        | CrawlEvent::SiteDeleted { .. } => {
                            return self.site_status(site_id).await;
                        }
                        _ => {}
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // Fall back to polling the durable snapshot.
                    let site = self.site_status(site_id).await?;
                    if site.status.is_terminal() {
                        return Ok(site);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return self.site_status(site_id).await;
                }
            }
        }
    }
}
