//! Crawl orchestration: one background job per site, from URL submission to
//! a terminal `completed` or `error` state.
//!
//! A job walks `finding_urls` (sitemap discovery) then `crawling` (fetch,
//! extract, chunk, embed, index), publishing progress on the bus and keeping
//! the durable site record in step. The page list comes from the sitemap
//! when one exists, otherwise from same-host BFS capped at the configured
//! page limit. Progress never regresses even while BFS grows the frontier.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

use docrag_crawler::{CrawlScope, FetchedPage, Fetcher, normalize_url, sitemap};
use docrag_embedder::Embedder;
use docrag_shared::{Chunk, CrawlConfig, CrawlEvent, DocRagError, Result, Site, SiteStatus};
use docrag_storage::Storage;
use docrag_text::{extract, split};

use crate::bus::ProgressBus;

type JobRegistry = Arc<Mutex<HashMap<docrag_shared::SiteId, JoinHandle<()>>>>;

/// Everything a crawl job needs, cheap to clone into the spawned task.
#[derive(Clone)]
struct JobContext {
    storage: Arc<Storage>,
    embedder: Arc<dyn Embedder>,
    fetcher: Arc<Fetcher>,
    bus: Arc<ProgressBus>,
    config: CrawlConfig,
}

/// Owns crawl jobs: submission, cancellation, and status.
pub struct CrawlOrchestrator {
    ctx: JobContext,
    jobs: JobRegistry,
}

impl CrawlOrchestrator {
    pub fn new(
        storage: Arc<Storage>,
        embedder: Arc<dyn Embedder>,
        fetcher: Arc<Fetcher>,
        bus: Arc<ProgressBus>,
        config: CrawlConfig,
    ) -> Self {
        Self {
            ctx: JobContext {
                storage,
                embedder,
                fetcher,
                bus,
                config,
            },
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Submit a site for crawling. Persists the record, announces it on the
    /// bus, and spawns the background job. Returns the site in `starting`.
    #[instrument(skip(self))]
    pub async fn submit(&self, url: &str, name: Option<String>) -> Result<Site> {
        let root = Url::parse(url)
            .map_err(|e| DocRagError::validation(format!("invalid URL '{url}': {e}")))?;
        if !matches!(root.scheme(), "http" | "https") {
            return Err(DocRagError::validation(format!(
                "unsupported scheme '{}': only http(s) sites can be crawled",
                root.scheme()
            )));
        }

        let root = normalize_url(&root);
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| root.host_str().unwrap_or("site").to_string());

        let site = Site::new(root.as_str(), name);
        self.ctx.storage.insert_site(&site).await?;
        self.ctx
            .bus
            .publish(CrawlEvent::SiteAdded { site: site.clone() });
        info!(site_id = %site.id, url = %site.url, "site submitted");

        let ctx = self.ctx.clone();
        let jobs = Arc::clone(&self.jobs);
        let job_site = site.clone();
        let handle = tokio::spawn(async move {
            let site_id = job_site.id;
            if let Err(err) = run_job(&ctx, job_site).await {
                fail_site(&ctx, site_id, &err).await;
            }
            jobs.lock().unwrap_or_else(|e| e.into_inner()).remove(&site_id);
        });

        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(site.id, handle);

        Ok(site)
    }

    /// Delete a site: cancel its job if still running, purge its chunks and
    /// record, and announce the deletion. Unknown ids are `NotFound`.
    #[instrument(skip(self))]
    pub async fn delete(&self, site_id: docrag_shared::SiteId) -> Result<Site> {
        self.abort_job(site_id);

        let site = self
            .ctx
            .storage
            .get_site(site_id)
            .await?
            .ok_or_else(|| DocRagError::not_found(site_id.to_string()))?;

        self.ctx.storage.delete_site(site_id).await?;
        self.ctx.bus.publish(CrawlEvent::SiteDeleted { site_id });
        info!(%site_id, "site deleted");
        Ok(site)
    }

    /// Cancel every job and purge all sites and chunks.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        let handles: Vec<JoinHandle<()>> = {
            let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            jobs.drain().map(|(_, h)| h).collect()
        };
        for handle in handles {
            handle.abort();
        }

        self.ctx.storage.clear().await?;
        self.ctx.bus.publish(CrawlEvent::DatabaseCleared);
        Ok(())
    }

    /// Latest durable snapshot for one site.
    pub async fn status(&self, site_id: docrag_shared::SiteId) -> Result<Site> {
        self.ctx
            .storage
            .get_site(site_id)
            .await?
            .ok_or_else(|| DocRagError::not_found(site_id.to_string()))
    }

    fn abort_job(&self, site_id: docrag_shared::SiteId) {
        let handle = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&site_id);
        if let Some(handle) = handle {
            handle.abort();
            debug!(%site_id, "running crawl job aborted");
        }
    }
}

/// Move a site to `error` after a failed job, durably and on the bus.
async fn fail_site(ctx: &JobContext, site_id: docrag_shared::SiteId, err: &DocRagError) {
    warn!(%site_id, error = %err, "crawl job failed");
    if let Ok(Some(mut site)) = ctx.storage.get_site(site_id).await {
        site.status = SiteStatus::Error;
        site.error = Some(err.to_string());
        site.current_url = None;
        site.updated_at = Utc::now();
        if let Err(e) = ctx.storage.update_site(&site).await {
            warn!(%site_id, error = %e, "failed to persist error state");
        }
    }
    ctx.bus.publish(CrawlEvent::CrawlError {
        site_id,
        error: err.to_string(),
    });
}

/// The crawl job body: finding_urls -> crawling -> completed.
async fn run_job(ctx: &JobContext, mut site: Site) -> Result<()> {
    let root = Url::parse(&site.url)
        .map_err(|e| DocRagError::validation(format!("stored root URL is invalid: {e}")))?;

    set_status(ctx, &mut site, SiteStatus::FindingUrls).await?;

    // Sitemap discovery failure is not fatal; BFS covers sitemap-less sites.
    let sitemap_pages = match sitemap::discover(&ctx.fetcher, &root, ctx.config.max_pages).await {
        Ok(pages) => pages,
        Err(e) => {
            warn!(site_id = %site.id, error = %e, "sitemap discovery failed, falling back to BFS");
            Vec::new()
        }
    };

    // Seed the frontier through the visited set: a sitemap may list the same
    // normalized URL more than once, and each page must index exactly once.
    let via_sitemap = !sitemap_pages.is_empty();
    let mut visited: HashSet<String> = HashSet::new();
    let mut frontier: VecDeque<Url> = if via_sitemap {
        sitemap_pages
            .into_iter()
            .filter(|u| visited.insert(u.to_string()))
            .collect()
    } else {
        visited.insert(root.to_string());
        VecDeque::from([root.clone()])
    };
    let known_total = via_sitemap.then_some(frontier.len());

    set_status(ctx, &mut site, SiteStatus::Crawling).await?;
    info!(
        site_id = %site.id,
        via_sitemap,
        queued = frontier.len(),
        "crawl started"
    );

    let scope = CrawlScope::new(&root);
    let semaphore = Arc::new(Semaphore::new(ctx.config.concurrency.max(1)));
    let mut pages_fetched: usize = 0;
    let mut pages_failed: usize = 0;
    let mut last_error: Option<DocRagError> = None;

    while !frontier.is_empty() && pages_fetched + pages_failed < ctx.config.max_pages {
        let budget = ctx.config.max_pages - (pages_fetched + pages_failed);
        let batch_size = frontier.len().min(ctx.config.concurrency.max(1)).min(budget);
        let batch: Vec<Url> = frontier.drain(..batch_size).collect();

        let mut handles = Vec::with_capacity(batch.len());
        for url in batch {
            let fetcher = Arc::clone(&ctx.fetcher);
            let sem = Arc::clone(&semaphore);
            let rate_limit = ctx.config.rate_limit_ms;
            handles.push(tokio::spawn(async move {
                // The semaphore lives as long as the job; acquire cannot fail.
                let _permit = sem.acquire().await.ok();
                if rate_limit > 0 {
                    tokio::time::sleep(Duration::from_millis(rate_limit)).await;
                }
                fetcher.fetch(&url).await
            }));
        }

        for handle in handles {
            let fetched = match handle.await {
                Ok(Ok(page)) => page,
                Ok(Err(err)) => {
                    pages_failed += 1;
                    debug!(site_id = %site.id, error = %err, "page fetch failed");
                    last_error = Some(err);
                    continue;
                }
                Err(join_err) => {
                    pages_failed += 1;
                    last_error = Some(DocRagError::Index(join_err.to_string()));
                    continue;
                }
            };

            pages_fetched += 1;
            index_page(ctx, &mut site, &fetched).await?;

            // BFS mode only: the sitemap already gave us the full page list.
            if known_total.is_none() {
                for link in &fetched.links {
                    if !scope.contains(link) {
                        continue;
                    }
                    let key = link.to_string();
                    if visited.len() < ctx.config.max_pages && visited.insert(key) {
                        frontier.push_back(link.clone());
                    }
                }
            }

            publish_progress(
                ctx,
                &mut site,
                crawl_progress(pages_fetched, frontier.len(), known_total),
                Some(fetched.url.to_string()),
            )
            .await?;
        }
    }

    if pages_fetched == 0 {
        return Err(last_error.unwrap_or_else(|| {
            DocRagError::fetch_permanent(site.url.clone(), "no pages could be fetched")
        }));
    }

    site.status = SiteStatus::Completed;
    site.progress = 100.0;
    site.current_url = None;
    site.total_chunks = Some(site.chunks_added);
    site.updated_at = Utc::now();
    ctx.storage.update_site(&site).await?;
    ctx.bus.publish(CrawlEvent::CrawlCompleted {
        site_id: site.id,
        total_chunks: site.chunks_added,
    });

    info!(
        site_id = %site.id,
        pages_fetched,
        pages_failed,
        total_chunks = site.chunks_added,
        "crawl completed"
    );
    Ok(())
}

/// Extract, chunk, embed, and index one fetched page.
async fn index_page(ctx: &JobContext, site: &mut Site, page: &FetchedPage) -> Result<()> {
    let extracted = extract(&page.html, page.url.as_str())?;
    let chunks: Vec<Chunk> = split(
        &extracted.markdown,
        site.id,
        page.url.as_str(),
        &extracted.title,
    );
    if chunks.is_empty() {
        debug!(url = %page.url, "page produced no chunks");
        return Ok(());
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let embeddings = ctx.embedder.embed(&texts).await?;
    ctx.storage.upsert_chunks(&chunks, &embeddings).await?;

    site.chunks_added += chunks.len() as u64;
    debug!(url = %page.url, chunks = chunks.len(), "page indexed");
    Ok(())
}

/// Progress estimate in percent.
///
/// With a sitemap the denominator is exact. In BFS mode the frontier keeps
/// growing, so the estimate is fetched/(fetched+queued) held below 100 until
/// completion; the caller clamps it monotonic.
fn crawl_progress(fetched: usize, queued: usize, known_total: Option<usize>) -> f32 {
    let raw = match known_total {
        Some(total) if total > 0 => fetched as f32 / total as f32 * 100.0,
        _ => fetched as f32 / (fetched + queued).max(1) as f32 * 100.0,
    };
    raw.min(99.0)
}

async fn publish_progress(
    ctx: &JobContext,
    site: &mut Site,
    progress: f32,
    current_url: Option<String>,
) -> Result<()> {
    site.progress = site.progress.max(progress);
    site.current_url = current_url;
    site.updated_at = Utc::now();
    ctx.storage.update_site(site).await?;
    ctx.bus.publish(CrawlEvent::CrawlProgress {
        site_id: site.id,
        progress: site.progress,
        current_url: site.current_url.clone(),
        chunks_added: site.chunks_added,
    });
    Ok(())
}

async fn set_status(ctx: &JobContext, site: &mut Site, status: SiteStatus) -> Result<()> {
    site.status = status;
    site.updated_at = Utc::now();
    ctx.storage.update_site(site).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_exact_with_known_total() {
        assert_eq!(crawl_progress(5, 0, Some(10)), 50.0);
        // never reports done before the completion event
        assert_eq!(crawl_progress(10, 0, Some(10)), 99.0);
    }

    #[test]
    fn progress_estimates_from_frontier_in_bfs_mode() {
        let early = crawl_progress(1, 9, None);
        let late = crawl_progress(9, 1, None);
        assert!(early < late);
        assert!(late < 100.0);
    }

    #[test]
    fn progress_handles_empty_denominator() {
        assert_eq!(crawl_progress(0, 0, None), 0.0);
    }
}
