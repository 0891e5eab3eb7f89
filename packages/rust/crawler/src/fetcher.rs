//! Single-page fetching with retry, SSRF protection, link extraction, and
//! canonical URL normalization.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use docrag_shared::{CrawlConfig, DocRagError, Result, RetryPolicy};

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("DocRAG/", env!("CARGO_PKG_VERSION"));

/// One successfully fetched HTML page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Normalized URL the page was fetched from.
    pub url: Url,
    /// HTTP status code.
    pub status: u16,
    /// Raw HTML body.
    pub html: String,
    /// Outbound links, resolved and normalized (not yet scope-filtered).
    pub links: Vec<Url>,
}

/// HTTP fetcher shared by every crawl job.
pub struct Fetcher {
    client: Client,
    retry: RetryPolicy,
    allow_localhost: bool,
}

impl Fetcher {
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| {
                DocRagError::fetch_permanent("client", format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            retry: RetryPolicy::new(config.retry_max_attempts, config.retry_base_delay_ms),
            allow_localhost: false,
        })
    }

    /// Permit loopback and private-range targets (local doc servers, tests).
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    /// Fetch one page, retrying transient failures, and extract its links.
    pub async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
        if !self.allow_localhost && is_ssrf_target(url) {
            warn!(%url, "blocked private or non-HTTP target");
            return Err(DocRagError::fetch_permanent(
                url.as_str(),
                "private or non-HTTP target",
            ));
        }

        let (status, html) = self
            .retry
            .run(|| self.fetch_once(url, true))
            .await?;

        let base = normalize_url(url);
        let links = extract_links(&html, &base);
        debug!(url = %base, status, links = links.len(), "page fetched");

        Ok(FetchedPage {
            url: base,
            status,
            html,
            links,
        })
    }

    /// Fetch a URL's body as text without HTML requirements (sitemaps).
    /// Returns `None` for any non-success status.
    pub async fn fetch_text(&self, url: &Url) -> Result<Option<String>> {
        if !self.allow_localhost && is_ssrf_target(url) {
            return Ok(None);
        }
        match self.retry.run(|| self.fetch_once(url, false)).await {
            Ok((_, body)) => Ok(Some(body)),
            Err(err) if err.is_transient() => Err(err),
            Err(_) => Ok(None),
        }
    }

    /// One HTTP attempt, classified transient or permanent for retry.
    async fn fetch_once(&self, url: &Url, require_html: bool) -> Result<(u16, String)> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| DocRagError::fetch_transient(url.as_str(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("HTTP {status}");
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(DocRagError::fetch_transient(url.as_str(), message))
            } else {
                Err(DocRagError::fetch_permanent(url.as_str(), message))
            };
        }

        if require_html {
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("text/html");
            if !content_type.contains("html") {
                return Err(DocRagError::fetch_permanent(
                    url.as_str(),
                    format!("unsupported content type: {content_type}"),
                ));
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| DocRagError::fetch_transient(url.as_str(), format!("body read: {e}")))?;

        Ok((status.as_u16(), body))
    }
}

/// Extract anchors from HTML, resolved against the page URL and normalized.
fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let doc = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut links = Vec::new();
    for el in doc.select(&selector) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        if href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:")
        {
            continue;
        }
        if let Ok(resolved) = base.join(href) {
            links.push(normalize_url(&resolved));
        }
    }
    links
}

/// Canonicalize a URL so equivalent spellings dedup to one frontier entry:
/// fragment dropped, query pairs sorted, trailing slash stripped off
/// non-root paths.
pub fn normalize_url(url: &Url) -> Url {
    let mut normalized = url.clone();
    normalized.set_fragment(None);

    let mut pairs: Vec<(String, String)> = normalized
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        normalized.set_query(None);
    } else {
        pairs.sort();
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        normalized.set_query(Some(&query));
    }

    let path = normalized.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        normalized.set_path(path.trim_end_matches('/'));
    }

    normalized
}

/// Crawl scope: same host as the root URL, http(s) only.
#[derive(Debug, Clone)]
pub struct CrawlScope {
    host: String,
}

impl CrawlScope {
    pub fn new(root: &Url) -> Self {
        Self {
            host: root.host_str().unwrap_or_default().to_string(),
        }
    }

    pub fn contains(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
            && url.host_str().unwrap_or_default() == self.host
    }
}

/// Block non-HTTP schemes and private or loopback hosts.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") {
            return true;
        }
    }
    false
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
