//! Sitemap discovery: probe the conventional locations, parse `<loc>`
//! entries, and follow one level of sitemap-index indirection.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};
use url::Url;

use docrag_shared::Result;

use crate::fetcher::{CrawlScope, Fetcher, normalize_url};

/// Conventional sitemap locations, probed in order.
const SITEMAP_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemap1.xml",
    "/sitemap/sitemap.xml",
];

static LOC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<loc>\s*([^<]+?)\s*</loc>").expect("valid regex"));

/// Discover crawlable page URLs from the site's sitemap, if one exists.
///
/// Returns at most `cap` in-scope URLs, or an empty list when no sitemap is
/// found (the caller falls back to link-following BFS).
pub async fn discover(fetcher: &Fetcher, root: &Url, cap: usize) -> Result<Vec<Url>> {
    let Some(xml) = find_sitemap(fetcher, root).await? else {
        debug!(%root, "no sitemap found");
        return Ok(Vec::new());
    };

    let scope = CrawlScope::new(root);
    let entries = parse_locs(&xml);

    let mut urls: Vec<Url> = Vec::new();
    if is_sitemap_index(&xml) {
        // One level of nesting is enough for real doc sites.
        for nested in entries {
            if urls.len() >= cap {
                break;
            }
            if let Some(nested_xml) = fetcher.fetch_text(&nested).await? {
                urls.extend(parse_locs(&nested_xml));
            }
        }
    } else {
        urls = entries;
    }

    let mut seen = HashSet::new();
    urls.retain(|u| scope.contains(u) && seen.insert(u.clone()));
    urls.truncate(cap);

    info!(%root, pages = urls.len(), "sitemap discovered");
    Ok(urls)
}

/// Probe the conventional sitemap paths, returning the first body that
/// parses as a sitemap.
async fn find_sitemap(fetcher: &Fetcher, root: &Url) -> Result<Option<String>> {
    for probe in SITEMAP_PATHS {
        let Ok(candidate) = root.join(probe) else {
            continue;
        };
        if let Some(body) = fetcher.fetch_text(&candidate).await? {
            if body.contains("<urlset") || body.contains("<sitemapindex") {
                debug!(url = %candidate, "sitemap found");
                return Ok(Some(body));
            }
        }
    }
    Ok(None)
}

fn is_sitemap_index(xml: &str) -> bool {
    xml.contains("<sitemapindex")
}

/// All `<loc>` entries in a sitemap document, normalized.
fn parse_locs(xml: &str) -> Vec<Url> {
    LOC_RE
        .captures_iter(xml)
        .filter_map(|c| Url::parse(c[1].trim()).ok())
        .map(|u| normalize_url(&u))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrag_shared::CrawlConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> Fetcher {
        let config = CrawlConfig {
            retry_max_attempts: 1,
            retry_base_delay_ms: 0,
            ..CrawlConfig::default()
        };
        Fetcher::new(&config).unwrap().allow_localhost()
    }

    #[test]
    fn parses_loc_entries() {
        let xml = r#"<?xml version="1.0"?>
            <urlset>
              <loc>https://docs.example.com/a</loc>
              <loc> https://docs.example.com/b/ </loc>
            </urlset>"#;
        let urls = parse_locs(xml);
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].as_str(), "https://docs.example.com/a");
        assert_eq!(urls[1].as_str(), "https://docs.example.com/b");
    }

    #[tokio::test]
    async fn discovers_urls_from_sitemap() {
        let server = MockServer::start().await;
        let sitemap = format!(
            r#"<urlset>
                <url><loc>{0}/page-one</loc></url>
                <url><loc>{0}/page-two</loc></url>
                <url><loc>https://elsewhere.example.com/out-of-scope</loc></url>
            </urlset>"#,
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sitemap))
            .mount(&server)
            .await;

        let root = Url::parse(&server.uri()).unwrap();
        let urls = discover(&fetcher(), &root, 50).await.unwrap();

        assert_eq!(urls.len(), 2);
        assert!(urls[0].as_str().ends_with("/page-one"));
    }

    #[tokio::test]
    async fn follows_sitemap_index() {
        let server = MockServer::start().await;
        let index = format!(
            r#"<sitemapindex><sitemap><loc>{}/sub.xml</loc></sitemap></sitemapindex>"#,
            server.uri()
        );
        let sub = format!(
            r#"<urlset><url><loc>{}/nested-page</loc></url></urlset>"#,
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sub.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sub))
            .mount(&server)
            .await;

        let root = Url::parse(&server.uri()).unwrap();
        let urls = discover(&fetcher(), &root, 50).await.unwrap();

        assert_eq!(urls.len(), 1);
        assert!(urls[0].as_str().ends_with("/nested-page"));
    }

    #[tokio::test]
    async fn drops_repeated_entries_anywhere_in_the_list() {
        let server = MockServer::start().await;
        let sitemap = format!(
            r#"<urlset>
                <url><loc>{0}/guide</loc></url>
                <url><loc>{0}/reference</loc></url>
                <url><loc>{0}/guide</loc></url>
            </urlset>"#,
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sitemap))
            .mount(&server)
            .await;

        let root = Url::parse(&server.uri()).unwrap();
        let urls = discover(&fetcher(), &root, 50).await.unwrap();

        assert_eq!(urls.len(), 2);
        assert!(urls[0].as_str().ends_with("/guide"));
        assert!(urls[1].as_str().ends_with("/reference"));
    }

    #[tokio::test]
    async fn missing_sitemap_is_empty_not_error() {
        let server = MockServer::start().await;
        let root = Url::parse(&server.uri()).unwrap();
        let urls = discover(&fetcher(), &root, 50).await.unwrap();
        assert!(urls.is_empty());
    }

    #[tokio::test]
    async fn respects_cap() {
        let server = MockServer::start().await;
        let body: String = (0..20)
            .map(|i| format!("<loc>{}/p{i}</loc>", server.uri()))
            .collect();
        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(format!("<urlset>{body}</urlset>")),
            )
            .mount(&server)
            .await;

        let root = Url::parse(&server.uri()).unwrap();
        let urls = discover(&fetcher(), &root, 5).await.unwrap();
        assert_eq!(urls.len(), 5);
    }
}
