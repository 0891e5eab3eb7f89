//! HTML page extraction: isolate the content region, convert it to Markdown,
//! and pick a page title.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use docrag_shared::{DocRagError, Result};

/// Content containers used by common documentation generators, tried in
/// priority order before falling back to `<body>`.
const CONTENT_SELECTORS: &[&str] = &[
    "article .markdown",  // Docusaurus
    ".vp-doc",            // VitePress
    ".markdown-section",  // GitBook
    "[role=\"main\"]",    // ReadTheDocs / generic
    "article",
    "main",
    ".content",
];

/// Markdown and title extracted from one HTML page.
#[derive(Debug, Clone)]
pub struct ExtractResult {
    pub markdown: String,
    pub title: String,
}

/// Convert an HTML page to Markdown and determine its title.
///
/// Title preference: `<title>` element, then the first Markdown H1, then
/// "Untitled".
pub fn extract(html: &str, url: &str) -> Result<ExtractResult> {
    let doc = Html::parse_document(html);

    let content_html = content_region(&doc, html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "nav", "header", "footer", "aside", "iframe", "noscript", "svg",
        ])
        .build();

    let raw = converter
        .convert(&content_html)
        .map_err(|e| DocRagError::Index(format!("markdown conversion failed for {url}: {e}")))?;

    let markdown = tidy(&raw);

    let title = title_element(&doc)
        .or_else(|| first_h1(&markdown))
        .unwrap_or_else(|| "Untitled".to_string());

    debug!(url, title = %title, markdown_len = markdown.len(), "page extracted");

    Ok(ExtractResult { markdown, title })
}

/// Inner HTML of the best content container, or the raw page if the document
/// has no recognizable structure.
fn content_region(doc: &Html, raw: &str) -> String {
    for sel_str in CONTENT_SELECTORS {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    if let Ok(body_sel) = Selector::parse("body") {
        if let Some(body) = doc.select(&body_sel).next() {
            return body.inner_html();
        }
    }

    raw.to_string()
}

fn title_element(doc: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let title = doc
        .select(&selector)
        .next()?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    (!title.is_empty()).then_some(title)
}

fn first_h1(markdown: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid regex"));

    H1_RE.captures(markdown).map(|c| c[1].trim().to_string())
}

/// Collapse runs of blank lines and trim the edges.
fn tidy(markdown: &str) -> String {
    static BLANKS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    BLANKS_RE.replace_all(markdown, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_main_content_and_title() {
        let html = r#"<html><head><title>Install Guide</title></head><body>
            <nav><a href="/">Home</a></nav>
            <main><h1>Installation</h1><p>Run the installer.</p></main>
            <footer>Copyright</footer>
        </body></html>"#;

        let result = extract(html, "https://docs.example.com/install").unwrap();
        assert_eq!(result.title, "Install Guide");
        assert!(result.markdown.contains("# Installation"));
        assert!(result.markdown.contains("Run the installer."));
        assert!(!result.markdown.contains("Copyright"));
        assert!(!result.markdown.contains("Home"));
    }

    #[test]
    fn falls_back_to_h1_title() {
        let html = "<html><body><main><h1>Quickstart</h1><p>Hello.</p></main></body></html>";
        let result = extract(html, "https://docs.example.com/qs").unwrap();
        assert_eq!(result.title, "Quickstart");
    }

    #[test]
    fn untitled_page_gets_placeholder() {
        let html = "<html><body><p>no headings here</p></body></html>";
        let result = extract(html, "https://docs.example.com/x").unwrap();
        assert_eq!(result.title, "Untitled");
    }

    #[test]
    fn strips_scripts_and_styles() {
        let html = r#"<html><body><main>
            <script>alert("hi")</script>
            <style>.x { color: red }</style>
            <p>Visible text.</p>
        </main></body></html>"#;

        let result = extract(html, "https://docs.example.com/").unwrap();
        assert!(result.markdown.contains("Visible text."));
        assert!(!result.markdown.contains("alert"));
        assert!(!result.markdown.contains("color: red"));
    }

    #[test]
    fn collapses_blank_runs() {
        let html = "<html><body><main><p>a</p><br><br><br><p>b</p></main></body></html>";
        let result = extract(html, "https://docs.example.com/").unwrap();
        assert!(!result.markdown.contains("\n\n\n"));
    }
}
