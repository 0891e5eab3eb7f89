//! Core domain types for DocRAG sites, chunks, and progress events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SiteId / ChunkId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for site identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub Uuid);

impl SiteId {
    /// Generate a new time-sortable site identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SiteId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SiteId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A UUID v7 wrapper for chunk identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub Uuid);

impl ChunkId {
    /// Generate a new time-sortable chunk identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ChunkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ChunkId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Site
// ---------------------------------------------------------------------------

/// Lifecycle states of a crawl job.
///
/// ```text
/// starting -> finding_urls -> crawling -> completed
/// starting -> finding_urls -> crawling -> error
/// ```
/// Deletion removes the site entirely and is allowed from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    Starting,
    FindingUrls,
    Crawling,
    Completed,
    Error,
}

impl SiteStatus {
    /// Whether this status terminates the crawl attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Database/wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::FindingUrls => "finding_urls",
            Self::Crawling => "crawling",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for SiteStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "finding_urls" => Ok(Self::FindingUrls),
            "crawling" => Ok(Self::Crawling),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown site status: {other}")),
        }
    }
}

/// One crawl target and its current snapshot.
///
/// Mutated only by its owning crawl job; `progress` and `chunks_added` are
/// monotonically non-decreasing within one crawl attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    /// Unique identifier.
    pub id: SiteId,
    /// Root URL of the crawl.
    pub url: String,
    /// Human-readable name (defaults to the URL hostname).
    pub name: String,
    /// Current lifecycle state.
    pub status: SiteStatus,
    /// Crawl progress, 0–100.
    pub progress: f32,
    /// Last URL fetched by the crawl job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    /// Number of chunks written so far.
    pub chunks_added: u64,
    /// Final chunk count, set only at completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u64>,
    /// Error message, set only in the error state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the site was submitted.
    pub created_at: DateTime<Utc>,
    /// When the site record was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl Site {
    /// Build a fresh site record in the `starting` state.
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SiteId::new(),
            url: url.into(),
            name: name.into(),
            status: SiteStatus::Starting,
            progress: 0.0,
            current_url: None,
            chunks_added: 0,
            total_chunks: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// One retrievable passage extracted from a crawled page.
///
/// Immutable once written; a re-crawl creates new chunks. The embedding is
/// owned by the vector index and not carried here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique chunk identifier.
    pub id: ChunkId,
    /// Owning site; cascade-deleted with it.
    pub site_id: SiteId,
    /// URL of the page this chunk came from.
    pub source_url: String,
    /// Nearest preceding header on the source page, or "Untitled".
    pub title: String,
    /// Ordinal within the source page, used for tie-breaking and previews.
    pub position: u32,
    /// The passage text.
    pub text: String,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// An immutable fact appended to a site's progress history.
///
/// Serialized with a `type` tag so the transport layer can forward these to
/// browser clients verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrawlEvent {
    /// A new site was submitted.
    SiteAdded { site: Site },
    /// A crawl job advanced.
    CrawlProgress {
        site_id: SiteId,
        progress: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_url: Option<String>,
        chunks_added: u64,
    },
    /// A crawl job finished successfully.
    CrawlCompleted { site_id: SiteId, total_chunks: u64 },
    /// A crawl job hit an unrecoverable condition.
    CrawlError { site_id: SiteId, error: String },
    /// A site and all of its chunks were removed.
    SiteDeleted { site_id: SiteId },
    /// Every site and the whole index were purged.
    DatabaseCleared,
}

impl CrawlEvent {
    /// The site this event belongs to, if any (`DatabaseCleared` is global).
    pub fn site_id(&self) -> Option<SiteId> {
        match self {
            Self::SiteAdded { site } => Some(site.id),
            Self::CrawlProgress { site_id, .. }
            | Self::CrawlCompleted { site_id, .. }
            | Self::CrawlError { site_id, .. }
            | Self::SiteDeleted { site_id } => Some(*site_id),
            Self::DatabaseCleared => None,
        }
    }
}

/// Incremental output of one chat exchange, in emission order:
/// typing on, sources, zero or more partial answers, the final answer,
/// typing off.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Generation started or stopped.
    Typing { is_typing: bool },
    /// The ranked passages grounding the answer.
    Sources { sources: Vec<SourcePassage> },
    /// Answer text; partial while `is_complete` is false, then the full
    /// accumulated answer with `is_complete: true`.
    Answer { text: String, is_complete: bool },
}

// ---------------------------------------------------------------------------
// SourcePassage
// ---------------------------------------------------------------------------

/// A ranked citation returned by hybrid retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePassage {
    /// Section or page title.
    pub title: String,
    /// Source page URL.
    pub url: String,
    /// Bounded-length excerpt centered on the matched keyword where possible.
    pub preview: String,
    /// Fused retrieval score (comparable within one query only).
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_id_roundtrip() {
        let id = SiteId::new();
        let s = id.to_string();
        let parsed: SiteId = s.parse().expect("parse SiteId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn status_roundtrip() {
        for status in [
            SiteStatus::Starting,
            SiteStatus::FindingUrls,
            SiteStatus::Crawling,
            SiteStatus::Completed,
            SiteStatus::Error,
        ] {
            let parsed: SiteStatus = status.as_str().parse().expect("parse status");
            assert_eq!(parsed, status);
        }
        assert!(SiteStatus::Completed.is_terminal());
        assert!(!SiteStatus::Crawling.is_terminal());
    }

    #[test]
    fn crawl_event_serializes_with_type_tag() {
        let event = CrawlEvent::CrawlCompleted {
            site_id: SiteId::new(),
            total_chunks: 42,
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "crawl_completed");
        assert_eq!(json["total_chunks"], 42);

        let json = serde_json::to_value(CrawlEvent::DatabaseCleared).expect("serialize");
        assert_eq!(json["type"], "database_cleared");
    }

    #[test]
    fn chat_event_serializes_with_type_tag() {
        let json = serde_json::to_value(ChatEvent::Typing { is_typing: true }).expect("serialize");
        assert_eq!(json["type"], "typing");
        assert_eq!(json["is_typing"], true);
    }
}
