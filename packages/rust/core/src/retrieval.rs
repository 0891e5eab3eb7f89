//! Hybrid retrieval: keyword (FTS5/bm25) and vector (cosine) candidates
//! fused with Reciprocal Rank Fusion.
//!
//! RRF scores each candidate `sum(1 / (C + rank))` over the lists it appears
//! in, with `C = 60` and 1-based ranks. Candidates found by both searches
//! rise; ties break by chunk id so the same query over the same index always
//! returns the same ordering.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument};

use docrag_embedder::Embedder;
use docrag_shared::{Chunk, ChunkId, Result, SourcePassage};
use docrag_storage::Storage;

/// RRF smoothing constant.
const RRF_C: f64 = 60.0;

/// Candidates pulled from each index per requested result.
const CANDIDATE_FACTOR: usize = 3;

/// Maximum preview excerpt length in bytes.
const PREVIEW_LEN: usize = 240;

/// Fused keyword+vector search over the chunk index.
pub struct HybridRetriever {
    storage: Arc<Storage>,
    embedder: Arc<dyn Embedder>,
}

impl HybridRetriever {
    pub fn new(storage: Arc<Storage>, embedder: Arc<dyn Embedder>) -> Self {
        Self { storage, embedder }
    }

    /// Top-`k` passages for a query. An empty index or a query with no
    /// matches yields an empty list, never an error.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SourcePassage>> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let n = k * CANDIDATE_FACTOR;

        let keyword = self.storage.keyword_search(query, n).await?;

        // Embedding trouble degrades to keyword-only rather than failing
        // the whole query.
        let vector = match self.embedder.embed(&[query.to_string()]).await {
            Ok(vecs) => match vecs.first() {
                Some(v) => self.storage.vector_search(v, n).await?,
                None => Vec::new(),
            },
            Err(err) => {
                tracing::warn!(error = %err, "query embedding failed, keyword-only search");
                Vec::new()
            }
        };

        debug!(
            keyword_hits = keyword.len(),
            vector_hits = vector.len(),
            "candidate lists fetched"
        );

        let fused = fuse(&keyword, &vector, k);
        if fused.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<ChunkId> = fused.iter().map(|(id, _)| *id).collect();
        let chunks = self.storage.get_chunks(&ids).await?;
        let by_id: HashMap<ChunkId, Chunk> = chunks.into_iter().map(|c| (c.id, c)).collect();

        Ok(fused
            .into_iter()
            .filter_map(|(id, score)| {
                let chunk = by_id.get(&id)?;
                Some(SourcePassage {
                    title: chunk.title.clone(),
                    url: chunk.source_url.clone(),
                    preview: preview(&chunk.text, query),
                    score,
                })
            })
            .collect())
    }
}

/// Reciprocal Rank Fusion over the two ranked candidate lists.
fn fuse(
    keyword: &[(ChunkId, f64)],
    vector: &[(ChunkId, f64)],
    k: usize,
) -> Vec<(ChunkId, f64)> {
    let mut scores: HashMap<ChunkId, f64> = HashMap::new();

    for list in [keyword, vector] {
        for (rank, (id, _)) in list.iter().enumerate() {
            *scores.entry(*id).or_insert(0.0) += 1.0 / (RRF_C + (rank + 1) as f64);
        }
    }

    let mut fused: Vec<(ChunkId, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused.truncate(k);
    fused
}

/// Bounded excerpt, centered on the first query term found in the text.
fn preview(text: &str, query: &str) -> String {
    let haystack = text.to_lowercase();
    let hit = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .filter_map(|t| haystack.find(&t.to_lowercase()))
        .min();

    let (start, end) = match hit {
        Some(pos) if text.len() > PREVIEW_LEN => {
            let half = PREVIEW_LEN / 2;
            let start = floor_boundary(text, pos.saturating_sub(half));
            let end = floor_boundary(text, (start + PREVIEW_LEN).min(text.len()));
            (start, end)
        }
        _ => (0, floor_boundary(text, PREVIEW_LEN.min(text.len()))),
    };

    let mut excerpt = text[start..end].trim().to_string();
    if start > 0 {
        excerpt.insert_str(0, "…");
    }
    if end < text.len() {
        excerpt.push('…');
    }
    excerpt
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
