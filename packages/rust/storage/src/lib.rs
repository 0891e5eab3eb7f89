//! libSQL storage layer: durable site records, chunk store, and both halves
//! of the hybrid index.
//!
//! The [`Storage`] struct wraps a libSQL database holding site snapshots and
//! chunks. It exposes the vector-index contract (`upsert_chunks`,
//! `delete_chunks_by_site`, `vector_search`, `clear`) and the FTS5 keyword
//! index (`keyword_search`). Embeddings are stored as little-endian `f32`
//! BLOBs and scored with cosine similarity; keyword matches rank by bm25.
//!
//! Writers are serialized behind one async lock, and every multi-statement
//! transaction runs on its own connection. Concurrent crawl jobs can never
//! interleave transaction statements, and a job cancelled mid-batch takes
//! its open transaction down with its connection instead of leaving it on a
//! shared one. Readers never observe a partially written chunk batch.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, Row, Value, params};
use tokio::sync::Mutex;
use tracing::{debug, info};

use docrag_shared::{Chunk, ChunkId, DocRagError, Result, Site, SiteId, SiteStatus};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl Storage {
    /// Open or create a database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DocRagError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DocRagError::Index(e.to_string()))?;

        let conn = db.connect().map_err(|e| DocRagError::Index(e.to_string()))?;

        conn.execute("PRAGMA foreign_keys = ON", params![])
            .await
            .map_err(|e| DocRagError::Index(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            write_lock: Mutex::new(()),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Dedicated connection for one write transaction. If the owning task is
    /// cancelled mid-transaction, dropping the connection rolls it back; the
    /// shared connection is never left inside an open transaction.
    async fn tx_conn(&self) -> Result<Connection> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DocRagError::Index(e.to_string()))?;
        conn.execute("PRAGMA foreign_keys = ON", params![])
            .await
            .map_err(|e| DocRagError::Index(e.to_string()))?;
        Ok(conn)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    DocRagError::Index(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Site operations
    // -----------------------------------------------------------------------

    /// Insert a new site record.
    pub async fn insert_site(&self, site: &Site) -> Result<()> {
        let _write = self.write_lock.lock().await;
        self.conn
            .execute(
                "INSERT INTO sites (id, url, name, status, progress, current_url,
                                    chunks_added, total_chunks, error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    site.id.to_string(),
                    site.url.as_str(),
                    site.name.as_str(),
                    site.status.as_str(),
                    site.progress as f64,
                    site.current_url.as_deref(),
                    site.chunks_added as i64,
                    site.total_chunks.map(|t| t as i64),
                    site.error.as_deref(),
                    site.created_at.to_rfc3339(),
                    site.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DocRagError::Index(e.to_string()))?;
        Ok(())
    }

    /// Overwrite a site's snapshot (status, progress, counters).
    pub async fn update_site(&self, site: &Site) -> Result<()> {
        let _write = self.write_lock.lock().await;
        self.conn
            .execute(
                "UPDATE sites SET url = ?2, name = ?3, status = ?4, progress = ?5,
                                  current_url = ?6, chunks_added = ?7, total_chunks = ?8,
                                  error = ?9, created_at = ?10, updated_at = ?11
                 WHERE id = ?1",
                params![
                    site.id.to_string(),
                    site.url.as_str(),
                    site.name.as_str(),
                    site.status.as_str(),
                    site.progress as f64,
                    site.current_url.as_deref(),
                    site.chunks_added as i64,
                    site.total_chunks.map(|t| t as i64),
                    site.error.as_deref(),
                    site.created_at.to_rfc3339(),
                    site.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DocRagError::Index(e.to_string()))?;
        Ok(())
    }

    /// Get a site snapshot by id.
    pub async fn get_site(&self, id: SiteId) -> Result<Option<Site>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, url, name, status, progress, current_url,
                        chunks_added, total_chunks, error, created_at, updated_at
                 FROM sites WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DocRagError::Index(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_site(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DocRagError::Index(e.to_string())),
        }
    }

    /// List all sites, newest first.
    pub async fn list_sites(&self) -> Result<Vec<Site>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, url, name, status, progress, current_url,
                        chunks_added, total_chunks, error, created_at, updated_at
                 FROM sites ORDER BY created_at DESC",
                params![],
            )
            .await
            .map_err(|e| DocRagError::Index(e.to_string()))?;

        let mut sites = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            sites.push(row_to_site(&row)?);
        }
        Ok(sites)
    }

    /// Delete a site and all of its chunks in one transaction.
    /// Returns false if the id was unknown.
    pub async fn delete_site(&self, id: SiteId) -> Result<bool> {
        let _write = self.write_lock.lock().await;
        let conn = self.tx_conn().await?;

        conn.execute("BEGIN", params![])
            .await
            .map_err(|e| DocRagError::Index(e.to_string()))?;

        // Explicit chunk delete keeps the FTS triggers firing even if the
        // connection was opened without foreign_keys.
        if let Err(e) = conn
            .execute(
                "DELETE FROM chunks WHERE site_id = ?1",
                params![id.to_string()],
            )
            .await
        {
            let _ = conn.execute("ROLLBACK", params![]).await;
            return Err(DocRagError::Index(e.to_string()));
        }

        let affected = match conn
            .execute("DELETE FROM sites WHERE id = ?1", params![id.to_string()])
            .await
        {
            Ok(n) => n,
            Err(e) => {
                let _ = conn.execute("ROLLBACK", params![]).await;
                return Err(DocRagError::Index(e.to_string()));
            }
        };

        conn.execute("COMMIT", params![])
            .await
            .map_err(|e| DocRagError::Index(e.to_string()))?;
        Ok(affected > 0)
    }

    /// Restart recovery: any site left in a non-terminal state by a previous
    /// process is moved to `error` (in-flight job state is not durable).
    pub async fn mark_interrupted_sites(&self) -> Result<u64> {
        let _write = self.write_lock.lock().await;
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn
            .execute(
                "UPDATE sites
                 SET status = 'error', error = 'crawl interrupted by process restart',
                     updated_at = ?1
                 WHERE status IN ('starting', 'finding_urls', 'crawling')",
                params![now],
            )
            .await
            .map_err(|e| DocRagError::Index(e.to_string()))?;
        if affected > 0 {
            info!(count = affected, "marked interrupted crawls as errored");
        }
        Ok(affected)
    }

    // -----------------------------------------------------------------------
    // Chunk / vector index operations
    // -----------------------------------------------------------------------

    /// Insert a batch of chunks with their embeddings in one transaction.
    pub async fn upsert_chunks(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<()> {
        if chunks.len() != embeddings.len() {
            return Err(DocRagError::Index(format!(
                "chunk/embedding count mismatch: {} vs {}",
                chunks.len(),
                embeddings.len()
            )));
        }
        if chunks.is_empty() {
            return Ok(());
        }

        let _write = self.write_lock.lock().await;
        let conn = self.tx_conn().await?;

        conn.execute("BEGIN", params![])
            .await
            .map_err(|e| DocRagError::Index(e.to_string()))?;

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let result = conn
                .execute(
                    "INSERT INTO chunks (id, site_id, source_url, title, position, text, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        chunk.id.to_string(),
                        chunk.site_id.to_string(),
                        chunk.source_url.as_str(),
                        chunk.title.as_str(),
                        chunk.position as i64,
                        chunk.text.as_str(),
                        embedding_to_blob(embedding),
                    ],
                )
                .await;

            if let Err(e) = result {
                let _ = conn.execute("ROLLBACK", params![]).await;
                return Err(DocRagError::Index(e.to_string()));
            }
        }

        conn.execute("COMMIT", params![])
            .await
            .map_err(|e| DocRagError::Index(e.to_string()))?;

        debug!(count = chunks.len(), "chunk batch committed");
        Ok(())
    }

    /// Remove every chunk belonging to `site_id` from the store and both
    /// indexes. Subsequent searches never return the site's content.
    pub async fn delete_chunks_by_site(&self, site_id: SiteId) -> Result<u64> {
        let _write = self.write_lock.lock().await;
        self.conn
            .execute(
                "DELETE FROM chunks WHERE site_id = ?1",
                params![site_id.to_string()],
            )
            .await
            .map_err(|e| DocRagError::Index(e.to_string()))
    }

    /// Number of chunks stored for a site.
    pub async fn count_chunks_by_site(&self, site_id: SiteId) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM chunks WHERE site_id = ?1",
                params![site_id.to_string()],
            )
            .await
            .map_err(|e| DocRagError::Index(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(column_i64(&row, 0)? as u64),
            _ => Ok(0),
        }
    }

    /// Brute-force cosine similarity search over all stored embeddings.
    ///
    /// Scores are comparable only within a single call. Ties break by chunk
    /// id ascending so results are fully deterministic.
    pub async fn vector_search(&self, query: &[f32], n: usize) -> Result<Vec<(ChunkId, f64)>> {
        let mut rows = self
            .conn
            .query("SELECT id, embedding FROM chunks", params![])
            .await
            .map_err(|e| DocRagError::Index(e.to_string()))?;

        let mut scored: Vec<(ChunkId, f64)> = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id = column_chunk_id(&row, 0)?;
            let blob = match row.get_value(1) {
                Ok(Value::Blob(bytes)) => bytes,
                _ => continue,
            };
            let embedding = blob_to_embedding(&blob);
            if embedding.len() != query.len() {
                continue; // stale dimension from an older model; skip
            }
            scored.push((id, cosine_similarity(query, &embedding)));
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(n);
        Ok(scored)
    }

    /// Keyword search via the FTS5 index, bm25-ranked.
    ///
    /// The query is tokenized and quoted before matching; if FTS rejects the
    /// expression a plain token-overlap scan is used instead.
    pub async fn keyword_search(&self, query: &str, n: usize) -> Result<Vec<(ChunkId, f64)>> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let match_expr = tokens
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR ");

        let fts = self
            .conn
            .query(
                "SELECT chunks.id, bm25(chunks_fts) AS rank
                 FROM chunks_fts
                 JOIN chunks ON chunks.rowid = chunks_fts.rowid
                 WHERE chunks_fts MATCH ?1
                 ORDER BY rank, chunks.id
                 LIMIT ?2",
                params![match_expr, n as i64],
            )
            .await;

        match fts {
            Ok(mut rows) => {
                let mut results = Vec::new();
                while let Ok(Some(row)) = rows.next().await {
                    let id = column_chunk_id(&row, 0)?;
                    let rank = row
                        .get::<f64>(1)
                        .map_err(|e| DocRagError::Index(e.to_string()))?;
                    // bm25() is smaller-is-better; flip so callers rank descending.
                    results.push((id, -rank));
                }
                Ok(results)
            }
            Err(e) => {
                debug!(error = %e, "FTS match failed, falling back to token-overlap scan");
                self.token_overlap_scan(&tokens, n).await
            }
        }
    }

    /// Fallback keyword matcher: score = number of distinct query tokens
    /// contained in the chunk text.
    async fn token_overlap_scan(&self, tokens: &[String], n: usize) -> Result<Vec<(ChunkId, f64)>> {
        let mut rows = self
            .conn
            .query("SELECT id, text, title FROM chunks", params![])
            .await
            .map_err(|e| DocRagError::Index(e.to_string()))?;

        let mut scored: Vec<(ChunkId, f64)> = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id = column_chunk_id(&row, 0)?;
            let text = row
                .get::<String>(1)
                .map_err(|e| DocRagError::Index(e.to_string()))?
                .to_lowercase();
            let title = row
                .get::<String>(2)
                .map_err(|e| DocRagError::Index(e.to_string()))?
                .to_lowercase();

            let hits = tokens
                .iter()
                .filter(|t| text.contains(t.as_str()) || title.contains(t.as_str()))
                .count();
            if hits > 0 {
                scored.push((id, hits as f64));
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(n);
        Ok(scored)
    }

    /// Load chunks by id, returned in the order requested.
    pub async fn get_chunks(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::with_capacity(ids.len());
        for id in ids {
            let mut rows = self
                .conn
                .query(
                    "SELECT id, site_id, source_url, title, position, text
                     FROM chunks WHERE id = ?1",
                    params![id.to_string()],
                )
                .await
                .map_err(|e| DocRagError::Index(e.to_string()))?;

            if let Ok(Some(row)) = rows.next().await {
                chunks.push(row_to_chunk(&row)?);
            }
        }
        Ok(chunks)
    }

    /// Purge every site, chunk, and index entry in one transaction.
    pub async fn clear(&self) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let conn = self.tx_conn().await?;

        conn.execute("BEGIN", params![])
            .await
            .map_err(|e| DocRagError::Index(e.to_string()))?;
        for stmt in ["DELETE FROM chunks", "DELETE FROM sites"] {
            if let Err(e) = conn.execute(stmt, params![]).await {
                let _ = conn.execute("ROLLBACK", params![]).await;
                return Err(DocRagError::Index(e.to_string()));
            }
        }
        conn.execute("COMMIT", params![])
            .await
            .map_err(|e| DocRagError::Index(e.to_string()))?;

        info!("database cleared");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row / value helpers
// ---------------------------------------------------------------------------

fn row_to_site(row: &Row) -> Result<Site> {
    let status_str = column_text(row, 3)?;
    let status: SiteStatus = status_str.parse().map_err(DocRagError::Index)?;

    Ok(Site {
        id: parse_site_id(&column_text(row, 0)?)?,
        url: column_text(row, 1)?,
        name: column_text(row, 2)?,
        status,
        progress: column_f64(row, 4)? as f32,
        current_url: column_opt_text(row, 5)?,
        chunks_added: column_i64(row, 6)? as u64,
        total_chunks: column_opt_i64(row, 7)?.map(|t| t as u64),
        error: column_opt_text(row, 8)?,
        created_at: parse_timestamp(&column_text(row, 9)?)?,
        updated_at: parse_timestamp(&column_text(row, 10)?)?,
    })
}

fn row_to_chunk(row: &Row) -> Result<Chunk> {
    Ok(Chunk {
        id: column_chunk_id(row, 0)?,
        site_id: parse_site_id(&column_text(row, 1)?)?,
        source_url: column_text(row, 2)?,
        title: column_text(row, 3)?,
        position: column_i64(row, 4)? as u32,
        text: column_text(row, 5)?,
    })
}

fn column_text(row: &Row, idx: i32) -> Result<String> {
    row.get::<String>(idx)
        .map_err(|e| DocRagError::Index(e.to_string()))
}

fn column_opt_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx) {
        Ok(Value::Null) => Ok(None),
        Ok(Value::Text(s)) => Ok(Some(s)),
        Ok(other) => Err(DocRagError::Index(format!(
            "expected text at column {idx}, got {other:?}"
        ))),
        Err(e) => Err(DocRagError::Index(e.to_string())),
    }
}

fn column_i64(row: &Row, idx: i32) -> Result<i64> {
    row.get::<i64>(idx)
        .map_err(|e| DocRagError::Index(e.to_string()))
}

fn column_opt_i64(row: &Row, idx: i32) -> Result<Option<i64>> {
    match row.get_value(idx) {
        Ok(Value::Null) => Ok(None),
        Ok(Value::Integer(v)) => Ok(Some(v)),
        Ok(other) => Err(DocRagError::Index(format!(
            "expected integer at column {idx}, got {other:?}"
        ))),
        Err(e) => Err(DocRagError::Index(e.to_string())),
    }
}

fn column_f64(row: &Row, idx: i32) -> Result<f64> {
    row.get::<f64>(idx)
        .map_err(|e| DocRagError::Index(e.to_string()))
}

fn column_chunk_id(row: &Row, idx: i32) -> Result<ChunkId> {
    column_text(row, idx)?
        .parse::<ChunkId>()
        .map_err(|e| DocRagError::Index(format!("bad chunk id: {e}")))
}

fn parse_site_id(s: &str) -> Result<SiteId> {
    s.parse::<SiteId>()
        .map_err(|e| DocRagError::Index(format!("bad site id: {e}")))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DocRagError::Index(format!("bad timestamp '{s}': {e}")))
}

// ---------------------------------------------------------------------------
// Embedding encoding and scoring
// ---------------------------------------------------------------------------

/// Encode an embedding as little-endian f32 bytes.
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode little-endian f32 bytes back into an embedding.
fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect()
}

/// Cosine similarity in f64 to keep ranking stable for near-ties.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for (x, y) in a.iter().zip(b) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Lowercased alphanumeric tokens of a query string.
fn tokenize(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn temp_storage(tag: &str) -> (Storage, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("docrag-storage-{tag}-{}", Uuid::now_v7()));
        let storage = Storage::open(&dir.join("test.db")).await.unwrap();
        (storage, dir)
    }

    fn sample_chunk(site_id: SiteId, position: u32, text: &str) -> Chunk {
        Chunk {
            id: ChunkId::new(),
            site_id,
            source_url: "https://docs.example.com/guide".into(),
            title: "Guide".into(),
            position,
            text: text.into(),
        }
    }

    #[test]
    fn embedding_blob_roundtrip() {
        let embedding = vec![0.25f32, -1.5, 3.0, 0.0];
        let blob = embedding_to_blob(&embedding);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_embedding(&blob), embedding);
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn site_crud_roundtrip() {
        let (storage, dir) = temp_storage("site-crud").await;

        let mut site = Site::new("https://docs.example.com", "example docs");
        storage.insert_site(&site).await.unwrap();

        let loaded = storage.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "example docs");
        assert_eq!(loaded.status, SiteStatus::Starting);

        site.status = SiteStatus::Completed;
        site.progress = 100.0;
        site.total_chunks = Some(7);
        storage.update_site(&site).await.unwrap();

        let loaded = storage.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SiteStatus::Completed);
        assert_eq!(loaded.total_chunks, Some(7));

        assert!(storage.delete_site(site.id).await.unwrap());
        assert!(!storage.delete_site(site.id).await.unwrap());
        assert!(storage.get_site(site.id).await.unwrap().is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn vector_search_ranks_by_similarity() {
        let (storage, dir) = temp_storage("vector").await;

        let site = Site::new("https://docs.example.com", "docs");
        storage.insert_site(&site).await.unwrap();

        let chunks = vec![
            sample_chunk(site.id, 0, "alpha"),
            sample_chunk(site.id, 1, "beta"),
            sample_chunk(site.id, 2, "gamma"),
        ];
        let embeddings = vec![
            vec![1.0f32, 0.0, 0.0],
            vec![0.0f32, 1.0, 0.0],
            vec![0.9f32, 0.1, 0.0],
        ];
        storage.upsert_chunks(&chunks, &embeddings).await.unwrap();

        let results = storage.vector_search(&[1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, chunks[0].id);
        assert_eq!(results[1].0, chunks[2].id);
        assert!(results[0].1 > results[1].1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn keyword_search_finds_matching_chunks() {
        let (storage, dir) = temp_storage("keyword").await;

        let site = Site::new("https://docs.example.com", "docs");
        storage.insert_site(&site).await.unwrap();

        let chunks = vec![
            sample_chunk(site.id, 0, "Run pip install to set up the package."),
            sample_chunk(site.id, 1, "The configuration file lives in the home directory."),
        ];
        let embeddings = vec![vec![1.0f32, 0.0], vec![0.0f32, 1.0]];
        storage.upsert_chunks(&chunks, &embeddings).await.unwrap();

        let results = storage.keyword_search("install package", 5).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].0, chunks[0].id);

        let empty = storage.keyword_search("???", 5).await.unwrap();
        assert!(empty.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn delete_by_site_purges_both_indexes() {
        let (storage, dir) = temp_storage("delete").await;

        let keep = Site::new("https://keep.example.com", "keep");
        let drop = Site::new("https://drop.example.com", "drop");
        storage.insert_site(&keep).await.unwrap();
        storage.insert_site(&drop).await.unwrap();

        let keep_chunk = sample_chunk(keep.id, 0, "install the keeper tool");
        let drop_chunk = sample_chunk(drop.id, 0, "install the dropper tool");
        storage
            .upsert_chunks(
                &[keep_chunk.clone(), drop_chunk.clone()],
                &[vec![1.0f32, 0.0], vec![0.9f32, 0.1]],
            )
            .await
            .unwrap();

        storage.delete_chunks_by_site(drop.id).await.unwrap();

        let vector = storage.vector_search(&[1.0, 0.0], 10).await.unwrap();
        assert!(vector.iter().all(|(id, _)| *id != drop_chunk.id));

        let keyword = storage.keyword_search("install", 10).await.unwrap();
        assert_eq!(keyword.len(), 1);
        assert_eq!(keyword[0].0, keep_chunk.id);

        assert_eq!(storage.count_chunks_by_site(drop.id).await.unwrap(), 0);
        assert_eq!(storage.count_chunks_by_site(keep.id).await.unwrap(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn clear_empties_everything() {
        let (storage, dir) = temp_storage("clear").await;

        let site = Site::new("https://docs.example.com", "docs");
        storage.insert_site(&site).await.unwrap();
        storage
            .upsert_chunks(
                &[sample_chunk(site.id, 0, "some indexed text")],
                &[vec![1.0f32]],
            )
            .await
            .unwrap();

        storage.clear().await.unwrap();

        assert!(storage.list_sites().await.unwrap().is_empty());
        assert!(storage.vector_search(&[1.0], 10).await.unwrap().is_empty());
        assert!(
            storage
                .keyword_search("indexed", 10)
                .await
                .unwrap()
                .is_empty()
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn concurrent_chunk_batches_commit_independently() {
        let (storage, dir) = temp_storage("concurrent").await;
        let storage = std::sync::Arc::new(storage);

        let site_a = Site::new("https://a.example.com", "a");
        let site_b = Site::new("https://b.example.com", "b");
        storage.insert_site(&site_a).await.unwrap();
        storage.insert_site(&site_b).await.unwrap();

        // Ten writers racing on two sites, as concurrent crawl jobs do.
        let mut handles = Vec::new();
        for task in 0..10u32 {
            let storage = std::sync::Arc::clone(&storage);
            let site_id = if task % 2 == 0 { site_a.id } else { site_b.id };
            handles.push(tokio::spawn(async move {
                let chunks: Vec<Chunk> = (0..100)
                    .map(|i| sample_chunk(site_id, task * 100 + i, "racing batch text"))
                    .collect();
                let embeddings = vec![vec![1.0f32, 0.0]; chunks.len()];
                storage.upsert_chunks(&chunks, &embeddings).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(storage.count_chunks_by_site(site_a.id).await.unwrap(), 500);
        assert_eq!(storage.count_chunks_by_site(site_b.id).await.unwrap(), 500);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn cancelled_writer_does_not_poison_later_writes() {
        let (storage, dir) = temp_storage("cancelled").await;
        let storage = std::sync::Arc::new(storage);

        let site = Site::new("https://docs.example.com", "docs");
        storage.insert_site(&site).await.unwrap();

        let writer = {
            let storage = std::sync::Arc::clone(&storage);
            let site_id = site.id;
            tokio::spawn(async move {
                for round in 0..50u32 {
                    let chunks: Vec<Chunk> = (0..20)
                        .map(|i| sample_chunk(site_id, round * 20 + i, "abortable batch"))
                        .collect();
                    let embeddings = vec![vec![1.0f32, 0.0]; chunks.len()];
                    let _ = storage.upsert_chunks(&chunks, &embeddings).await;
                }
            })
        };
        tokio::task::yield_now().await;
        writer.abort();
        let _ = writer.await;

        // Whatever the abort interrupted, the store stays usable and the
        // delete is durable: no resurrected chunks, no open transaction.
        assert!(storage.delete_site(site.id).await.unwrap());
        assert_eq!(storage.count_chunks_by_site(site.id).await.unwrap(), 0);
        assert!(storage.get_site(site.id).await.unwrap().is_none());
        assert!(storage.vector_search(&[1.0, 0.0], 10).await.unwrap().is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn restart_recovery_marks_non_terminal_sites() {
        let (storage, dir) = temp_storage("recovery").await;

        let mut running = Site::new("https://a.example.com", "a");
        running.status = SiteStatus::Crawling;
        let mut done = Site::new("https://b.example.com", "b");
        done.status = SiteStatus::Completed;
        storage.insert_site(&running).await.unwrap();
        storage.insert_site(&done).await.unwrap();

        assert_eq!(storage.mark_interrupted_sites().await.unwrap(), 1);

        let running = storage.get_site(running.id).await.unwrap().unwrap();
        assert_eq!(running.status, SiteStatus::Error);
        assert!(running.error.unwrap().contains("restart"));

        let done = storage.get_site(done.id).await.unwrap().unwrap();
        assert_eq!(done.status, SiteStatus::Completed);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
