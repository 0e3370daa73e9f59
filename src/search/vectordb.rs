//! Vector index using SQLite
//!
//! Stores one embedding per item as a BLOB and computes similarity in Rust.
//! Every query is a linear scan over all stored vectors: fine for catalog-sized
//! corpora, not meant for web-scale collections.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::embedding::{top_similar, Embedder};
use super::result::{MatchType, SearchResult};
use crate::core::item::Item;
use crate::core::store::ItemStore;
use crate::error::{Result, SearchError};

/// Indexing statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexingStats {
    /// Items whose vector was written.
    pub indexed: usize,
    /// Items whose text produced no embedding.
    pub skipped: usize,
    /// Items whose write failed; earlier writes are kept.
    pub failed: usize,
    pub duration_ms: u64,
}

/// Vector storage statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorStats {
    pub total_vectors: usize,
    pub total_items: usize,
    /// `total_vectors / total_items`, 0 for an empty catalog.
    pub coverage: f64,
    pub avg_dimension: f64,
}

/// Per-item embeddings with brute-force similarity search
#[derive(Debug, Clone)]
pub struct VectorIndex {
    items: ItemStore,
    embedder: Arc<Embedder>,
}

impl VectorIndex {
    pub fn new(items: ItemStore, embedder: Arc<Embedder>) -> Self {
        Self { items, embedder }
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// Create the vector table. Idempotent.
    pub fn setup(&self) -> Result<()> {
        let conn = self.items.database().setup_connection()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS item_vectors (
                item_id    INTEGER PRIMARY KEY,
                vector     BLOB NOT NULL,
                dimension  INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_item_vectors_updated_at
                ON item_vectors(updated_at);
            "#,
        )
        .map_err(|e| SearchError::setup(format!("vector table: {e}")))?;

        debug!("vector table ready");
        Ok(())
    }

    /// Insert or replace the vector for an item
    pub fn store_vector(&self, item_id: i64, vector: &[f32]) -> Result<()> {
        validate_vector(vector)?;

        let blob = embedding_to_blob(vector);
        let now = chrono::Utc::now().to_rfc3339();

        self.items.database().connection()?.execute(
            r#"
            INSERT INTO item_vectors (item_id, vector, dimension, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(item_id) DO UPDATE SET
                vector = excluded.vector,
                dimension = excluded.dimension,
                updated_at = excluded.updated_at
            "#,
            params![item_id, blob, vector.len() as i64, now],
        )?;

        Ok(())
    }

    /// Stored vector for an item, if any.
    pub fn load_vector(&self, item_id: i64) -> Result<Option<Vec<f32>>> {
        let Some(conn) = self.items.database().reader() else {
            return Ok(None);
        };

        let row: Option<(Vec<u8>, i64)> = conn
            .query_row(
                "SELECT vector, dimension FROM item_vectors WHERE item_id = ?1",
                params![item_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.and_then(|(blob, dimension)| decode_record(item_id, &blob, dimension)))
    }

    /// Embed and store every item in the catalog
    ///
    /// Writes are per item and idempotent, so an interrupted run can simply be
    /// repeated.
    pub fn index_all(&self) -> Result<IndexingStats> {
        let start = Instant::now();
        let items = self.items.fetch_all()?;

        let mut stats = IndexingStats::default();

        for item in &items {
            let Some(vector) = self.embedder.embed(&item.searchable_text()) else {
                stats.skipped += 1;
                continue;
            };

            match self.store_vector(item.id, &vector) {
                Ok(()) => stats.indexed += 1,
                Err(e) => {
                    warn!(item_id = item.id, "failed to index item: {e}");
                    stats.failed += 1;
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            indexed = stats.indexed,
            skipped = stats.skipped,
            failed = stats.failed,
            duration_ms = stats.duration_ms,
            "vector index rebuilt"
        );
        Ok(stats)
    }

    /// Re-embed one item after an edit. Returns `false` if its text has no embedding.
    pub fn update_item_vector(&self, item: &Item) -> Result<bool> {
        match self.embedder.embed(&item.searchable_text()) {
            Some(vector) => {
                self.store_vector(item.id, &vector)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Search for items similar to a text query
    ///
    /// Keeps scores `>= threshold`, best first, at most `limit`. Items deleted
    /// since indexing are dropped.
    pub fn search_similar(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let Some(query_vector) = self.embedder.embed(query) else {
            return Ok(Vec::new());
        };

        let stored = self.scan(None)?;
        let ranked = rank(&query_vector, &stored, Some(threshold), limit);
        debug!(
            candidates = stored.len(),
            matched = ranked.len(),
            threshold,
            "vector search"
        );

        self.resolve(ranked)
    }

    /// Items closest to an already indexed item, excluding the item itself.
    ///
    /// An item without a stored vector has no neighbours.
    pub fn find_similar_items(&self, item_id: i64, limit: usize) -> Result<Vec<SearchResult>> {
        let Some(target) = self.load_vector(item_id)? else {
            return Ok(Vec::new());
        };

        let stored = self.scan(Some(item_id))?;
        let ranked = rank(&target, &stored, None, limit);
        self.resolve(ranked)
    }

    /// Get vector storage statistics
    pub fn get_stats(&self) -> Result<VectorStats> {
        let Some(conn) = self.items.database().reader() else {
            return Ok(VectorStats::default());
        };

        let total_vectors: i64 =
            conn.query_row("SELECT COUNT(*) FROM item_vectors", [], |row| row.get(0))?;
        let total_items: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        let avg_dimension: Option<f64> =
            conn.query_row("SELECT AVG(dimension) FROM item_vectors", [], |row| row.get(0))?;

        let coverage = if total_items > 0 {
            total_vectors as f64 / total_items as f64
        } else {
            0.0
        };

        Ok(VectorStats {
            total_vectors: total_vectors as usize,
            total_items: total_items as usize,
            coverage,
            avg_dimension: avg_dimension.unwrap_or(0.0),
        })
    }

    pub fn delete_vector(&self, item_id: i64) -> Result<bool> {
        let changed = self
            .items
            .database()
            .connection()?
            .execute("DELETE FROM item_vectors WHERE item_id = ?1", params![item_id])?;
        Ok(changed > 0)
    }

    /// Remove every stored vector. Returns how many were deleted.
    pub fn clear_all_vectors(&self) -> Result<usize> {
        let deleted = self
            .items
            .database()
            .connection()?
            .execute("DELETE FROM item_vectors", [])?;
        info!(deleted, "vector index cleared");
        Ok(deleted)
    }

    /// Load all decodable vectors in id order, optionally skipping one item.
    fn scan(&self, exclude: Option<i64>) -> Result<Vec<(i64, Vec<f32>)>> {
        let Some(conn) = self.items.database().reader() else {
            return Ok(Vec::new());
        };

        let mut stmt = conn.prepare(
            "SELECT item_id, vector, dimension FROM item_vectors
             WHERE ?1 IS NULL OR item_id != ?1
             ORDER BY item_id",
        )?;
        let rows = stmt.query_map(params![exclude], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut vectors = Vec::new();
        for row in rows {
            let (item_id, blob, dimension) = row?;
            if let Some(vector) = decode_record(item_id, &blob, dimension) {
                vectors.push((item_id, vector));
            }
        }
        Ok(vectors)
    }

    /// Attach items to ranked ids, keeping score order.
    fn resolve(&self, ranked: Vec<(i64, f32)>) -> Result<Vec<SearchResult>> {
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = ranked.iter().map(|(id, _)| *id).collect();
        let mut items = self.items.fetch_many(&ids)?;

        Ok(ranked
            .into_iter()
            .filter_map(|(id, score)| {
                items
                    .remove(&id)
                    .map(|item| SearchResult::new(item, score, MatchType::Vector))
            })
            .collect())
    }
}

/// Best matches among `stored` as `(item_id, score)`, keeping scores `>= threshold`.
///
/// `stored` must be in ascending id order so that equal scores come out by id.
fn rank(
    query: &[f32],
    stored: &[(i64, Vec<f32>)],
    threshold: Option<f32>,
    limit: usize,
) -> Vec<(i64, f32)> {
    let vectors: Vec<&[f32]> = stored.iter().map(|(_, vector)| vector.as_slice()).collect();

    top_similar(query, &vectors, limit)
        .into_iter()
        .take_while(|(_, score)| threshold.map_or(true, |t| *score >= t))
        .map(|(index, score)| (stored[index].0, score))
        .collect()
}

fn validate_vector(vector: &[f32]) -> Result<()> {
    if vector.is_empty() {
        return Err(SearchError::invalid_vector("vector is empty"));
    }
    if let Some(index) = vector.iter().position(|v| !v.is_finite()) {
        return Err(SearchError::invalid_vector(format!(
            "non-finite value at index {index}"
        )));
    }
    Ok(())
}

/// Decode a stored record, skipping it when the blob and dimension disagree.
fn decode_record(item_id: i64, blob: &[u8], dimension: i64) -> Option<Vec<f32>> {
    match blob_to_embedding(blob) {
        Some(vector) if vector.len() as i64 == dimension => Some(vector),
        _ => {
            warn!(item_id, bytes = blob.len(), dimension, "skipping malformed vector record");
            None
        }
    }
}

/// Convert f32 embedding to BLOB (little-endian)
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        blob.extend_from_slice(&val.to_le_bytes());
    }
    blob
}

/// Convert BLOB to f32 embedding; `None` if the length is not a multiple of 4
fn blob_to_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}
