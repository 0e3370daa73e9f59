//! Search Engine - combines full-text and vector search
//!
//! Picks a search mode per query, fans out to the text and vector indexes,
//! and fuses the two rankings for hybrid queries.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::embedding::Embedder;
use super::fts::TextIndex;
use super::fusion::fuse_results;
use super::result::{MatchType, SearchResult};
use super::vectordb::{IndexingStats, VectorIndex};
use crate::config::SearchConfig;
use crate::core::database::Database;
use crate::core::item::Item;
use crate::core::store::ItemStore;
use crate::error::{Result, SearchError};

const LAST_FULL_INDEX_KEY: &str = "last_full_index";
const LAST_INDEX_STATS_KEY: &str = "last_index_stats";

lazy_static! {
    // Uppercase letters then letters, digits or dashes, e.g. BOLT-M6-20
    static ref SKU_RE: Regex = Regex::new(r"^[A-Z]{2,}[A-Z0-9\-]{2,}$").unwrap();
}

/// Requested search mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchMode {
    /// Pick a mode from the shape of the query.
    #[default]
    Auto,
    FullText,
    Semantic,
    Hybrid,
}

/// Mode a query actually runs in; `Auto` never reaches the indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolvedMode {
    FullText,
    Semantic,
    Hybrid,
}

impl SearchMode {
    pub fn resolve(self, query: &str) -> ResolvedMode {
        match self {
            Self::Auto => resolve_mode(query),
            Self::FullText => ResolvedMode::FullText,
            Self::Semantic => ResolvedMode::Semantic,
            Self::Hybrid => ResolvedMode::Hybrid,
        }
    }
}

/// Choose a mode for `Auto` queries
///
/// SKU-shaped and single-word queries go to full-text, three or more words
/// go hybrid, two words stay full-text.
pub fn resolve_mode(query: &str) -> ResolvedMode {
    let words: Vec<&str> = query.split_whitespace().collect();

    if words.len() == 1 && SKU_RE.is_match(words[0]) {
        return ResolvedMode::FullText;
    }

    match words.len() {
        1 => ResolvedMode::FullText,
        n if n >= 3 => ResolvedMode::Hybrid,
        _ => ResolvedMode::FullText,
    }
}

/// Search statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    pub total_items: usize,
    /// The text index is trigger-maintained, so this always equals `total_items`.
    pub text_indexed: usize,
    pub vectors_indexed: usize,
    pub vector_coverage: f64,
    pub avg_vector_dimension: f64,
    /// Unix timestamp of the last `index_all`.
    pub last_full_index: Option<i64>,
    pub last_index: Option<IndexingStats>,
}

impl SearchStats {
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Total Items: {}\nFull-text Indexed: {}\nVectors Indexed: {}\nVector Coverage: {:.1}%\nVector Dimension: {:.0}",
            self.total_items,
            self.text_indexed,
            self.vectors_indexed,
            self.vector_coverage * 100.0,
            self.avg_vector_dimension,
        );

        if let Some(ts) = self.last_full_index {
            let dt = chrono::DateTime::from_timestamp(ts, 0)
                .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "Unknown".to_string());
            summary.push_str(&format!("\nLast Indexed: {dt}"));
        }
        summary
    }
}

/// Hybrid search engine over the item catalog
///
/// Cheap to clone; every clone shares the same connection pool and embedder.
#[derive(Debug, Clone)]
pub struct SearchEngine {
    items: ItemStore,
    text: TextIndex,
    vectors: VectorIndex,
    config: Arc<SearchConfig>,
}

impl SearchEngine {
    pub fn new(db: Database, embedder: Arc<Embedder>, config: SearchConfig) -> Self {
        let items = ItemStore::new(db.clone());
        Self {
            text: TextIndex::new(db),
            vectors: VectorIndex::new(items.clone(), embedder),
            items,
            config: Arc::new(config),
        }
    }

    /// Open the database and word vectors named in `config`.
    ///
    /// Without a `database_path` the catalog lives in a temporary directory
    /// and is removed when the last clone of the engine drops.
    pub fn open(config: SearchConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| SearchError::InvalidConfig(e.to_string()))?;

        let db = match &config.database_path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Database::open_with(path, config.pool_options())?
            }
            None => Database::open_temporary_with(config.pool_options())?,
        };

        let embedder = Embedder::load(config.max_dimension, config.word_vectors_path.as_deref());
        Ok(Self::new(db, Arc::new(embedder), config))
    }

    pub fn items(&self) -> &ItemStore {
        &self.items
    }

    pub fn text_index(&self) -> &TextIndex {
        &self.text
    }

    pub fn vector_index(&self) -> &VectorIndex {
        &self.vectors
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Create both indexes and backfill the text index. Idempotent.
    ///
    /// Vectors are not computed here; call [`Self::index_all`] for that.
    pub fn initialize(&self) -> Result<()> {
        self.text.setup()?;
        self.vectors.setup()?;
        info!(location = %self.items.database().location(), "search infrastructure initialized");
        Ok(())
    }

    /// Embed every item and record when it happened.
    ///
    /// The text index keeps itself current, so only vectors are rebuilt.
    pub fn index_all(&self) -> Result<IndexingStats> {
        let stats = self.vectors.index_all()?;

        let db = self.items.database();
        db.set_meta(LAST_FULL_INDEX_KEY, &chrono::Utc::now().timestamp().to_string())?;
        db.set_meta(LAST_INDEX_STATS_KEY, &serde_json::to_string(&stats)?)?;

        Ok(stats)
    }

    /// Refresh one item's vector after an edit.
    pub fn update_index(&self, item: &Item) -> Result<bool> {
        self.vectors.update_item_vector(item)
    }

    /// Run a query in the given mode
    ///
    /// Blank queries return nothing. In hybrid mode both indexes are queried
    /// concurrently for `limit * hybrid_candidate_factor` candidates each and
    /// fused with Reciprocal Rank Fusion.
    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let resolved = mode.resolve(query);
        debug!(query, ?mode, ?resolved, limit, "search");

        match resolved {
            ResolvedMode::FullText => self.text_search(query, limit).await,
            ResolvedMode::Semantic => {
                self.vector_search(query, limit, self.config.semantic_threshold)
                    .await
            }
            ResolvedMode::Hybrid => self.hybrid_search(query, limit).await,
        }
    }

    /// [`Self::search`] capped at the configured `default_limit`.
    pub async fn search_default(
        &self,
        query: &str,
        mode: SearchMode,
    ) -> Result<Vec<SearchResult>> {
        self.search(query, mode, self.config.default_limit).await
    }

    /// [`Self::search`] that gives up when `cancel` fires
    ///
    /// Cancellation drops both in-flight sub-searches together and returns
    /// [`SearchError::Cancelled`]; a partial fused list is never returned.
    pub async fn search_with_cancel(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(query, "search superseded");
                Err(SearchError::Cancelled)
            }
            results = self.search(query, mode, limit) => results,
        }
    }

    async fn hybrid_search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let candidates = limit.saturating_mul(self.config.hybrid_candidate_factor);

        let (text_results, vector_results) = tokio::try_join!(
            self.text_search(query, candidates),
            self.vector_search(query, candidates, self.config.hybrid_semantic_threshold),
        )?;

        debug!(
            text = text_results.len(),
            vector = vector_results.len(),
            "fusing hybrid results"
        );
        Ok(fuse_results(
            text_results,
            vector_results,
            self.config.rrf_k,
            limit,
        ))
    }

    async fn text_search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let text = self.text.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || text.search(&query, limit)).await?
    }

    async fn vector_search(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let vectors = self.vectors.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || vectors.search_similar(&query, limit, threshold))
            .await?
    }

    /// Exact SKU lookup
    pub fn search_by_sku(&self, sku: &str) -> Result<Option<SearchResult>> {
        Ok(self
            .items
            .fetch_by_sku(sku)?
            .map(|item| SearchResult::new(item, 1.0, MatchType::Exact)))
    }

    pub fn search_by_category(&self, category: &str, limit: usize) -> Result<Vec<SearchResult>> {
        self.text.search_by_category(category, limit)
    }

    /// Autocomplete on item names
    pub fn suggestions(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        self.text.suggestions(prefix, limit)
    }

    /// Items similar to an indexed item
    pub fn find_similar(&self, item_id: i64, limit: usize) -> Result<Vec<SearchResult>> {
        self.vectors.find_similar_items(item_id, limit)
    }

    pub fn get_categories(&self) -> Result<Vec<String>> {
        self.items.fetch_categories()
    }

    pub fn get_search_stats(&self) -> Result<SearchStats> {
        let vector_stats = self.vectors.get_stats()?;
        let db = self.items.database();

        let last_full_index = db
            .get_meta(LAST_FULL_INDEX_KEY)?
            .and_then(|v| v.parse::<i64>().ok());
        let last_index = db
            .get_meta(LAST_INDEX_STATS_KEY)?
            .and_then(|v| serde_json::from_str(&v).ok());

        Ok(SearchStats {
            total_items: vector_stats.total_items,
            text_indexed: vector_stats.total_items,
            vectors_indexed: vector_stats.total_vectors,
            vector_coverage: vector_stats.coverage,
            avg_vector_dimension: vector_stats.avg_dimension,
            last_full_index,
            last_index,
        })
    }
}
