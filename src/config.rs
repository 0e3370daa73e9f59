//! Search configuration and ranking constants
//!
//! The ranking constants are heuristics carried over from the catalog app.
//! They are exposed as named values and as overridable config fields.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::database::PoolOptions;

/// `k` in the Reciprocal Rank Fusion term `1 / (k + rank + 1)`.
pub const RRF_K: f32 = 60.0;

/// Minimum cosine score (in `[0, 1]`) for direct semantic search.
pub const SEMANTIC_THRESHOLD: f32 = 0.4;

/// Minimum cosine score for the semantic half of a hybrid search.
pub const HYBRID_SEMANTIC_THRESHOLD: f32 = 0.3;

/// Divisor in the BM25 normalization `1 / (1 - raw / BM25_SCALE)`.
///
/// Not a calibrated probability: the result is only a relative ranking signal.
pub const BM25_SCALE: f64 = 10.0;

/// Hybrid search asks each side for `limit * HYBRID_CANDIDATE_FACTOR` candidates.
pub const HYBRID_CANDIDATE_FACTOR: usize = 2;

/// Suggestions need at least this many characters of prefix.
pub const MIN_SUGGESTION_PREFIX: usize = 2;

/// Upper bound on the embedder's output size; the n-gram fallback uses `min(this, 100)`.
pub const DEFAULT_MAX_DIMENSION: usize = 300;

/// Bucket cap for the character n-gram fallback embedding.
pub const FALLBACK_MAX_BUCKETS: usize = 100;

/// Result count used by [`crate::SearchEngine::search_default`].
pub const DEFAULT_LIMIT: usize = 20;

pub const DEFAULT_CHECKOUT_TIMEOUT_MS: u64 = 5_000;

/// Runtime configuration for [`crate::SearchEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// SQLite file. `None` opens a private catalog in a temporary directory.
    pub database_path: Option<PathBuf>,
    /// GloVe / word2vec text file with pretrained word vectors.
    pub word_vectors_path: Option<PathBuf>,
    pub max_dimension: usize,
    pub pool_size: u32,
    /// Milliseconds to wait for a pooled connection before giving up.
    pub checkout_timeout_ms: u64,
    pub rrf_k: f32,
    pub semantic_threshold: f32,
    pub hybrid_semantic_threshold: f32,
    pub hybrid_candidate_factor: usize,
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            word_vectors_path: None,
            max_dimension: DEFAULT_MAX_DIMENSION,
            pool_size: 4,
            checkout_timeout_ms: DEFAULT_CHECKOUT_TIMEOUT_MS,
            rrf_k: RRF_K,
            semantic_threshold: SEMANTIC_THRESHOLD,
            hybrid_semantic_threshold: HYBRID_SEMANTIC_THRESHOLD,
            hybrid_candidate_factor: HYBRID_CANDIDATE_FACTOR,
            default_limit: DEFAULT_LIMIT,
        }
    }
}

impl SearchConfig {
    /// Parse a YAML document. Missing keys take their defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self =
            serde_yaml::from_str(content).context("Failed to parse search config")?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_size: self.pool_size,
            checkout_timeout: Duration::from_millis(self.checkout_timeout_ms),
        }
    }

    /// Reject values that would make searches silently return nothing.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            anyhow::bail!("pool_size must be at least 1");
        }
        if self.checkout_timeout_ms == 0 {
            anyhow::bail!("checkout_timeout_ms must be at least 1");
        }
        if self.hybrid_candidate_factor == 0 {
            anyhow::bail!("hybrid_candidate_factor must be at least 1");
        }
        if self.max_dimension == 0 {
            anyhow::bail!("max_dimension must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.semantic_threshold)
            || !(0.0..=1.0).contains(&self.hybrid_semantic_threshold)
        {
            anyhow::bail!("semantic thresholds must lie in [0, 1]");
        }
        if self.rrf_k < 0.0 {
            anyhow::bail!("rrf_k must not be negative");
        }
        Ok(())
    }
}
