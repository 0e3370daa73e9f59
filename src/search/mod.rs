//! Hybrid search over the item catalog
//!
//! Full-text: FTS5 with BM25 ranking and highlighted snippets
//! Semantic: word-vector or character n-gram embeddings, cosine similarity
//! Hybrid: both, merged with Reciprocal Rank Fusion

pub mod embedding;
pub mod engine;
pub mod fts;
pub mod fusion;
pub mod result;
pub mod vectordb;

pub use embedding::{cosine_similarity, Embedder, WordVectors};
pub use engine::{resolve_mode, ResolvedMode, SearchEngine, SearchMode, SearchStats};
pub use fts::TextIndex;
pub use fusion::fuse_results;
pub use result::{MatchType, SearchResult};
pub use vectordb::{IndexingStats, VectorIndex, VectorStats};
