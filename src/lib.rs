//! catalog-search library
//!
//! Hybrid full-text and semantic search for a product catalog stored in SQLite.
//!
//! # Modules
//!
//! - `core`: Catalog items, the SQLite pool and migrations
//! - `search`: Text index, vector index and the search engine
//! - `config`: Tunables and YAML loading
//! - `error`: Error type shared by every operation

pub mod config;
pub mod core;
pub mod error;
pub mod search;

// Re-exports for convenience
pub use config::SearchConfig;
pub use core::{Database, Item, ItemStore, NewItem, PoolOptions};
pub use error::{Result, SearchError};
pub use search::{
    Embedder, IndexingStats, MatchType, SearchEngine, SearchMode, SearchResult, SearchStats,
    TextIndex, VectorIndex,
};
