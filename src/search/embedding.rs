//! Text embeddings for semantic item search
//!
//! Two paths, tried in order:
//! 1. Pretrained word vectors: average-pool the vectors of every known token.
//! 2. Character n-gram histogram: hash unigrams, bigrams and trigrams into
//!    `min(max_dimension, 100)` buckets.
//!
//! Both results are L2-normalized. The fallback always succeeds for
//! non-empty text, so `embed` only returns `None` for blank input.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_MAX_DIMENSION, FALLBACK_MAX_BUCKETS};
use crate::error::Result;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Immutable pretrained word-vector table.
///
/// Loaded once, then shared behind an `Arc` without locking.
#[derive(Debug, Default)]
pub struct WordVectors {
    vectors: HashMap<String, Vec<f32>>,
    dimension: usize,
}

impl WordVectors {
    /// Load a GloVe / word2vec text file (`word v1 v2 ... vD` per line).
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let table = Self::from_reader(BufReader::new(file))?;
        info!(
            path = %path.display(),
            words = table.len(),
            dimension = table.dimension,
            "word vectors loaded"
        );
        Ok(table)
    }

    /// Parse word vectors from any buffered reader.
    ///
    /// An optional word2vec `count dim` header is skipped. Lines whose
    /// dimension differs from the first vector are ignored.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut vectors = HashMap::new();
        let mut dimension = 0;
        let mut skipped = 0usize;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let mut fields = line.split_whitespace();
            let Some(word) = fields.next() else {
                continue;
            };
            let values: Vec<&str> = fields.collect();

            if line_no == 0 && is_word2vec_header(word, &values) {
                continue;
            }

            let parsed: std::result::Result<Vec<f32>, _> =
                values.iter().map(|v| v.parse::<f32>()).collect();
            let vector = match parsed {
                Ok(v) if !v.is_empty() && v.iter().all(|x| x.is_finite()) => v,
                _ => {
                    skipped += 1;
                    continue;
                }
            };

            if dimension == 0 {
                dimension = vector.len();
            } else if vector.len() != dimension {
                skipped += 1;
                continue;
            }

            vectors.insert(word.to_lowercase(), vector);
        }

        if skipped > 0 {
            warn!(skipped, dimension, "skipped malformed word vector lines");
        }

        Ok(Self { vectors, dimension })
    }

    pub fn get(&self, word: &str) -> Option<&[f32]> {
        self.vectors.get(word).map(Vec::as_slice)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

fn is_word2vec_header(first: &str, rest: &[&str]) -> bool {
    rest.len() == 1 && first.parse::<usize>().is_ok() && rest[0].parse::<usize>().is_ok()
}

/// Embedding model
///
/// Stateless apart from the read-only word-vector snapshot, so one instance
/// can be shared by every service.
#[derive(Debug, Clone)]
pub struct Embedder {
    word_vectors: Option<Arc<WordVectors>>,
    max_dimension: usize,
}

impl Default for Embedder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIMENSION)
    }
}

impl Embedder {
    /// Embedder with no pretrained table (n-gram fallback only).
    pub fn new(max_dimension: usize) -> Self {
        Self {
            word_vectors: None,
            max_dimension: max_dimension.max(1),
        }
    }

    pub fn with_word_vectors(max_dimension: usize, word_vectors: Arc<WordVectors>) -> Self {
        let word_vectors = (!word_vectors.is_empty()).then_some(word_vectors);
        Self {
            word_vectors,
            max_dimension: max_dimension.max(1),
        }
    }

    /// Build from an optional word-vector file.
    ///
    /// A missing or unreadable file is logged and the embedder runs on the
    /// fallback alone.
    pub fn load(max_dimension: usize, word_vectors_path: Option<&Path>) -> Self {
        let Some(path) = word_vectors_path else {
            return Self::new(max_dimension);
        };

        match WordVectors::load(path) {
            Ok(table) => Self::with_word_vectors(max_dimension, Arc::new(table)),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    "word vectors unavailable, using n-gram embeddings: {e}"
                );
                Self::new(max_dimension)
            }
        }
    }

    pub fn has_word_vectors(&self) -> bool {
        self.word_vectors.is_some()
    }

    /// Size of vectors produced by the n-gram fallback.
    pub fn fallback_dimension(&self) -> usize {
        self.max_dimension.min(FALLBACK_MAX_BUCKETS)
    }

    /// Generate embedding for a single text
    ///
    /// Returns `None` only for empty or whitespace-only text.
    pub fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if text.trim().is_empty() {
            return None;
        }

        if let Some(table) = &self.word_vectors {
            if let Some(vector) = self.embed_with_table(table, text) {
                return Some(vector);
            }
            debug!("no known tokens, falling back to n-gram embedding");
        }

        Some(self.fallback_embed(text))
    }

    /// Generate embeddings for multiple texts
    pub fn embed_batch<S: AsRef<str>>(&self, texts: &[S]) -> Vec<Option<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t.as_ref())).collect()
    }

    /// Mean-pool the pretrained vectors of all resolvable tokens.
    fn embed_with_table(&self, table: &WordVectors, text: &str) -> Option<Vec<f32>> {
        let dimension = table.dimension();
        let mut sum = vec![0.0f64; dimension];
        let mut count = 0usize;

        for token in tokenize(text) {
            if let Some(vector) = table.get(&token) {
                for (acc, val) in sum.iter_mut().zip(vector) {
                    *acc += f64::from(*val);
                }
                count += 1;
            }
        }

        if count == 0 {
            return None;
        }

        for val in &mut sum {
            *val /= count as f64;
        }

        // Opposite vectors can cancel out; let the fallback handle that text.
        normalize(sum)
    }

    /// Character n-gram histogram hashed into a fixed number of buckets.
    fn fallback_embed(&self, text: &str) -> Vec<f32> {
        let cleaned = text.trim().to_lowercase();
        let chars: Vec<char> = cleaned.chars().collect();

        let mut features: HashMap<String, u32> = HashMap::new();
        for n in 1..=3 {
            for window in chars.windows(n) {
                *features.entry(window.iter().collect()).or_insert(0) += 1;
            }
        }

        let buckets = self.fallback_dimension();
        let mut vector = vec![0.0f64; buckets];
        for (feature, count) in &features {
            let bucket = (fnv1a(feature.as_bytes()) % buckets as u64) as usize;
            vector[bucket] += f64::from(*count);
        }

        // Non-empty text has at least one unigram, so the norm is positive.
        normalize(vector).unwrap_or_else(|| vec![0.0; buckets])
    }
}

/// Lowercase word tokens split on any non-alphanumeric character.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

/// 64-bit FNV-1a. Stable across processes, unlike `std`'s randomized hasher.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// L2-normalize, returning `None` for a zero vector.
fn normalize(vector: Vec<f64>) -> Option<Vec<f32>> {
    let norm = vector.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        Some(vector.iter().map(|x| (x / norm) as f32).collect())
    } else {
        None
    }
}

/// Cosine similarity of two unit vectors mapped into `[0, 1]`
///
/// The dot product of unit vectors lies in `[-1, 1]`; `(dot + 1) / 2`
/// maps it onto `[0, 1]`. Mismatched dimensions score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    ((dot + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Top `k` candidates by similarity to `query`, as `(index, score)`.
///
/// Equal scores keep candidate order (index ascending).
pub fn top_similar<V: AsRef<[f32]>>(
    query: &[f32],
    candidates: &[V],
    k: usize,
) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| (index, cosine_similarity(query, candidate.as_ref())))
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    fn sample_table() -> Arc<WordVectors> {
        let data = "3 4\nbolt 1 0 0 0\nscrew 0.9 0.1 0 0\nhammer 0 0 1 0\n";
        Arc::new(WordVectors::from_reader(data.as_bytes()).unwrap())
    }

    #[test]
    fn test_embed_is_unit_length() {
        let embedder = Embedder::default();

        for text in ["bolt", "Bolt M6x20 BOLT-M6-20", "Крепёж оцинкованный", "a"] {
            let emb = embedder.embed(text).unwrap();
            assert!((norm(&emb) - 1.0).abs() < 1e-4, "text: {text}");
        }
    }

    #[test]
    fn test_blank_text_has_no_embedding() {
        let embedder = Embedder::default();
        assert!(embedder.embed("").is_none());
        assert!(embedder.embed("   ").is_none());
        assert!(embedder.embed("\n\t").is_none());
    }

    #[test]
    fn test_fallback_dimension_capped() {
        assert_eq!(Embedder::new(300).embed("nut").unwrap().len(), 100);
        assert_eq!(Embedder::new(64).embed("nut").unwrap().len(), 64);
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let a = Embedder::default().embed("hex bolt").unwrap();
        let b = Embedder::default().embed("hex bolt").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Embedder::default().embed("wood glue").unwrap());
    }

    #[test]
    fn test_word_vectors_mean_pooled() {
        let embedder = Embedder::with_word_vectors(300, sample_table());

        let emb = embedder.embed("Bolt hammer").unwrap();
        assert_eq!(emb.len(), 4);
        let expected = 1.0 / 2.0f32.sqrt();
        assert!((emb[0] - expected).abs() < 1e-5);
        assert!((emb[2] - expected).abs() < 1e-5);
        assert!((norm(&emb) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_unknown_tokens_fall_back() {
        let embedder = Embedder::with_word_vectors(300, sample_table());
        let emb = embedder.embed("washer").unwrap();
        assert_eq!(emb.len(), 100);
        assert_eq!(emb, Embedder::default().embed("washer").unwrap());
    }

    #[test]
    fn test_word_vectors_skip_bad_lines() {
        let data = "bolt 1 0 0\nshort 1 0\nnan 1 NaN 0\nnut 0 1 0\n";
        let table = WordVectors::from_reader(data.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.dimension(), 3);
        assert!(table.get("short").is_none());
    }

    #[test]
    fn test_load_missing_file_uses_fallback() {
        let embedder = Embedder::load(300, Some(Path::new("/nonexistent/vectors.txt")));
        assert!(!embedder.has_word_vectors());
        assert!(embedder.embed("bolt").is_some());
    }

    #[test]
    fn test_load_word_vector_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bolt 0.5 0.5").unwrap();
        writeln!(file, "nut 0.5 -0.5").unwrap();

        let embedder = Embedder::load(300, Some(file.path()));
        assert!(embedder.has_word_vectors());
        assert_eq!(embedder.embed("bolt").unwrap().len(), 2);
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);

        let b = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 0.5).abs() < 1e-6);

        let c = vec![-1.0, 0.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);

        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_self_similarity_of_embeddings() {
        let embedder = Embedder::default();
        let v = embedder.embed("Bolt M6x20").unwrap();
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_top_similar_order_and_ties() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![-1.0, 0.0],
        ];

        let top = top_similar(&query, &candidates, 3);
        let indices: Vec<usize> = top.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![1, 0, 2]);
        assert!((top[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_embed_batch() {
        let embedder = Embedder::default();
        let out = embedder.embed_batch(&["bolt", "", "nut"]);
        assert_eq!(out.len(), 3);
        assert!(out[0].is_some());
        assert!(out[1].is_none());
        assert!(out[2].is_some());
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Bolt M6x20, BOLT-M6"), vec!["bolt", "m6x20", "bolt", "m6"]);
        assert!(tokenize("  -- ").is_empty());
    }
}
