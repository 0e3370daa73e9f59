//! Full-text item search on SQLite FTS5
//!
//! `items_fts` is an external-content FTS5 table over the `items` columns.
//! Triggers mirror every insert, update and delete inside the transaction that
//! changes `items`, so readers never see an item without its index entry or
//! the other way round.

use rusqlite::params;
use tracing::{debug, info};

use super::result::{MatchType, SearchResult};
use crate::config::{BM25_SCALE, MIN_SUGGESTION_PREFIX};
use crate::core::database::Database;
use crate::core::store::item_from_row;
use crate::error::{Result, SearchError};

const SNIPPET_OPEN: &str = "<b>";
const SNIPPET_CLOSE: &str = "</b>";
const SNIPPET_ELLIPSIS: &str = "...";
const NAME_SNIPPET_TOKENS: u32 = 32;
const DESCRIPTION_SNIPPET_TOKENS: u32 = 64;

// Column order inside items_fts.
const NAME_COLUMN: u32 = 0;
const DESCRIPTION_COLUMN: u32 = 2;

const SCHEMA: &str = r#"
    CREATE VIRTUAL TABLE IF NOT EXISTS items_fts USING fts5(
        name,
        sku,
        description,
        category,
        content='items',
        content_rowid='id',
        tokenize='porter unicode61 remove_diacritics 2'
    );

    CREATE TRIGGER IF NOT EXISTS items_fts_insert AFTER INSERT ON items BEGIN
        INSERT INTO items_fts(rowid, name, sku, description, category)
        VALUES (new.id, new.name, new.sku, new.description, new.category);
    END;

    CREATE TRIGGER IF NOT EXISTS items_fts_delete AFTER DELETE ON items BEGIN
        INSERT INTO items_fts(items_fts, rowid, name, sku, description, category)
        VALUES ('delete', old.id, old.name, old.sku, old.description, old.category);
    END;

    CREATE TRIGGER IF NOT EXISTS items_fts_update AFTER UPDATE ON items BEGIN
        INSERT INTO items_fts(items_fts, rowid, name, sku, description, category)
        VALUES ('delete', old.id, old.name, old.sku, old.description, old.category);
        INSERT INTO items_fts(rowid, name, sku, description, category)
        VALUES (new.id, new.name, new.sku, new.description, new.category);
    END;
"#;

/// Ranked full-text index over item name, SKU, description and category
#[derive(Debug, Clone)]
pub struct TextIndex {
    db: Database,
}

impl TextIndex {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the FTS table and sync triggers, then backfill from `items`.
    ///
    /// Safe to call repeatedly; the backfill is a full rebuild.
    pub fn setup(&self) -> Result<()> {
        let mut conn = self.db.setup_connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| SearchError::setup(format!("full-text index: {e}")))?;

        tx.execute_batch(SCHEMA)
            .and_then(|_| tx.execute("INSERT INTO items_fts(items_fts) VALUES ('rebuild')", []))
            .map_err(|e| SearchError::setup(format!("full-text index: {e}")))?;

        tx.commit()
            .map_err(|e| SearchError::setup(format!("full-text index: {e}")))?;

        info!("full-text index ready");
        Ok(())
    }

    /// Ask FTS5 to verify the index against the `items` table.
    pub fn check_integrity(&self) -> Result<()> {
        self.db.connection()?.execute(
            "INSERT INTO items_fts(items_fts, rank) VALUES ('integrity-check', 1)",
            [],
        )?;
        Ok(())
    }

    /// Search items using FTS5 with BM25 ranking
    ///
    /// One token is a prefix match; several tokens match the exact phrase or
    /// any token as a prefix. Quotes, `*` and `:` are stripped first, so no
    /// input is a syntax error.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let tokens = sanitize_query(query);
        let Some(expression) = match_expression(&tokens) else {
            return Ok(Vec::new());
        };
        let Some(conn) = self.db.reader() else {
            return Ok(Vec::new());
        };

        let sql = format!(
            r#"
            SELECT
                items.id,
                items.name,
                items.sku,
                items.description,
                items.category,
                bm25(items_fts) AS rank,
                snippet(items_fts, {NAME_COLUMN}, '{SNIPPET_OPEN}', '{SNIPPET_CLOSE}', '{SNIPPET_ELLIPSIS}', {NAME_SNIPPET_TOKENS}),
                snippet(items_fts, {DESCRIPTION_COLUMN}, '{SNIPPET_OPEN}', '{SNIPPET_CLOSE}', '{SNIPPET_ELLIPSIS}', {DESCRIPTION_SNIPPET_TOKENS})
            FROM items_fts
            JOIN items ON items.id = items_fts.rowid
            WHERE items_fts MATCH ?1
            ORDER BY rank, items.id
            LIMIT ?2
            "#
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![expression, limit as i64], |row| {
            let item = item_from_row(row)?;
            let raw: f64 = row.get(5)?;
            let name_snippet: Option<String> = row.get(6)?;
            let description_snippet: Option<String> = row.get(7)?;

            Ok(SearchResult {
                item,
                score: normalize_bm25(raw),
                match_type: MatchType::FullText,
                name_snippet: non_empty(name_snippet),
                description_snippet: non_empty(description_snippet),
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }

        debug!(expression = %expression, matched = results.len(), "full-text search");
        Ok(results)
    }

    /// Items whose category equals `category`, ordered by name, all scored 1.0.
    pub fn search_by_category(&self, category: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let Some(conn) = self.db.reader() else {
            return Ok(Vec::new());
        };

        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, sku, description, category
            FROM items
            WHERE category = ?1
            ORDER BY name ASC, id ASC
            LIMIT ?2
            "#,
        )?;
        let rows = stmt.query_map(params![category, limit as i64], item_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(SearchResult::new(row?, 1.0, MatchType::Category));
        }
        Ok(results)
    }

    /// Distinct item names starting with `prefix` (case-sensitive), sorted.
    ///
    /// Prefixes shorter than two characters return nothing.
    pub fn suggestions(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        let prefix_len = prefix.chars().count();
        if prefix_len < MIN_SUGGESTION_PREFIX {
            return Ok(Vec::new());
        }
        let Some(conn) = self.db.reader() else {
            return Ok(Vec::new());
        };

        // substr compares exactly, unlike LIKE which folds ASCII case.
        let mut stmt = conn.prepare(
            r#"
            SELECT DISTINCT name
            FROM items
            WHERE substr(name, 1, ?2) = ?1
            ORDER BY name
            LIMIT ?3
            "#,
        )?;
        let rows = stmt.query_map(
            params![prefix, prefix_len as i64, limit as i64],
            |row| row.get::<_, String>(0),
        )?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }
}

/// Strip FTS5 syntax characters and split into tokens.
///
/// Quotes and `*` are removed; `:` becomes a separator. Tokens without any
/// alphanumeric character are dropped.
pub fn sanitize_query(query: &str) -> Vec<String> {
    query
        .replace(['"', '*'], "")
        .replace(':', " ")
        .split_whitespace()
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .map(String::from)
        .collect()
}

/// Build the FTS5 MATCH expression for sanitized tokens.
///
/// Tokens are quoted so dashes and words like `OR` stay literal.
pub fn match_expression(tokens: &[String]) -> Option<String> {
    match tokens {
        [] => None,
        [single] => Some(format!("\"{single}\"*")),
        _ => {
            let phrase = format!("\"{}\"", tokens.join(" "));
            let prefixes: Vec<String> = tokens.iter().map(|t| format!("\"{t}\"*")).collect();
            Some(format!("{phrase} OR {}", prefixes.join(" OR ")))
        }
    }
}

/// Map a raw BM25 value (negative, lower is better) into `[0, 1]`.
///
/// `clamp(1 / (1 - raw / 10), 0, 1)`. A heuristic, not a probability.
pub fn normalize_bm25(raw: f64) -> f32 {
    let score = 1.0 / (1.0 - raw / BM25_SCALE);
    if score.is_finite() {
        score.clamp(0.0, 1.0) as f32
    } else {
        0.0
    }
}

fn non_empty(snippet: Option<String>) -> Option<String> {
    snippet.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::database::PoolOptions;
    use crate::core::item::NewItem;
    use crate::core::store::ItemStore;
    use std::time::Duration;

    fn setup() -> (ItemStore, TextIndex) {
        let db = Database::open_temporary().unwrap();
        let index = TextIndex::new(db.clone());
        index.setup().unwrap();
        (ItemStore::new(db), index)
    }

    fn ids(results: &[SearchResult]) -> Vec<i64> {
        results.iter().map(|r| r.id()).collect()
    }

    #[test]
    fn test_sanitize_query() {
        assert_eq!(sanitize_query("foo\"*:bar"), vec!["foo", "bar"]);
        assert_eq!(sanitize_query("  bolt   M6 "), vec!["bolt", "M6"]);
        assert!(sanitize_query("\"*:").is_empty());
        assert!(sanitize_query(" - ").is_empty());
    }

    #[test]
    fn test_match_expression() {
        assert_eq!(match_expression(&[]), None);
        assert_eq!(
            match_expression(&["bolt".to_string()]),
            Some("\"bolt\"*".to_string())
        );
        assert_eq!(
            match_expression(&["hex".to_string(), "bolt".to_string()]),
            Some("\"hex bolt\" OR \"hex\"* OR \"bolt\"*".to_string())
        );
    }

    #[test]
    fn test_normalize_bm25() {
        assert_eq!(normalize_bm25(0.0), 1.0);
        assert!((normalize_bm25(-10.0) - 0.5).abs() < 1e-6);
        let strong = normalize_bm25(-1.0);
        let weak = normalize_bm25(-5.0);
        assert!(strong > weak && weak > 0.0);
        assert_eq!(normalize_bm25(20.0), 0.0);
    }

    #[test]
    fn test_prefix_search_with_snippet() -> Result<()> {
        let (store, index) = setup();
        let bolt = store.create(&NewItem::new("Bolt M6x20", "BOLT-M6-20"))?;
        store.create(&NewItem::new("Wood glue", "GLUE-1"))?;

        let results = index.search("bol", 10)?;
        assert_eq!(ids(&results), vec![bolt.id]);
        assert!(results[0].score > 0.0 && results[0].score <= 1.0);
        assert_eq!(results[0].match_type, MatchType::FullText);
        assert!(results[0]
            .name_snippet
            .as_deref()
            .unwrap_or_default()
            .contains("<b>Bolt</b>"));
        assert_eq!(results[0].description_snippet, None);
        Ok(())
    }

    #[test]
    fn test_sku_with_dashes() -> Result<()> {
        let (store, index) = setup();
        let bolt = store.create(&NewItem::new("Bolt M6x20", "BOLT-M6-20"))?;
        store.create(&NewItem::new("Bolt M8x30", "BOLT-M8-30"))?;

        assert_eq!(ids(&index.search("BOLT-M6-20", 10)?), vec![bolt.id]);
        Ok(())
    }

    #[test]
    fn test_multi_token_phrase_or_prefix() -> Result<()> {
        let (store, index) = setup();
        let hex = store.create(&NewItem::new("Hex bolt", "HB-1"))?;
        let carriage = store.create(&NewItem::new("Carriage bolt", "CB-1"))?;
        let hexkey = store.create(&NewItem::new("Hex key set", "HK-1"))?;

        let results = index.search("hex bolt", 10)?;
        assert_eq!(results.len(), 3);
        // The exact phrase match ranks first.
        assert_eq!(results[0].id(), hex.id);
        assert!(ids(&results).contains(&carriage.id));
        assert!(ids(&results).contains(&hexkey.id));
        Ok(())
    }

    #[test]
    fn test_malformed_query_is_stripped() -> Result<()> {
        let (store, index) = setup();
        store.create(&NewItem::new("Foo widget", "F-1"))?;
        store.create(&NewItem::new("Bar stool", "B-1"))?;
        store.create(&NewItem::new("Hammer", "H-1"))?;

        let messy = index.search("foo\"*:bar", 10)?;
        let clean = index.search("foo bar", 10)?;
        assert_eq!(messy.len(), 2);
        assert_eq!(ids(&messy), ids(&clean));

        assert!(index.search("\"*:", 10)?.is_empty());
        assert!(index.search("", 10)?.is_empty());
        assert!(index.search("AND OR NOT (", 10)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_index_follows_item_changes() -> Result<()> {
        let (store, index) = setup();
        let mut item = store.create(&NewItem::new("Bolt", "B-1").with_description("zinc plated"))?;
        assert_eq!(ids(&index.search("zinc", 10)?), vec![item.id]);

        item.name = "Washer".to_string();
        item.description = Some("stainless".to_string());
        store.update(&item)?;
        assert!(index.search("zinc", 10)?.is_empty());
        assert!(index.search("bolt", 10)?.is_empty());
        assert_eq!(ids(&index.search("stainless", 10)?), vec![item.id]);
        index.check_integrity()?;

        store.delete(item.id)?;
        assert!(index.search("washer", 10)?.is_empty());
        index.check_integrity()?;
        Ok(())
    }

    #[test]
    fn test_setup_backfills_existing_items() -> Result<()> {
        let db = Database::open_temporary()?;
        let store = ItemStore::new(db.clone());
        let item = store.create(&NewItem::new("Anchor bolt", "AB-1"))?;

        let index = TextIndex::new(db);
        index.setup()?;
        index.setup()?;

        assert_eq!(ids(&index.search("anchor", 10)?), vec![item.id]);
        index.check_integrity()?;
        Ok(())
    }

    #[test]
    fn test_limit_respected() -> Result<()> {
        let (store, index) = setup();
        for i in 0..5 {
            store.create(&NewItem::new(format!("Bolt {i}"), format!("B-{i}")))?;
        }
        assert_eq!(index.search("bolt", 3)?.len(), 3);
        Ok(())
    }

    #[test]
    fn test_search_by_category() -> Result<()> {
        let (store, index) = setup();
        let nut = store.create(&NewItem::new("Гайка M6", "NUT-M6").with_category("Крепёж"))?;
        let bolt = store.create(&NewItem::new("Болт M6", "BOLT-M6").with_category("Крепёж"))?;
        store.create(&NewItem::new("Дрель", "DRILL-1").with_category("Инструмент"))?;
        store.create(&NewItem::new("Шайба", "WASHER-1"))?;

        let results = index.search_by_category("Крепёж", 20)?;
        assert_eq!(ids(&results), vec![bolt.id, nut.id]);
        assert!(results.iter().all(|r| r.score == 1.0));
        assert!(results.iter().all(|r| r.match_type == MatchType::Category));
        assert!(results
            .iter()
            .all(|r| r.item.category.as_deref() == Some("Крепёж")));

        assert!(index.search_by_category("крепёж", 20)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_suggestions() -> Result<()> {
        let (store, index) = setup();
        for (name, sku) in [
            ("Bolt M8", "B-8"),
            ("Bolt M6", "B-6"),
            ("Box cutter", "BC-1"),
            ("bolt cutter", "BC-2"),
            ("Nut", "N-1"),
        ] {
            store.create(&NewItem::new(name, sku))?;
        }
        store.create(&NewItem::new("Bolt M6", "B-6-ALT"))?;

        assert!(index.suggestions("B", 10)?.is_empty());
        assert_eq!(
            index.suggestions("Bo", 10)?,
            vec!["Bolt M6", "Bolt M8", "Box cutter"]
        );
        assert_eq!(index.suggestions("Bo", 2)?, vec!["Bolt M6", "Bolt M8"]);
        assert_eq!(index.suggestions("bo", 10)?, vec!["bolt cutter"]);
        Ok(())
    }

    #[test]
    fn test_unreachable_store() -> Result<()> {
        let db = Database::open_temporary_with(PoolOptions {
            max_size: 1,
            checkout_timeout: Duration::from_millis(50),
        })?;
        let index = TextIndex::new(db.clone());
        index.setup()?;
        ItemStore::new(db.clone())
            .create(&NewItem::new("Bolt M6", "BOLT-M6").with_category("Fasteners"))?;

        let _held = db.connection()?;
        assert!(index.search("bolt", 10)?.is_empty());
        assert!(index.search_by_category("Fasteners", 10)?.is_empty());
        assert!(index.suggestions("Bo", 10)?.is_empty());
        assert!(matches!(index.setup(), Err(SearchError::SetupFailed(_))));
        Ok(())
    }

    #[test]
    fn test_search_during_open_write() -> Result<()> {
        let (store, index) = setup();
        let bolt = store.create(&NewItem::new("Bolt M6", "BOLT-M6"))?;

        let mut writer = store.database().connection()?;
        let tx = writer.transaction()?;
        tx.execute(
            "INSERT INTO items (name, sku) VALUES ('Bolt M8', 'BOLT-M8')",
            [],
        )?;

        assert_eq!(ids(&index.search("bolt", 10)?), vec![bolt.id]);
        assert_eq!(store.fetch_all()?.len(), 1);

        tx.commit()?;
        assert_eq!(index.search("bolt", 10)?.len(), 2);
        Ok(())
    }
}

