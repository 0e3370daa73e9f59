//! Catalog item store
//!
//! Minimal create/read/update/delete over the `items` table. Every write runs
//! in its own transaction; the full-text triggers installed by
//! [`crate::search::TextIndex::setup`] fire inside it.

use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use std::collections::HashMap;
use tracing::debug;

use super::database::Database;
use super::item::{Item, NewItem};
use crate::error::Result;

const ITEM_COLUMNS: &str = "id, name, sku, description, category";

#[derive(Debug, Clone)]
pub struct ItemStore {
    db: Database,
}

impl ItemStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn create(&self, item: &NewItem) -> Result<Item> {
        let mut conn = self.db.connection()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO items (name, sku, description, category) VALUES (?1, ?2, ?3, ?4)",
            params![item.name, item.sku, item.description, item.category],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!(id, sku = %item.sku, "item created");
        Ok(Item {
            id,
            name: item.name.clone(),
            sku: item.sku.clone(),
            description: item.description.clone(),
            category: item.category.clone(),
        })
    }

    /// Returns `false` when no row has this id.
    pub fn update(&self, item: &Item) -> Result<bool> {
        let mut conn = self.db.connection()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE items SET name = ?2, sku = ?3, description = ?4, category = ?5 WHERE id = ?1",
            params![item.id, item.name, item.sku, item.description, item.category],
        )?;
        tx.commit()?;
        Ok(changed > 0)
    }

    /// Delete by id. The item's stored vector goes with it (ON DELETE CASCADE).
    pub fn delete(&self, id: i64) -> Result<bool> {
        let mut conn = self.db.connection()?;
        let tx = conn.transaction()?;
        let changed = tx.execute("DELETE FROM items WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(changed > 0)
    }

    /// All items ordered by name.
    pub fn fetch_all(&self) -> Result<Vec<Item>> {
        let Some(conn) = self.db.reader() else {
            return Ok(Vec::new());
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM items ORDER BY name ASC, id ASC"
        ))?;
        let rows = stmt.query_map([], item_from_row)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    pub fn fetch_one(&self, id: i64) -> Result<Option<Item>> {
        let Some(conn) = self.db.reader() else {
            return Ok(None);
        };
        let item = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
                params![id],
                item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    /// Load the given ids. Ids without a row are absent from the map.
    pub fn fetch_many(&self, ids: &[i64]) -> Result<HashMap<i64, Item>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let Some(conn) = self.db.reader() else {
            return Ok(HashMap::new());
        };

        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE id IN ({placeholders})"
        ))?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), item_from_row)?;

        let mut items = HashMap::with_capacity(ids.len());
        for row in rows {
            let item = row?;
            items.insert(item.id, item);
        }
        Ok(items)
    }

    pub fn fetch_by_sku(&self, sku: &str) -> Result<Option<Item>> {
        let Some(conn) = self.db.reader() else {
            return Ok(None);
        };
        let item = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE sku = ?1"),
                params![sku],
                item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    /// Distinct non-null categories in ascending order.
    pub fn fetch_categories(&self) -> Result<Vec<String>> {
        let Some(conn) = self.db.reader() else {
            return Ok(Vec::new());
        };
        let mut stmt = conn.prepare(
            "SELECT DISTINCT category FROM items WHERE category IS NOT NULL ORDER BY category ASC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut categories = Vec::new();
        for row in rows {
            categories.push(row?);
        }
        Ok(categories)
    }

    pub fn count(&self) -> Result<usize> {
        let Some(conn) = self.db.reader() else {
            return Ok(0);
        };
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

pub(crate) fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        name: row.get(1)?,
        sku: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
    })
}
