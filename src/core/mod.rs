//! Catalog items and the SQLite store they live in.

pub mod database;
pub mod item;
pub mod store;

pub use database::{Database, PoolOptions};
pub use item::{Item, NewItem};
pub use store::ItemStore;
