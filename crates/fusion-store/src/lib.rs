//! fusion-store - SQLite index store
//!
//! This crate persists indexed objects and their embedding lifecycle in
//! SQLite. Lexical retrieval uses an FTS5 external-content table; fuzzy and
//! vector retrieval use scalar SQL functions registered on the connection.

mod schema;
mod similarity;
mod sqlite;

pub use sqlite::SqliteStore;

// Re-export schema and scoring helpers for testing/migrations
pub use schema::{SCHEMA, SCHEMA_VERSION};
pub use similarity::{cosine_similarity, trigram_similarity};
