//! Sqlite-backed implementation of `workbench_core::repo::Repository`.

mod rows;
mod sqlite;

pub use sqlite::SqliteStore;
