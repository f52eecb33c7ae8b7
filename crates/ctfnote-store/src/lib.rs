//! SQLite-backed data layer for the CTFNote sync service.

mod sqlite;

pub use sqlite::SqliteCtfStore;
