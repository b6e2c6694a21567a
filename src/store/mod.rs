//! Persistence for monitored targets.
//!
//! The registry mirrors its contents through the [`TargetStore`] trait. Two
//! backends are provided: SQLite and a single JSON file. Both decode
//! persisted records strictly; a record that does not validate is dropped
//! with a warning instead of being loaded half-typed.

mod json;
mod models;
mod sqlite;

pub use json::*;
pub use models::*;
pub use sqlite::*;

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Storage error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Backing store for the target registry.
pub trait TargetStore: Send + Sync {
    /// Load every valid persisted target.
    fn load_all(&self) -> Result<Vec<Target>, StoreError>;

    /// Replace the persisted set with `targets`.
    fn save_all(&self, targets: &[Target]) -> Result<(), StoreError>;
}

/// Open the store for `path`: a `.json` extension selects the JSON file
/// backend, anything else SQLite.
pub fn open_store<P: AsRef<Path>>(path: P) -> Result<Arc<dyn TargetStore>, StoreError> {
    let path = path.as_ref();
    let is_json = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        Ok(Arc::new(JsonFileStore::new(path)))
    } else {
        Ok(Arc::new(SqliteStore::new(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_store_by_extension() {
        let dir = tempdir().unwrap();

        let json = open_store(dir.path().join("targets.json")).unwrap();
        assert!(json.load_all().unwrap().is_empty());

        let sqlite = open_store(dir.path().join("targets.db")).unwrap();
        assert!(sqlite.load_all().unwrap().is_empty());
    }
}
