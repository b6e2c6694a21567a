//! JSON file target store.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::models::Target;
use super::{StoreError, TargetStore};

/// Stores all targets as one pretty-printed JSON array.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }
}

impl TargetStore for JsonFileStore {
    fn load_all(&self) -> Result<Vec<Target>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        // Decode entry by entry so one bad record does not poison the rest.
        let entries: Vec<serde_json::Value> = serde_json::from_str(&content)?;
        let mut targets = Vec::with_capacity(entries.len());

        for (index, entry) in entries.into_iter().enumerate() {
            let decoded = serde_json::from_value::<Target>(entry)
                .map_err(|e| e.to_string())
                .and_then(|t| t.validate().map_err(|e| e.to_string()));

            match decoded {
                Ok(target) => targets.push(target),
                Err(e) => tracing::warn!(
                    "Dropping invalid stored target #{} in {}: {}",
                    index,
                    self.path.display(),
                    e
                ),
            }
        }

        Ok(targets)
    }

    fn save_all(&self, targets: &[Target]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let data = serde_json::to_vec_pretty(targets)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;

        Ok(())
    }
}
