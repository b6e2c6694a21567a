//! The authoritative in-memory collection of monitored targets.
//!
//! Every mutation is a single atomic step under the write lock. Persistence
//! happens off the request path: a mutation bumps a version counter and a
//! dedicated writer task saves the latest snapshot on the blocking pool.
//! Bursts of mutations collapse into one save, and saves run one at a time so
//! an older snapshot never overwrites a newer one. Save failures are logged
//! and never roll back memory: the running process stays authoritative.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

use crate::error::MonitorError;
use crate::store::{CheckRecord, Status, Target, TargetId, TargetStore};

/// Name/url pair for creating targets.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct NewTarget {
    pub name: String,
    pub url: String,
}

#[derive(Default)]
struct Inner {
    targets: HashMap<TargetId, Target>,
    // Status a target had before its current check began. Storage sees this
    // instead of the transient `Checking`.
    pre_check: HashMap<TargetId, Status>,
}

impl Inner {
    fn sorted(&self) -> Vec<Target> {
        let mut targets: Vec<Target> = self.targets.values().cloned().collect();
        targets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        targets
    }

    /// Targets as they should be persisted.
    fn snapshot(&self) -> Vec<Target> {
        let mut targets = self.sorted();
        for target in &mut targets {
            if let Some(status) = self.pre_check.get(&target.id) {
                target.status = *status;
            }
        }
        targets
    }
}

type Shared = Arc<RwLock<Inner>>;

pub struct Registry {
    inner: Shared,
    // Bumped after every persisted mutation.
    dirty: watch::Sender<u64>,
    // Highest version the writer has finished saving.
    saved: watch::Receiver<u64>,
}

impl Registry {
    /// Build a registry from whatever the store holds and start its writer
    /// task. A failing store starts the registry empty.
    ///
    /// Must be called from within a tokio runtime.
    pub fn load(store: Arc<dyn TargetStore>) -> Self {
        let loaded = match store.load_all() {
            Ok(targets) => targets,
            Err(e) => {
                tracing::error!("Failed to load targets, starting empty: {}", e);
                Vec::new()
            }
        };

        let mut targets = HashMap::with_capacity(loaded.len());
        for target in loaded {
            if targets.contains_key(&target.id) {
                tracing::warn!("Dropping duplicate stored target {}", target.id);
                continue;
            }
            targets.insert(target.id.clone(), target);
        }

        tracing::info!("Loaded {} targets from storage", targets.len());

        let inner: Shared = Arc::new(RwLock::new(Inner {
            targets,
            pre_check: HashMap::new(),
        }));
        let (dirty, dirty_rx) = watch::channel(0);
        let (saved_tx, saved) = watch::channel(0);

        tokio::spawn(run_snapshot_writer(inner.clone(), store, dirty_rx, saved_tx));

        Self {
            inner,
            dirty,
            saved,
        }
    }

    /// Validate and add a single target.
    pub fn create(&self, name: &str, url: &str) -> Result<Target, MonitorError> {
        let mut created = self.create_many(&[NewTarget {
            name: name.to_string(),
            url: url.to_string(),
        }])?;
        Ok(created.remove(0))
    }

    /// Validate every entry, then add them all. Nothing is inserted if any
    /// entry is invalid.
    pub fn create_many(&self, entries: &[NewTarget]) -> Result<Vec<Target>, MonitorError> {
        if entries.is_empty() {
            return Err(MonitorError::validation("no targets given"));
        }

        let mut created = entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                Target::new(&e.name, &e.url).map_err(|err| match err {
                    MonitorError::Validation(msg) if entries.len() > 1 => {
                        MonitorError::Validation(format!("entry {}: {}", i, msg))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        {
            let mut inner = self.write();
            for target in &mut created {
                while inner.targets.contains_key(&target.id) {
                    target.id = TargetId::generate();
                }
                inner.targets.insert(target.id.clone(), target.clone());
            }
        }

        for target in &created {
            tracing::info!(target_id = %target.id, "Added target {} ({})", target.name, target.url);
        }
        self.mark_dirty();

        Ok(created)
    }

    pub fn get(&self, id: &TargetId) -> Option<Target> {
        self.read().targets.get(id).cloned()
    }

    pub fn contains(&self, id: &TargetId) -> bool {
        self.read().targets.contains_key(id)
    }

    /// Snapshot of all targets, oldest first.
    pub fn list(&self) -> Vec<Target> {
        self.read().sorted()
    }

    /// Ids of all targets, oldest first.
    pub fn ids(&self) -> Vec<TargetId> {
        self.list().into_iter().map(|t| t.id).collect()
    }

    pub fn len(&self) -> usize {
        self.read().targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, id: &TargetId) -> Result<Target, MonitorError> {
        let removed = {
            let mut inner = self.write();
            inner.pre_check.remove(id);
            inner
                .targets
                .remove(id)
                .ok_or_else(|| MonitorError::NotFound(id.clone()))?
        };

        tracing::info!(target_id = %id, "Removed target {}", removed.name);
        self.mark_dirty();

        Ok(removed)
    }

    /// Mark a target as being checked and return the status it had
    /// immediately before. `None` if the target does not exist.
    pub fn begin_check(&self, id: &TargetId) -> Option<Status> {
        let mut inner = self.write();
        let target = inner.targets.get_mut(id)?;
        let previous = target.status;
        target.status = Status::Checking;
        inner.pre_check.insert(id.clone(), previous);
        Some(previous)
    }

    /// Apply a completed check. Returns the updated target, or `None` when the
    /// target was deleted while the check was running.
    pub fn apply_check_result(
        &self,
        id: &TargetId,
        record: CheckRecord,
        error: Option<String>,
    ) -> Option<Target> {
        let updated = {
            let mut inner = self.write();
            let target = inner.targets.get_mut(id)?;
            target.record_check(record, error);
            let updated = target.clone();
            inner.pre_check.remove(id);
            updated
        };

        self.mark_dirty();
        Some(updated)
    }

    /// Wait until every mutation made so far has been handed to the store.
    pub async fn flush(&self) {
        let version = *self.dirty.borrow();
        let mut saved = self.saved.clone();
        if saved.wait_for(|v| *v >= version).await.is_err() {
            tracing::warn!("Snapshot writer stopped before flushing");
        }
    }

    fn mark_dirty(&self) {
        self.dirty.send_modify(|v| *v += 1);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Save the latest snapshot whenever the registry changes. Ends once the
/// registry is dropped and its last change has been saved.
async fn run_snapshot_writer(
    inner: Shared,
    store: Arc<dyn TargetStore>,
    mut dirty: watch::Receiver<u64>,
    saved: watch::Sender<u64>,
) {
    while dirty.changed().await.is_ok() {
        let version = *dirty.borrow_and_update();
        let snapshot = inner.read().unwrap_or_else(PoisonError::into_inner).snapshot();
        let count = snapshot.len();

        let store = store.clone();
        match tokio::task::spawn_blocking(move || store.save_all(&snapshot)).await {
            Ok(Ok(())) => tracing::debug!("Saved {} targets", count),
            Ok(Err(e)) => tracing::error!("Failed to save {} targets: {}", count, e),
            Err(e) => tracing::error!("Snapshot save task failed: {}", e),
        }

        saved.send_replace(version);
    }

    tracing::debug!("Snapshot writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CheckStatus, SqliteStore, StoreError, HISTORY_CAPACITY};
    use chrono::Utc;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct FailingStore;

    impl TargetStore for FailingStore {
        fn load_all(&self) -> Result<Vec<Target>, StoreError> {
            Err(StoreError::Migration("broken".into()))
        }

        fn save_all(&self, _targets: &[Target]) -> Result<(), StoreError> {
            Err(StoreError::Migration("broken".into()))
        }
    }

    /// Store whose saves block the calling thread.
    #[derive(Default)]
    struct SlowStore {
        saves: Mutex<Vec<Vec<Target>>>,
    }

    impl TargetStore for SlowStore {
        fn load_all(&self) -> Result<Vec<Target>, StoreError> {
            Ok(Vec::new())
        }

        fn save_all(&self, targets: &[Target]) -> Result<(), StoreError> {
            std::thread::sleep(Duration::from_millis(300));
            self.saves.lock().unwrap().push(targets.to_vec());
            Ok(())
        }
    }

    fn registry() -> (Registry, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        (Registry::load(store.clone()), store)
    }

    #[tokio::test]
    async fn test_create_normalizes_url() {
        let (registry, store) = registry();

        let target = registry.create("Example", "example.com").unwrap();
        assert_eq!(target.url, "https://example.com");
        assert_eq!(target.status, Status::Checking);
        assert!(target.history.is_empty());

        assert_eq!(registry.get(&target.id), Some(target.clone()));
        registry.flush().await;
        assert_eq!(store.load_all().unwrap(), vec![target]);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let (registry, _) = registry();

        assert!(matches!(
            registry.create("", "example.com"),
            Err(MonitorError::Validation(_))
        ));
        assert!(matches!(
            registry.create("Example", "ftp://example.com"),
            Err(MonitorError::Validation(_))
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_create_many_is_all_or_nothing() {
        let (registry, _) = registry();

        let batch = vec![
            NewTarget { name: "A".into(), url: "a.com".into() },
            NewTarget { name: "".into(), url: "b.com".into() },
        ];
        let err = registry.create_many(&batch).unwrap_err();
        assert!(err.to_string().contains("entry 1"));
        assert!(registry.is_empty());

        let batch = vec![
            NewTarget { name: "A".into(), url: "a.com".into() },
            NewTarget { name: "B".into(), url: "b.com".into() },
        ];
        let created = registry.create_many(&batch).unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(registry.len(), 2);
        assert_ne!(created[0].id, created[1].id);

        assert!(registry.create_many(&[]).is_err());
    }

    #[tokio::test]
    async fn test_remove() {
        let (registry, store) = registry();
        let target = registry.create("Example", "example.com").unwrap();

        let removed = registry.remove(&target.id).unwrap();
        assert_eq!(removed.id, target.id);
        assert!(registry.get(&target.id).is_none());
        registry.flush().await;
        assert!(store.load_all().unwrap().is_empty());

        assert!(matches!(
            registry.remove(&target.id),
            Err(MonitorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_begin_check_returns_previous_status() {
        let (registry, _) = registry();
        let target = registry.create("Example", "example.com").unwrap();

        registry.apply_check_result(&target.id, CheckRecord::online(Utc::now(), 10), None);
        assert_eq!(registry.begin_check(&target.id), Some(Status::Online));
        assert_eq!(registry.get(&target.id).unwrap().status, Status::Checking);

        assert_eq!(registry.begin_check(&TargetId::from("missing")), None);
    }

    #[tokio::test]
    async fn test_checking_is_not_persisted_over_known_status() {
        let (registry, store) = registry();
        let a = registry.create("A", "a.com").unwrap();
        let b = registry.create("B", "b.com").unwrap();

        registry.apply_check_result(&a.id, CheckRecord::online(Utc::now(), 10), None);
        registry.begin_check(&a.id);

        // Another target's result triggers a save while `a` is mid-check.
        registry.apply_check_result(&b.id, CheckRecord::offline(Utc::now()), Some("timeout".into()));
        registry.flush().await;

        let stored = store.load_all().unwrap();
        let stored_a = stored.iter().find(|t| t.id == a.id).unwrap();
        assert_eq!(stored_a.status, Status::Online);
        assert_eq!(registry.get(&a.id).unwrap().status, Status::Checking);

        // A reload sees the pre-check status, so a later offline result is
        // still an Online -> Offline transition.
        let reloaded = Registry::load(store.clone());
        assert_eq!(reloaded.begin_check(&a.id), Some(Status::Online));
    }

    #[tokio::test]
    async fn test_apply_check_result() {
        let (registry, _) = registry();
        let target = registry.create("Example", "example.com").unwrap();

        let updated = registry
            .apply_check_result(
                &target.id,
                CheckRecord::offline(Utc::now()),
                Some("HTTP 500".into()),
            )
            .unwrap();
        assert_eq!(updated.status, Status::Offline);
        assert_eq!(updated.last_error.as_deref(), Some("HTTP 500"));
        assert_eq!(updated.history.len(), 1);
        assert_eq!(updated.history[0].status, CheckStatus::Offline);

        for _ in 0..HISTORY_CAPACITY + 10 {
            registry.apply_check_result(&target.id, CheckRecord::online(Utc::now(), 5), None);
        }
        let target = registry.get(&target.id).unwrap();
        assert_eq!(target.history.len(), HISTORY_CAPACITY);
        assert!(target.last_error.is_none());
    }

    #[tokio::test]
    async fn test_apply_after_delete_is_noop() {
        let (registry, store) = registry();
        let target = registry.create("Example", "example.com").unwrap();
        registry.remove(&target.id).unwrap();

        let result = registry.apply_check_result(&target.id, CheckRecord::online(Utc::now(), 1), None);
        assert!(result.is_none());
        assert!(registry.is_empty());
        registry.flush().await;
        assert!(store.load_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_creation() {
        let (registry, _) = registry();
        let a = registry.create("A", "a.com").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = registry.create("B", "b.com").unwrap();

        assert_eq!(registry.ids(), vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn test_reload_from_store() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let id = {
            let registry = Registry::load(store.clone());
            let id = registry.create("Example", "example.com").unwrap().id;
            registry.flush().await;
            id
        };

        let registry = Registry::load(store);
        assert!(registry.contains(&id));
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_memory() {
        let registry = Registry::load(Arc::new(FailingStore));
        assert!(registry.is_empty());

        let target = registry.create("Example", "example.com").unwrap();
        assert!(registry.contains(&target.id));

        registry.apply_check_result(&target.id, CheckRecord::online(Utc::now(), 1), None);
        registry.flush().await;
        assert_eq!(registry.get(&target.id).unwrap().status, Status::Online);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_store_does_not_stall_runtime() {
        let store = Arc::new(SlowStore::default());
        let registry = Arc::new(Registry::load(store.clone()));
        let ids: Vec<TargetId> = (0..4)
            .map(|i| registry.create(&format!("Site {}", i), &format!("site{}.com", i)).unwrap().id)
            .collect();

        let ticker = tokio::spawn(async {
            let mut worst = Duration::ZERO;
            for _ in 0..100 {
                let start = Instant::now();
                tokio::time::sleep(Duration::from_millis(5)).await;
                worst = worst.max(start.elapsed());
            }
            worst
        });

        let started = Instant::now();
        let mut tasks = Vec::new();
        for id in ids.clone() {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.begin_check(&id);
                registry.apply_check_result(&id, CheckRecord::online(Utc::now(), 20), None);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(started.elapsed() < Duration::from_millis(100), "mutations waited on storage");

        let worst = ticker.await.unwrap();
        assert!(worst < Duration::from_millis(150), "runtime stalled {:?}", worst);

        registry.flush().await;
        let saves = store.saves.lock().unwrap();
        // Bursts collapse: far fewer saves than the 8 mutations.
        assert!(saves.len() < 8, "{} saves", saves.len());
        let last = saves.last().unwrap();
        assert_eq!(last.len(), 4);
        assert!(last.iter().all(|t| t.status == Status::Online));
    }
}
