//! Embedded single-file store backed by redb.
//!
//! Task records are JSON-serialized into a single `tasks` table with
//! `&str` keys. The store is `Clone` (backed by `Arc<Database>`) and safe
//! to share across async tasks; every operation runs in its own
//! transaction.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::debug;

use hermit_core::Task;

use crate::error::{StoreError, StoreResult};
use crate::store::TaskStore;

/// Task records keyed by task id.
const TASKS: TableDefinition<&str, &[u8]> = TableDefinition::new("tasks");

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Thread-safe embedded task store.
#[derive(Clone)]
pub struct EmbeddedStore {
    db: Arc<Database>,
}

impl EmbeddedStore {
    /// Open (or create) a store at the given path, creating parent
    /// directories as needed.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(map_err!(Open))?;
        }
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_table()?;
        debug!(?path, "embedded task store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_table()?;
        debug!("in-memory task store opened");
        Ok(store)
    }

    /// Create the tasks table if it doesn't exist yet.
    fn ensure_table(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(TASKS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl TaskStore for EmbeddedStore {
    fn put(&self, task: &Task) -> StoreResult<()> {
        let value = serde_json::to_vec(task).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TASKS).map_err(map_err!(Table))?;
            table
                .insert(task.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(task_id = %task.id, "task stored");
        Ok(())
    }

    fn read_unmasked(&self, id: &str) -> StoreResult<Task> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TASKS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let task: Task =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(task)
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TASKS).map_err(map_err!(Table))?;
            table.remove(id).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn list_unmasked(&self) -> StoreResult<Vec<Task>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TASKS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let task: Task =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(task);
        }
        Ok(results)
    }

    fn clean(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.delete_table(TASKS).map_err(map_err!(Table))?;
        txn.open_table(TASKS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn close(&self) {
        // The database file is released when the last clone drops.
        debug!("embedded task store closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use hermit_core::{Request, Status, TaskState};

    use crate::store::MASK;

    fn test_task(masked: &[(&str, &str)]) -> Task {
        let request = Request {
            cpus: 0.5,
            mem: 128.0,
            image: "busybox".to_string(),
            command: "echo hello".to_string(),
            masked_env: masked
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            ..Request::default()
        };
        Task::new(request, "test")
    }

    #[test]
    fn put_and_read() {
        let store = EmbeddedStore::open_in_memory().unwrap();
        let task = test_task(&[]);

        store.put(&task).unwrap();
        let read = store.read(&task.id).unwrap();
        assert_eq!(read, task);
    }

    #[test]
    fn read_missing_is_not_found() {
        let store = EmbeddedStore::open_in_memory().unwrap();
        let err = store.read("hermit-task.missing").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn masking_applies_on_read_only() {
        let store = EmbeddedStore::open_in_memory().unwrap();
        let task = test_task(&[("SECRET", "hunter2")]);
        store.put(&task).unwrap();

        let masked = store.read(&task.id).unwrap();
        assert_eq!(masked.masked_env["SECRET"], MASK);

        let unmasked = store.read_unmasked(&task.id).unwrap();
        assert_eq!(unmasked.masked_env["SECRET"], "hunter2");
    }

    #[test]
    fn reread_after_unmasked_roundtrip_preserves_values() {
        let store = EmbeddedStore::open_in_memory().unwrap();
        let task = test_task(&[("SECRET", "hunter2")]);
        store.put(&task).unwrap();

        // The scheduler's cycle: read unmasked, mutate, re-persist.
        let mut cycle = store.read_unmasked(&task.id).unwrap();
        cycle.update_status(Status { status: TaskState::Staging, time: 99 });
        store.put(&cycle).unwrap();

        let unmasked = store.read_unmasked(&task.id).unwrap();
        assert_eq!(unmasked.masked_env["SECRET"], "hunter2");
    }

    #[test]
    fn status_history_is_prefix_preserved_across_puts() {
        let store = EmbeddedStore::open_in_memory().unwrap();
        let task = test_task(&[]);
        store.put(&task).unwrap();
        let first_entry = task.status[0];

        let mut t = store.read_unmasked(&task.id).unwrap();
        t.update_status(Status { status: TaskState::Staging, time: 10 });
        store.put(&t).unwrap();

        let mut t = store.read_unmasked(&task.id).unwrap();
        t.update_status(Status { status: TaskState::Running, time: 20 });
        store.put(&t).unwrap();

        let stored = store.read_unmasked(&task.id).unwrap();
        assert_eq!(stored.status.len(), 3);
        assert_eq!(stored.status[0], first_entry);
        assert_eq!(stored.status[1].status, TaskState::Staging);
    }

    #[test]
    fn list_non_terminal_filters_and_masks() {
        let store = EmbeddedStore::open_in_memory().unwrap();

        let queued = test_task(&[("KEY", "value")]);
        store.put(&queued).unwrap();

        let mut finished = test_task(&[]);
        finished.update_status(Status { status: TaskState::Finished, time: 10 });
        store.put(&finished).unwrap();

        let listed = store.list_non_terminal().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, queued.id);
        assert_eq!(listed[0].masked_env["KEY"], MASK);
    }

    #[test]
    fn delete_is_idempotent() {
        let store = EmbeddedStore::open_in_memory().unwrap();
        let task = test_task(&[]);
        store.put(&task).unwrap();

        store.delete(&task.id).unwrap();
        store.delete(&task.id).unwrap();
        assert!(matches!(
            store.read(&task.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn clean_resets_the_store() {
        let store = EmbeddedStore::open_in_memory().unwrap();
        store.put(&test_task(&[])).unwrap();
        store.put(&test_task(&[])).unwrap();

        store.clean().unwrap();
        assert!(store.list_unmasked().unwrap().is_empty());

        // Usable after clean.
        let task = test_task(&[]);
        store.put(&task).unwrap();
        assert_eq!(store.list_unmasked().unwrap().len(), 1);
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tasks.redb");

        let task = test_task(&[]);
        {
            let store = EmbeddedStore::open(&db_path).unwrap();
            store.put(&task).unwrap();
        }

        let store = EmbeddedStore::open(&db_path).unwrap();
        let read = store.read(&task.id).unwrap();
        assert_eq!(read.id, task.id);
        assert_eq!(read.status, task.status);
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested/dirs/tasks.redb");
        let store = EmbeddedStore::open(&db_path).unwrap();
        store.put(&test_task(&[])).unwrap();
        assert!(db_path.exists());
    }
}
