//! Coordination-service tree backend.
//!
//! Task records live as JSON child nodes of a single root node. The
//! concrete coordination-service client stays behind [`TreeConnection`];
//! the embedding application binds a real client, tests bind an
//! in-memory tree.

use std::sync::Arc;

use tracing::{debug, warn};

use hermit_core::Task;

use crate::error::{StoreError, StoreResult};
use crate::store::TaskStore;

/// The node operations the tree store needs from a coordination service.
pub trait TreeConnection: Send + Sync {
    fn exists(&self, path: &str) -> StoreResult<bool>;
    /// Create a node. Fails if it already exists.
    fn create(&self, path: &str, data: &[u8]) -> StoreResult<()>;
    /// Overwrite an existing node's data.
    fn set(&self, path: &str, data: &[u8]) -> StoreResult<()>;
    /// Read a node's data, `None` if the node is absent.
    fn get(&self, path: &str) -> StoreResult<Option<Vec<u8>>>;
    /// Child node names (not full paths) under a node.
    fn children(&self, path: &str) -> StoreResult<Vec<String>>;
    /// Delete a node. Deleting an absent node is not an error.
    fn delete(&self, path: &str) -> StoreResult<()>;
    fn close(&self);
}

/// Split a `scheme://host,host/path` database location into the host list
/// and the tree path (trailing slash trimmed).
pub fn parse_tree_path(location: &str) -> StoreResult<(String, String)> {
    let rest = location
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(location);
    let (hosts, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    if hosts.is_empty() {
        return Err(StoreError::Path(location.to_string()));
    }
    let path = path.trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };
    Ok((hosts.to_string(), path.to_string()))
}

/// Task store over a coordination-service tree.
pub struct TreeStore<C> {
    connection: Arc<C>,
    root: String,
}

impl<C: TreeConnection> TreeStore<C> {
    /// Build a store rooted at `root`, creating the root node if absent.
    pub fn new(connection: Arc<C>, root: &str) -> StoreResult<Self> {
        if !connection.exists(root)? {
            connection.create(root, &[])?;
            debug!(%root, "created task store root node");
        }
        Ok(Self {
            connection,
            root: root.to_string(),
        })
    }

    fn node_path(&self, id: &str) -> String {
        format!("{}/{}", self.root, id)
    }
}

impl<C: TreeConnection> TaskStore for TreeStore<C> {
    fn put(&self, task: &Task) -> StoreResult<()> {
        let path = self.node_path(&task.id);
        let data = serde_json::to_vec(task).map_err(|e| StoreError::Serialize(e.to_string()))?;
        if self.connection.exists(&path)? {
            self.connection.set(&path, &data)
        } else {
            self.connection.create(&path, &data)
        }
    }

    fn read_unmasked(&self, id: &str) -> StoreResult<Task> {
        let path = self.node_path(id);
        match self.connection.get(&path)? {
            Some(data) => {
                serde_json::from_slice(&data).map_err(|e| StoreError::Deserialize(e.to_string()))
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        self.connection.delete(&self.node_path(id))
    }

    fn list_unmasked(&self) -> StoreResult<Vec<Task>> {
        let mut tasks = Vec::new();
        for child in self.connection.children(&self.root)? {
            match self.read_unmasked(&child) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    // A node may vanish between children() and get().
                    warn!(id = %child, error = %e, "skipping unreadable task node");
                }
            }
        }
        Ok(tasks)
    }

    fn clean(&self) -> StoreResult<()> {
        for child in self.connection.children(&self.root)? {
            self.connection.delete(&self.node_path(&child))?;
        }
        Ok(())
    }

    fn close(&self) {
        self.connection.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use hermit_core::{Request, Status, TaskState};

    use crate::store::MASK;

    /// In-memory tree for exercising the store logic.
    #[derive(Default)]
    struct MemTree {
        nodes: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl TreeConnection for MemTree {
        fn exists(&self, path: &str) -> StoreResult<bool> {
            Ok(self.nodes.lock().unwrap().contains_key(path))
        }

        fn create(&self, path: &str, data: &[u8]) -> StoreResult<()> {
            let mut nodes = self.nodes.lock().unwrap();
            if nodes.contains_key(path) {
                return Err(StoreError::Write(format!("node exists: {path}")));
            }
            nodes.insert(path.to_string(), data.to_vec());
            Ok(())
        }

        fn set(&self, path: &str, data: &[u8]) -> StoreResult<()> {
            let mut nodes = self.nodes.lock().unwrap();
            match nodes.get_mut(path) {
                Some(existing) => {
                    *existing = data.to_vec();
                    Ok(())
                }
                None => Err(StoreError::Write(format!("no such node: {path}"))),
            }
        }

        fn get(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
            Ok(self.nodes.lock().unwrap().get(path).cloned())
        }

        fn children(&self, path: &str) -> StoreResult<Vec<String>> {
            let prefix = format!("{path}/");
            Ok(self
                .nodes
                .lock()
                .unwrap()
                .keys()
                .filter_map(|k| k.strip_prefix(&prefix))
                .filter(|rest| !rest.contains('/'))
                .map(str::to_string)
                .collect())
        }

        fn delete(&self, path: &str) -> StoreResult<()> {
            self.nodes.lock().unwrap().remove(path);
            Ok(())
        }

        fn close(&self) {}
    }

    fn test_store() -> TreeStore<MemTree> {
        TreeStore::new(Arc::new(MemTree::default()), "/hermit").unwrap()
    }

    fn test_task() -> Task {
        let request = Request {
            cpus: 0.5,
            mem: 128.0,
            image: "busybox".to_string(),
            masked_env: HashMap::from([("SECRET".to_string(), "hunter2".to_string())]),
            ..Request::default()
        };
        Task::new(request, "test")
    }

    #[test]
    fn parse_location_with_scheme() {
        let (hosts, path) = parse_tree_path("zk://zk1:2181,zk2:2181/hermit/tasks").unwrap();
        assert_eq!(hosts, "zk1:2181,zk2:2181");
        assert_eq!(path, "/hermit/tasks");
    }

    #[test]
    fn parse_location_trims_trailing_slash() {
        let (_, path) = parse_tree_path("zk://zk1/hermit/").unwrap();
        assert_eq!(path, "/hermit");
    }

    #[test]
    fn parse_location_without_path() {
        let (hosts, path) = parse_tree_path("zk://zk1:2181").unwrap();
        assert_eq!(hosts, "zk1:2181");
        assert_eq!(path, "/");
    }

    #[test]
    fn parse_location_rejects_empty_hosts() {
        assert!(matches!(
            parse_tree_path("zk:///hermit"),
            Err(StoreError::Path(_))
        ));
    }

    #[test]
    fn put_creates_then_sets() {
        let store = test_store();
        let mut task = test_task();
        store.put(&task).unwrap();

        task.update_status(Status { status: TaskState::Staging, time: 10 });
        store.put(&task).unwrap();

        let read = store.read_unmasked(&task.id).unwrap();
        assert_eq!(read.status.len(), 2);
    }

    #[test]
    fn masking_inherited_from_trait() {
        let store = test_store();
        let task = test_task();
        store.put(&task).unwrap();

        assert_eq!(store.read(&task.id).unwrap().masked_env["SECRET"], MASK);
        assert_eq!(
            store.read_unmasked(&task.id).unwrap().masked_env["SECRET"],
            "hunter2"
        );
    }

    #[test]
    fn list_non_terminal_over_tree() {
        let store = test_store();
        let queued = test_task();
        store.put(&queued).unwrap();

        let mut killed = test_task();
        killed.update_status(Status { status: TaskState::Killed, time: 10 });
        store.put(&killed).unwrap();

        let listed = store.list_non_terminal().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, queued.id);
    }

    #[test]
    fn delete_and_clean() {
        let store = test_store();
        let a = test_task();
        let b = test_task();
        store.put(&a).unwrap();
        store.put(&b).unwrap();

        store.delete(&a.id).unwrap();
        store.delete(&a.id).unwrap();
        assert_eq!(store.list_unmasked().unwrap().len(), 1);

        store.clean().unwrap();
        assert!(store.list_unmasked().unwrap().is_empty());
    }
}
