//! The task record and its constructors and predicates.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::request::Request;
use crate::state::TaskState;

/// One entry in a task's status history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub status: TaskState,
    /// Unix timestamp in seconds.
    pub time: i64,
}

/// A container-path → host-path mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub container_path: String,
    pub host_path: String,
}

/// A requested port mapping. `host_port` is filled in at launch time from
/// the selected offer's port ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub container_port: u32,
    #[serde(default)]
    pub host_port: u32,
    pub protocol: String,
}

/// An attribute equality constraint any selected agent must carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConstraint {
    pub attribute_name: String,
    pub attribute_value: String,
}

/// A resource fetched into the sandbox before the task starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchUri {
    pub uri: String,
    #[serde(default)]
    pub extract: bool,
    #[serde(default)]
    pub executable: bool,
    #[serde(default)]
    pub cache: bool,
}

/// The central entity: a one-shot containerized task.
///
/// `id` never changes after construction and `status` only ever grows.
/// Placement fields stay empty until the task is launched on an offer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub cpus: f64,
    pub mem: f64,
    pub image: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub user: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub masked_env: HashMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub fetch_uris: Vec<FetchUri>,
    #[serde(default)]
    pub agent_constraints: Vec<AgentConstraint>,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub dns: Option<String>,
    #[serde(default)]
    pub force_pull_image: bool,
    #[serde(default)]
    pub privileged: bool,

    // Placement, filled at launch.
    #[serde(default)]
    pub framework_id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub agent_ip: String,
    #[serde(default)]
    pub agent_port: i32,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub sandbox_path: String,

    /// Launch retries already spent.
    #[serde(default)]
    pub retry: u32,
    #[serde(default)]
    pub callback_uri: String,

    /// Append-only status history; the last entry is the current state.
    #[serde(default)]
    pub status: Vec<Status>,
}

impl Task {
    /// Build a task from a submission request.
    ///
    /// Synthesizes the id, merges legacy `uris` with explicit `fetch`
    /// entries, defaults the user to root, and seeds the history with a
    /// single QUEUED entry at the current time.
    pub fn new(request: Request, name: &str) -> Task {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();

        Task {
            id: format!("hermit-task.{suffix}"),
            name: name.to_string(),
            cpus: request.cpus,
            mem: request.mem,
            image: request.image,
            command: request.command,
            args: request.args,
            user: "root".to_string(),
            env: request.env,
            masked_env: request.masked_env,
            volumes: request.volumes,
            ports: request.ports,
            fetch_uris: merge_uris(&request.uris, request.fetch),
            agent_constraints: request.agent_constraints,
            network: request.network,
            dns: request.dns,
            force_pull_image: request.force_pull_image,
            privileged: request.privileged,
            callback_uri: request.callback_uri,
            status: vec![Status {
                status: TaskState::Queued,
                time: epoch_secs(),
            }],
            ..Task::default()
        }
    }

    /// The current state, or `None` for a freshly constructed record.
    pub fn current_state(&self) -> Option<TaskState> {
        self.status.last().map(|s| s.status)
    }

    /// Whether the task is currently running.
    pub fn is_running(&self) -> bool {
        self.current_state() == Some(TaskState::Running)
    }

    /// Whether the task was running at any point in its history.
    pub fn was_running(&self) -> bool {
        self.status.iter().any(|s| s.status == TaskState::Running)
    }

    /// Whether the task has terminated. An empty history counts as
    /// terminated so that half-constructed records never look live to
    /// store enumeration.
    pub fn is_terminated(&self) -> bool {
        match self.current_state() {
            Some(state) => state.is_terminal(),
            None => true,
        }
    }

    /// Whether the task is waiting in the queue.
    pub fn is_waiting(&self) -> bool {
        self.current_state().is_some_and(|s| s.is_waiting())
    }

    /// Whether a kill has been requested but not yet observed.
    pub fn is_terminating(&self) -> bool {
        self.current_state() == Some(TaskState::Terminating)
    }

    /// Unix time of the latest status entry, or 0 for an empty history.
    pub fn last_updated(&self) -> i64 {
        self.status.last().map_or(0, |s| s.time)
    }

    /// Append a transition to the history. Entries are never edited or
    /// removed.
    pub fn update_status(&mut self, status: Status) {
        self.status.push(status);
    }
}

/// Whether a URI points at an archive the fetcher should extract.
pub fn is_archive(uri: &str) -> bool {
    const SUFFIXES: [&str; 7] = [
        ".tgz", ".tar.gz", ".tbz2", ".tar.bz2", ".txz", ".tar.xz", ".zip",
    ];
    SUFFIXES.iter().any(|s| uri.ends_with(s))
}

/// Merge legacy plain `uris` with explicit `fetch` entries into one list.
/// Plain URIs are extracted iff they look like archives.
fn merge_uris(uris: &[String], fetch: Vec<FetchUri>) -> Vec<FetchUri> {
    let mut merged: Vec<FetchUri> = uris
        .iter()
        .map(|u| FetchUri {
            uri: u.clone(),
            extract: is_archive(u),
            executable: false,
            cache: false,
        })
        .collect();
    merged.extend(fetch);
    merged
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_request() -> Request {
        Request {
            cpus: 0.5,
            mem: 128.0,
            image: "busybox".to_string(),
            command: "echo hello".to_string(),
            ..Request::default()
        }
    }

    #[test]
    fn new_task_seeds_queued_status() {
        let task = Task::new(test_request(), "test");
        assert!(task.id.starts_with("hermit-task."));
        assert_eq!(task.id.len(), "hermit-task.".len() + 8);
        assert_eq!(task.user, "root");
        assert_eq!(task.status.len(), 1);
        assert_eq!(task.current_state(), Some(TaskState::Queued));
        assert!(task.is_waiting());
    }

    #[test]
    fn new_task_ids_are_unique() {
        let a = Task::new(test_request(), "a");
        let b = Task::new(test_request(), "b");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn new_task_merges_uris() {
        let request = Request {
            uris: vec![
                "http://example.com/bundle.tar.gz".to_string(),
                "http://example.com/script.sh".to_string(),
            ],
            fetch: vec![FetchUri {
                uri: "http://example.com/data.bin".to_string(),
                extract: false,
                executable: true,
                cache: true,
            }],
            ..test_request()
        };
        let task = Task::new(request, "test");

        assert_eq!(task.fetch_uris.len(), 3);
        assert!(task.fetch_uris[0].extract);
        assert!(!task.fetch_uris[1].extract);
        assert!(task.fetch_uris[2].executable);
        assert!(task.fetch_uris[2].cache);
    }

    #[test]
    fn archive_suffixes() {
        for uri in [
            "a.tgz", "a.tar.gz", "a.tbz2", "a.tar.bz2", "a.txz", "a.tar.xz", "a.zip",
        ] {
            assert!(is_archive(uri), "{uri}");
        }
        assert!(!is_archive("a.sh"));
        assert!(!is_archive("a.tar.gz.asc"));
    }

    #[test]
    fn empty_history_counts_as_terminated() {
        let task = Task::default();
        assert!(task.is_terminated());
        assert_eq!(task.current_state(), None);
        assert_eq!(task.last_updated(), 0);
    }

    #[test]
    fn was_running_scans_history() {
        let mut task = Task::new(test_request(), "test");
        assert!(!task.was_running());

        task.update_status(Status { status: TaskState::Running, time: 10 });
        task.update_status(Status { status: TaskState::Failed, time: 20 });

        assert!(task.was_running());
        assert!(!task.is_running());
        assert!(task.is_terminated());
        assert_eq!(task.last_updated(), 20);
    }

    #[test]
    fn terminating_predicate() {
        let mut task = Task::new(test_request(), "test");
        task.update_status(Status { status: TaskState::Terminating, time: 5 });
        assert!(task.is_terminating());
        assert!(!task.is_terminated());
    }

    #[test]
    fn status_history_serializes_in_order() {
        let mut task = Task::new(test_request(), "test");
        task.update_status(Status { status: TaskState::Staging, time: 2 });
        task.update_status(Status { status: TaskState::Running, time: 3 });

        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, task.status);
        assert_eq!(back.current_state(), Some(TaskState::Running));
    }
}
