//! The store capability set and the masking policy.

use hermit_core::Task;

use crate::error::StoreResult;

/// The sentinel substituted for every masked environment value on read.
pub const MASK: &str = "*******";

/// Durable mapping of task id → task record.
///
/// Backends implement the required methods; masking and non-terminal
/// enumeration are provided on top so the policy is identical across
/// backends. `read_unmasked` exists for the scheduler's
/// read-modify-persist cycle only — handing its result to anything
/// outside the core would leak the masked values.
pub trait TaskStore: Send + Sync {
    /// Upsert by `task.id`. Durable before return.
    fn put(&self, task: &Task) -> StoreResult<()>;

    /// Return the task verbatim, or `NotFound`.
    fn read_unmasked(&self, id: &str) -> StoreResult<Task>;

    /// Remove a task. Deleting an absent id is not an error.
    fn delete(&self, id: &str) -> StoreResult<()>;

    /// Enumerate every stored task, unmasked.
    fn list_unmasked(&self) -> StoreResult<Vec<Task>>;

    /// Drop all stored tasks.
    fn clean(&self) -> StoreResult<()>;

    /// Release the backend.
    fn close(&self);

    /// Return the task with masking applied.
    fn read(&self, id: &str) -> StoreResult<Task> {
        let mut task = self.read_unmasked(id)?;
        apply_mask(&mut task);
        Ok(task)
    }

    /// Enumerate all tasks whose current state is non-terminal, masked.
    fn list_non_terminal(&self) -> StoreResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .list_unmasked()?
            .into_iter()
            .filter(|t| !t.is_terminated())
            .collect();
        for task in &mut tasks {
            apply_mask(task);
        }
        Ok(tasks)
    }
}

/// Replace every masked environment value with the sentinel. The stored
/// record is untouched; this runs on the copy being returned.
fn apply_mask(task: &mut Task) {
    for value in task.masked_env.values_mut() {
        *value = MASK.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn mask_replaces_all_values() {
        let mut task = Task {
            masked_env: HashMap::from([
                ("SECRET".to_string(), "hunter2".to_string()),
                ("TOKEN".to_string(), "abc123".to_string()),
            ]),
            env: HashMap::from([("PLAIN".to_string(), "visible".to_string())]),
            ..Task::default()
        };
        apply_mask(&mut task);

        assert_eq!(task.masked_env["SECRET"], MASK);
        assert_eq!(task.masked_env["TOKEN"], MASK);
        assert_eq!(task.env["PLAIN"], "visible");
    }
}
