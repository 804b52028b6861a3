//! Scheduling metrics.
//!
//! A sink of atomics incremented at the transition points in the
//! scheduler core, plus Prometheus text exposition rendering. Failures
//! here can never affect scheduling.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use hermit_core::TaskState;

/// Whether a terminal transition will be retried or is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sequence {
    Retry,
    Final,
}

impl Sequence {
    fn as_str(self) -> &'static str {
        match self {
            Sequence::Retry => "retry",
            Sequence::Final => "final",
        }
    }
}

/// Counters and gauges for the scheduling core.
#[derive(Default)]
pub struct Metrics {
    created: AtomicU64,
    launched: AtomicU64,
    delayed: AtomicU64,
    running: AtomicI64,
    queue_size: AtomicI64,
    terminated: Mutex<HashMap<(TaskState, Sequence), u64>>,
}

impl Metrics {
    pub fn new() -> Metrics {
        Metrics::default()
    }

    pub fn task_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_launched(&self) {
        self.launched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_delayed(&self) {
        self.delayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_terminated(&self, state: TaskState, sequence: Sequence) {
        *self
            .terminated
            .lock()
            .unwrap()
            .entry((state, sequence))
            .or_insert(0) += 1;
    }

    pub fn running_inc(&self) {
        self.running.fetch_add(1, Ordering::Relaxed);
    }

    pub fn running_dec(&self) {
        self.running.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn queue_inc(&self) {
        self.queue_size.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queue_dec(&self) {
        self.queue_size.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn launched(&self) -> u64 {
        self.launched.load(Ordering::Relaxed)
    }

    pub fn delayed(&self) -> u64 {
        self.delayed.load(Ordering::Relaxed)
    }

    pub fn running(&self) -> i64 {
        self.running.load(Ordering::Relaxed)
    }

    pub fn queue_size(&self) -> i64 {
        self.queue_size.load(Ordering::Relaxed)
    }

    pub fn terminated(&self, state: TaskState, sequence: Sequence) -> u64 {
        self.terminated
            .lock()
            .unwrap()
            .get(&(state, sequence))
            .copied()
            .unwrap_or(0)
    }

    /// Render in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP hermit_tasks_created Tasks accepted for scheduling.\n");
        out.push_str("# TYPE hermit_tasks_created counter\n");
        out.push_str(&format!("hermit_tasks_created {}\n", self.created()));

        out.push_str("# HELP hermit_tasks_launched Tasks launched on an offer.\n");
        out.push_str("# TYPE hermit_tasks_launched counter\n");
        out.push_str(&format!("hermit_tasks_launched {}\n", self.launched()));

        out.push_str("# HELP hermit_tasks_delayed Tasks re-queued after no offer matched.\n");
        out.push_str("# TYPE hermit_tasks_delayed counter\n");
        out.push_str(&format!("hermit_tasks_delayed {}\n", self.delayed()));

        out.push_str("# HELP hermit_tasks_terminated Terminal transitions by state and sequence.\n");
        out.push_str("# TYPE hermit_tasks_terminated counter\n");
        let terminated = self.terminated.lock().unwrap();
        let mut entries: Vec<_> = terminated.iter().collect();
        entries.sort_by_key(|((state, sequence), _)| (state.as_str(), sequence.as_str()));
        for ((state, sequence), count) in entries {
            out.push_str(&format!(
                "hermit_tasks_terminated{{status=\"{}\",sequence=\"{}\"}} {}\n",
                state.as_str(),
                sequence.as_str(),
                count
            ));
        }
        drop(terminated);

        out.push_str("# HELP hermit_tasks_running Tasks currently running.\n");
        out.push_str("# TYPE hermit_tasks_running gauge\n");
        out.push_str(&format!("hermit_tasks_running {}\n", self.running()));

        out.push_str("# HELP hermit_queue_size Task ids waiting in the queue.\n");
        out.push_str("# TYPE hermit_queue_size gauge\n");
        out.push_str(&format!("hermit_queue_size {}\n", self.queue_size()));

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.task_created();
        metrics.task_created();
        metrics.task_launched();
        metrics.task_delayed();
        assert_eq!(metrics.created(), 2);
        assert_eq!(metrics.launched(), 1);
        assert_eq!(metrics.delayed(), 1);
    }

    #[test]
    fn gauges_move_both_ways() {
        let metrics = Metrics::new();
        metrics.queue_inc();
        metrics.queue_inc();
        metrics.queue_dec();
        assert_eq!(metrics.queue_size(), 1);

        metrics.running_inc();
        metrics.running_dec();
        assert_eq!(metrics.running(), 0);
    }

    #[test]
    fn terminated_labelled_by_state_and_sequence() {
        let metrics = Metrics::new();
        metrics.task_terminated(TaskState::Failed, Sequence::Retry);
        metrics.task_terminated(TaskState::Failed, Sequence::Final);
        metrics.task_terminated(TaskState::Failed, Sequence::Final);

        assert_eq!(metrics.terminated(TaskState::Failed, Sequence::Retry), 1);
        assert_eq!(metrics.terminated(TaskState::Failed, Sequence::Final), 2);
        assert_eq!(metrics.terminated(TaskState::Finished, Sequence::Final), 0);
    }

    #[test]
    fn render_contains_declarations_and_values() {
        let metrics = Metrics::new();
        metrics.task_created();
        metrics.task_terminated(TaskState::Finished, Sequence::Final);

        let output = metrics.render_prometheus();
        assert!(output.contains("# TYPE hermit_tasks_created counter"));
        assert!(output.contains("hermit_tasks_created 1"));
        assert!(output.contains(
            "hermit_tasks_terminated{status=\"FINISHED\",sequence=\"final\"} 1"
        ));
        assert!(output.contains("# TYPE hermit_queue_size gauge"));
    }
}
