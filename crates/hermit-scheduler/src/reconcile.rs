//! Status reconciliation.
//!
//! After a (re-)subscription the master may have forgotten tasks we
//! believe to be live. One background job repeatedly asks it to replay
//! status for every non-terminal task until each has been observed
//! post-start, backing off exponentially. At most one job runs; the
//! scheduler cancels the old one before starting a new one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hermit_core::epoch_secs;
use hermit_driver::{MasterCaller, ReconcileTask};
use hermit_store::TaskStore;

const INITIAL_DELAY: Duration = Duration::from_secs(1);
const BASE_DELAY_SECONDS: u64 = 10;
const MAX_DELAY_SECONDS: u64 = 120;

/// Handle to a running reconciliation job.
pub struct Reconciler {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Reconciler {
    /// Ask the job to stop at its next iteration.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Wait for the job to finish (after completion or cancellation).
    pub async fn wait(self) {
        let _ = self.handle.await;
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Snapshot the non-terminal tasks and spawn the reconciliation loop.
pub fn start<C: MasterCaller>(store: Arc<dyn TaskStore>, caller: Arc<C>) -> Reconciler {
    let (cancel, mut cancelled) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let start_time = epoch_secs();
        let mut batch: Vec<ReconcileTask> = match store.list_non_terminal() {
            Ok(tasks) => tasks
                .into_iter()
                .map(|t| ReconcileTask { task_id: t.id, agent_id: t.agent_id })
                .collect(),
            Err(e) => {
                warn!(error = %e, "reconciliation snapshot failed");
                return;
            }
        };
        if batch.is_empty() {
            debug!("nothing to reconcile");
            return;
        }
        info!(count = batch.len(), "reconciling task statuses");

        let mut delay = INITIAL_DELAY;
        let mut iteration = 0u32;
        loop {
            tokio::select! {
                _ = cancelled.changed() => {
                    debug!("reconciliation cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            // Drop tasks a fresh status update has already covered.
            batch.retain(|entry| match store.read(&entry.task_id) {
                Ok(task) => task.last_updated() < start_time,
                Err(e) => {
                    warn!(task_id = %entry.task_id, error = %e, "dropping task from reconciliation");
                    false
                }
            });
            if batch.is_empty() {
                info!("reconciliation complete");
                return;
            }

            if let Err(e) = caller.reconcile(batch.clone()).await {
                warn!(error = %e, "reconcile call failed");
            }

            let seconds = BASE_DELAY_SECONDS
                .saturating_mul(1u64 << iteration.min(32))
                .min(MAX_DELAY_SECONDS);
            delay = Duration::from_secs(seconds);
            iteration += 1;
        }
    });
    Reconciler { cancel, handle }
}
