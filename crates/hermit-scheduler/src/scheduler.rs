//! The scheduler core.
//!
//! Single-writer event loop over the task queue and the store. Offers
//! and status updates arrive serially through the driver's event demux;
//! submission and kill come in from the API side. Re-enqueues are
//! detached so a full queue can never deadlock the event loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use hermit_core::{Request, Status, Task, TaskState, epoch_secs};
use hermit_driver::{
    Caller, Driver, EventHandler, Filters, FrameworkInfo, MasterCaller, MasterTransport, Offer,
    Operation, TaskStatus,
};
use hermit_store::{StoreError, TaskStore};

use crate::callback;
use crate::error::{SchedulerError, SchedulerResult};
use crate::extractor;
use crate::launch::build_launch;
use crate::matcher::match_offer;
use crate::metrics::{Metrics, Sequence};
use crate::reconcile::{self, Reconciler};

/// Launch retries before a FAILED-before-RUNNING task is given up on.
pub const MAX_RETRIES: u32 = 5;

/// Base for the randomized refuse-seconds filter on declines.
const REFUSE_BASE_SECONDS: f64 = 10.0;

/// How long a submission waits for queue space before `QueueFull`.
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct SchedulerConfig {
    pub max_queue_size: usize,
}

/// The scheduling engine. One instance per process; all task mutation
/// funnels through its driver callbacks.
pub struct Scheduler<C> {
    store: Arc<dyn TaskStore>,
    caller: Arc<C>,
    metrics: Arc<Metrics>,
    queue_tx: mpsc::Sender<String>,
    queue_rx: tokio::sync::Mutex<mpsc::Receiver<String>>,
    shutdown_tx: watch::Sender<bool>,
    reconciler: Mutex<Option<Reconciler>>,
    subscribed_before: AtomicBool,
}

impl<C: MasterCaller> Scheduler<C> {
    pub fn new(store: Arc<dyn TaskStore>, caller: Arc<C>, config: SchedulerConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.max_queue_size.max(1));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            caller,
            metrics: Arc::new(Metrics::new()),
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            shutdown_tx,
            reconciler: Mutex::new(None),
            subscribed_before: AtomicBool::new(false),
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Receiver that flips to `true` on [`Scheduler::stop`].
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Validate and enqueue a submission. Returns the new task id, or
    /// `QueueFull` after the enqueue timeout.
    pub async fn schedule(&self, request: Request) -> SchedulerResult<String> {
        validate(&request)?;
        let name = if request.name.is_empty() {
            default_name()
        } else {
            request.name.clone()
        };
        let task = Task::new(request, &name);

        // Persist before enqueueing so a concurrent offer batch can never
        // dequeue an id the store does not know yet.
        self.store.put(&task)?;
        match tokio::time::timeout(ENQUEUE_TIMEOUT, self.queue_tx.send(task.id.clone())).await {
            Ok(Ok(())) => {}
            _ => {
                debug!(task_id = %task.id, "queue full, submission rejected");
                if let Err(e) = self.store.delete(&task.id) {
                    warn!(task_id = %task.id, error = %e, "removing rejected submission failed");
                }
                return Err(SchedulerError::QueueFull);
            }
        }

        self.metrics.task_created();
        self.metrics.queue_inc();
        info!(task_id = %task.id, name = %task.name, "task scheduled");
        Ok(task.id)
    }

    /// Request a kill. Waiting tasks are handled locally on the next
    /// dequeue; launched tasks also get a kill call to the master.
    pub async fn kill(&self, id: &str) -> SchedulerResult<()> {
        let mut task = self.store.read_unmasked(id).map_err(|e| match e {
            StoreError::NotFound(_) => SchedulerError::NotFound(id.to_string()),
            other => SchedulerError::Store(other),
        })?;
        if task.is_terminated() {
            return Err(SchedulerError::IllegalState(id.to_string()));
        }

        let waiting = task.is_waiting();
        task.update_status(Status {
            status: TaskState::Terminating,
            time: epoch_secs(),
        });
        self.store.put(&task)?;
        info!(task_id = %id, "kill requested");

        if !waiting {
            self.caller
                .kill(task.id.clone(), task.agent_id.clone())
                .await?;
        }
        Ok(())
    }

    /// Signal shutdown and cancel any in-flight reconciliation.
    pub fn stop(&self) {
        info!("scheduler stopping");
        let _ = self.shutdown_tx.send(true);
        if let Some(job) = self.reconciler.lock().unwrap().take() {
            job.cancel();
        }
    }

    fn filters(&self) -> Filters {
        // Jittered so a herd of frameworks does not pounce on the same
        // re-offer at once.
        Filters {
            refuse_seconds: rand::thread_rng().gen_range(0.0..REFUSE_BASE_SECONDS),
        }
    }

    fn start_reconciler(&self) {
        let mut guard = self.reconciler.lock().unwrap();
        if let Some(old) = guard.take() {
            old.cancel();
        }
        *guard = Some(reconcile::start(self.store.clone(), self.caller.clone()));
    }

    async fn handle_offers(&self, mut offers: Vec<Offer>) {
        let shutdown = self.shutdown_tx.subscribe();
        let mut queue = self.queue_rx.lock().await;

        loop {
            if *shutdown.borrow() {
                break;
            }
            let id = match queue.try_recv() {
                Ok(id) => id,
                Err(_) => break,
            };

            let task = match self.store.read_unmasked(&id) {
                Ok(task) => task,
                Err(e) => {
                    warn!(task_id = %id, error = %e, "dequeued task unreadable, dropping");
                    continue;
                }
            };

            if task.is_terminating() {
                let mut task = task;
                task.update_status(Status {
                    status: TaskState::Killed,
                    time: epoch_secs(),
                });
                info!(task_id = %task.id, "killed before launch");
                if let Err(e) = self.store.put(&task) {
                    error!(task_id = %task.id, error = %e, "persisting kill failed");
                }
                continue;
            }

            let (matched, rest) = match_offer(&task, offers);
            offers = rest;
            let Some(offer) = matched else {
                debug!(task_id = %task.id, "no matching offer, delaying");
                self.metrics.task_delayed();
                let tx = self.queue_tx.clone();
                let id = task.id.clone();
                // Detached: a full queue must not stall the event loop.
                tokio::spawn(async move {
                    let _ = tx.send(id).await;
                });
                break;
            };

            let (mut task, launch) = build_launch(task, &offer);
            task.update_status(Status {
                status: TaskState::Staging,
                time: epoch_secs(),
            });

            let send = self
                .caller
                .accept(
                    offer.id.clone(),
                    vec![Operation::Launch { task_infos: vec![launch] }],
                    self.filters(),
                )
                .await;
            match send {
                Ok(()) => {
                    info!(task_id = %task.id, agent = %offer.hostname, "task launched");
                    self.metrics.task_launched();
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "launch send failed");
                    task.update_status(Status {
                        status: TaskState::Error,
                        time: epoch_secs(),
                    });
                }
            }
            self.metrics.queue_dec();
            if let Err(e) = self.store.put(&task) {
                error!(task_id = %task.id, error = %e, "persisting launch failed");
            }
        }
        drop(queue);

        if !offers.is_empty() {
            let ids: Vec<String> = offers.iter().map(|o| o.id.clone()).collect();
            debug!(count = ids.len(), "declining unused offers");
            if let Err(e) = self.caller.decline(ids, self.filters()).await {
                warn!(error = %e, "decline failed");
            }
        }
    }

    async fn handle_update(&self, update: TaskStatus) {
        let mut task = match self.store.read_unmasked(&update.task_id) {
            Ok(task) => task,
            Err(StoreError::NotFound(_)) => {
                // Orphan update: capture what the master told us.
                warn!(task_id = %update.task_id, "update for unknown task, synthesizing record");
                Task {
                    id: update.task_id.clone(),
                    agent_id: update.agent_id.clone(),
                    ..Task::default()
                }
            }
            Err(e) => {
                error!(task_id = %update.task_id, error = %e, "update read failed");
                return;
            }
        };

        // Terminal histories never grow again; a redelivered terminal
        // update must not re-fire callbacks or metrics.
        if task.current_state().is_some_and(|s| s.is_terminal()) {
            debug!(task_id = %task.id, state = %update.state, "update for terminated task, ignoring");
            return;
        }

        if task.sandbox_path.is_empty() {
            if let Some(path) = extractor::sandbox_path(&update.data) {
                task.sandbox_path = path;
            }
        }

        let new_state = update.state;
        debug!(task_id = %task.id, state = %new_state, "status update");

        if new_state == TaskState::Running && !task.is_running() {
            self.metrics.running_inc();
        }

        let should_retry =
            new_state == TaskState::Failed && !task.was_running() && task.retry < MAX_RETRIES;

        if new_state.is_terminal() {
            let sequence = if should_retry { Sequence::Retry } else { Sequence::Final };
            self.metrics.task_terminated(new_state, sequence);
            if task.was_running() {
                self.metrics.running_dec();
            }
        }

        task.update_status(Status { status: new_state, time: epoch_secs() });

        if should_retry {
            info!(task_id = %task.id, retry = task.retry + 1, "retrying failed task");
            task.update_status(Status { status: TaskState::Queued, time: epoch_secs() });
            task.retry += 1;
            let tx = self.queue_tx.clone();
            let id = task.id.clone();
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                metrics.queue_inc();
                let _ = tx.send(id).await;
            });
        } else if new_state.is_terminal() {
            callback::notify(&task);
        }

        if let Err(e) = self.store.put(&task) {
            error!(task_id = %task.id, error = %e, "persisting update failed");
        }
    }
}

impl<T: MasterTransport> Scheduler<Caller<T>> {
    /// Build the driver and run until shutdown or a fatal driver error.
    pub async fn run(
        self: &Arc<Self>,
        transport: Arc<T>,
        framework: FrameworkInfo,
    ) -> SchedulerResult<()> {
        let driver = Driver::new(
            self.clone(),
            transport,
            self.caller.clone(),
            framework,
        );
        driver.run(self.shutdown_signal()).await?;
        Ok(())
    }
}

impl<C: MasterCaller> EventHandler for Scheduler<C> {
    async fn subscribed(&self, framework_id: &str) {
        info!(framework_id = %framework_id, "framework subscribed");
        if self.subscribed_before.swap(true, Ordering::SeqCst) {
            // Re-subscription: the master may have dropped our tasks.
            self.start_reconciler();
        } else if let Err(e) = self.caller.reconcile(Vec::new()).await {
            warn!(error = %e, "initial reconcile failed");
        }
    }

    async fn resource_offers(&self, offers: Vec<Offer>) {
        self.handle_offers(offers).await;
    }

    async fn status_update(&self, status: TaskStatus) {
        self.handle_update(status).await;
    }
}

fn validate(request: &Request) -> SchedulerResult<()> {
    if request.cpus <= 0.0 {
        return Err(SchedulerError::InvalidRequest("cpus must be positive".to_string()));
    }
    if request.mem <= 0.0 {
        return Err(SchedulerError::InvalidRequest("mem must be positive".to_string()));
    }
    if request.image.is_empty() {
        return Err(SchedulerError::InvalidRequest("image must be set".to_string()));
    }
    Ok(())
}

/// Default name for unnamed submissions.
fn default_name() -> String {
    const CONSONANTS: &[u8] = b"bcdfghjklmnpqrstvwxz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..8)
        .map(|_| CONSONANTS[rng.gen_range(0..CONSONANTS.len())] as char)
        .collect();
    format!("Hermit task {suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_bad_requests() {
        let good = Request {
            cpus: 0.5,
            mem: 64.0,
            image: "busybox".to_string(),
            ..Request::default()
        };
        assert!(validate(&good).is_ok());

        let no_cpu = Request { cpus: 0.0, ..good.clone() };
        assert!(matches!(validate(&no_cpu), Err(SchedulerError::InvalidRequest(_))));

        let no_mem = Request { mem: -1.0, ..good.clone() };
        assert!(matches!(validate(&no_mem), Err(SchedulerError::InvalidRequest(_))));

        let no_image = Request { image: String::new(), ..good };
        assert!(matches!(validate(&no_image), Err(SchedulerError::InvalidRequest(_))));
    }

    #[test]
    fn default_names_have_a_suffix() {
        let name = default_name();
        assert!(name.starts_with("Hermit task "));
        assert_eq!(name.len(), "Hermit task ".len() + 8);
        assert_ne!(default_name(), name);
    }
}
