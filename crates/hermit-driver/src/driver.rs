//! Subscription lifecycle and event demultiplexing.
//!
//! The driver keeps exactly one subscription alive. When the stream
//! drops it reconnects with doubling backoff (1s up to 15s); a
//! confirmed subscription resets the backoff. Inbound events are fanned
//! out to an [`EventHandler`]; status updates are acknowledged only
//! after the handler has returned.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::caller::{Caller, MasterCaller};
use crate::error::{DriverError, DriverResult};
use crate::transport::MasterTransport;
use crate::types::{Event, FrameworkInfo, Offer, TaskStatus};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(15);

/// What the scheduling core reacts to. Everything else the master sends
/// is consumed by the driver itself.
pub trait EventHandler: Send + Sync + 'static {
    fn subscribed(&self, framework_id: &str) -> impl Future<Output = ()> + Send;

    fn resource_offers(&self, offers: Vec<Offer>) -> impl Future<Output = ()> + Send;

    fn status_update(&self, status: TaskStatus) -> impl Future<Output = ()> + Send;
}

/// Connection driver: one instance per process.
pub struct Driver<H, T> {
    handler: Arc<H>,
    transport: Arc<T>,
    caller: Arc<Caller<T>>,
    framework: FrameworkInfo,
}

impl<H: EventHandler, T: MasterTransport> Driver<H, T> {
    /// The caller must be bound to the same transport so calls carry the
    /// stream id of the live subscription.
    pub fn new(
        handler: Arc<H>,
        transport: Arc<T>,
        caller: Arc<Caller<T>>,
        framework: FrameworkInfo,
    ) -> Self {
        Self {
            handler,
            transport,
            caller,
            framework,
        }
    }

    /// Run until shutdown is signalled or the master reports a fatal
    /// framework error.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> DriverResult<()> {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let mut events = match self.transport.subscribe(&self.framework).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!(error = %e, delay = ?backoff, "subscription attempt failed");
                    tokio::select! {
                        _ = shutdown.changed() => return Ok(()),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };
            debug!("subscription stream opened");

            loop {
                tokio::select! {
                    _ = shutdown.changed() => return Ok(()),
                    event = events.recv() => match event {
                        Some(event) => {
                            if let Err(e) = self.dispatch(event, &mut backoff).await {
                                return Err(e);
                            }
                        }
                        None => {
                            warn!("event stream closed, resubscribing");
                            break;
                        }
                    }
                }
            }

            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn dispatch(&self, event: Event, backoff: &mut Duration) -> DriverResult<()> {
        match event {
            Event::Subscribed { framework_id } => {
                info!(framework_id = %framework_id, "subscribed to master");
                self.caller.set_framework_id(&framework_id);
                *backoff = INITIAL_BACKOFF;
                self.handler.subscribed(&framework_id).await;
            }
            Event::Offers { offers } => {
                debug!(count = offers.len(), "resource offers received");
                self.handler.resource_offers(offers).await;
            }
            Event::Update { status } => {
                let ack = status
                    .uuid
                    .clone()
                    .map(|uuid| (status.agent_id.clone(), status.task_id.clone(), uuid));
                self.handler.status_update(status).await;
                // Ack only after the update has been applied; a crash
                // before this point makes the master redeliver.
                if let Some((agent_id, task_id, uuid)) = ack {
                    if let Err(e) = self.caller.acknowledge(agent_id, task_id, uuid).await {
                        warn!(error = %e, "status acknowledgement failed");
                    }
                }
            }
            Event::Error { message } => {
                return Err(DriverError::Master(message));
            }
            Event::Rescind { offer_id } => {
                debug!(offer_id = %offer_id, "offer rescinded");
            }
            Event::InverseOffers { offer_ids } => {
                debug!(count = offer_ids.len(), "inverse offers received");
            }
            Event::RescindInverseOffer { offer_id } => {
                debug!(offer_id = %offer_id, "inverse offer rescinded");
            }
            Event::Message { agent_id, .. } => {
                debug!(agent_id = %agent_id, "framework message received");
            }
            Event::Failure { agent_id, .. } => {
                warn!(agent_id = ?agent_id, "agent or executor failure reported");
            }
            Event::Heartbeat => {}
        }
        Ok(())
    }
}
