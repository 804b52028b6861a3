//! Typed call surface over a transport.
//!
//! The scheduling core talks to the master exclusively through
//! [`MasterCaller`]; [`Caller`] is the production implementation that
//! stamps each call with the subscribed framework id.

use std::future::Future;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{DriverError, DriverResult};
use crate::transport::MasterTransport;
use crate::types::{Call, Filters, Operation, ReconcileTask};

/// The calls the scheduling core issues against the master.
pub trait MasterCaller: Send + Sync + 'static {
    /// Accept an offer, launching the given operations.
    fn accept(
        &self,
        offer_id: String,
        operations: Vec<Operation>,
        filters: Filters,
    ) -> impl Future<Output = DriverResult<()>> + Send;

    /// Decline offers, refusing re-offers for the filter window.
    fn decline(
        &self,
        offer_ids: Vec<String>,
        filters: Filters,
    ) -> impl Future<Output = DriverResult<()>> + Send;

    /// Ask the master to kill a task.
    fn kill(
        &self,
        task_id: String,
        agent_id: String,
    ) -> impl Future<Output = DriverResult<()>> + Send;

    /// Acknowledge a status update.
    fn acknowledge(
        &self,
        agent_id: String,
        task_id: String,
        uuid: Vec<u8>,
    ) -> impl Future<Output = DriverResult<()>> + Send;

    /// Request explicit reconciliation for the given tasks.
    fn reconcile(
        &self,
        tasks: Vec<ReconcileTask>,
    ) -> impl Future<Output = DriverResult<()>> + Send;
}

/// Stamps calls with the framework id learned at subscription time.
pub struct Caller<T> {
    transport: Arc<T>,
    framework_id: RwLock<Option<String>>,
}

impl<T: MasterTransport> Caller<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            framework_id: RwLock::new(None),
        }
    }

    /// Record the id the master assigned. Called by the driver when a
    /// subscription is confirmed.
    pub fn set_framework_id(&self, id: &str) {
        debug!(framework_id = %id, "framework id recorded");
        *self.framework_id.write().unwrap() = Some(id.to_string());
    }

    pub fn framework_id(&self) -> DriverResult<String> {
        self.framework_id
            .read()
            .unwrap()
            .clone()
            .ok_or(DriverError::NotSubscribed)
    }
}

impl<T: MasterTransport> MasterCaller for Caller<T> {
    async fn accept(
        &self,
        offer_id: String,
        operations: Vec<Operation>,
        filters: Filters,
    ) -> DriverResult<()> {
        let call = Call::Accept {
            framework_id: self.framework_id()?,
            offer_ids: vec![offer_id],
            operations,
            filters,
        };
        self.transport.call(call).await
    }

    async fn decline(&self, offer_ids: Vec<String>, filters: Filters) -> DriverResult<()> {
        let call = Call::Decline {
            framework_id: self.framework_id()?,
            offer_ids,
            filters,
        };
        self.transport.call(call).await
    }

    async fn kill(&self, task_id: String, agent_id: String) -> DriverResult<()> {
        let call = Call::Kill {
            framework_id: self.framework_id()?,
            task_id,
            agent_id,
        };
        self.transport.call(call).await
    }

    async fn acknowledge(
        &self,
        agent_id: String,
        task_id: String,
        uuid: Vec<u8>,
    ) -> DriverResult<()> {
        let call = Call::Acknowledge {
            framework_id: self.framework_id()?,
            agent_id,
            task_id,
            uuid,
        };
        self.transport.call(call).await
    }

    async fn reconcile(&self, tasks: Vec<ReconcileTask>) -> DriverResult<()> {
        let call = Call::Reconcile {
            framework_id: self.framework_id()?,
            tasks,
        };
        self.transport.call(call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use tokio::sync::mpsc;

    use crate::types::{Event, FrameworkInfo};

    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<Call>>,
    }

    impl MasterTransport for RecordingTransport {
        async fn subscribe(&self, _: &FrameworkInfo) -> DriverResult<mpsc::Receiver<Event>> {
            unimplemented!("not exercised here")
        }

        async fn call(&self, call: Call) -> DriverResult<()> {
            self.calls.lock().unwrap().push(call);
            Ok(())
        }
    }

    #[tokio::test]
    async fn calls_before_subscription_fail() {
        let caller = Caller::new(Arc::new(RecordingTransport::default()));
        let err = caller
            .kill("hermit-task.abc".to_string(), "agent-1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::NotSubscribed));
    }

    #[tokio::test]
    async fn calls_carry_the_framework_id() {
        let transport = Arc::new(RecordingTransport::default());
        let caller = Caller::new(transport.clone());
        caller.set_framework_id("fw-77");

        caller
            .decline(vec!["o-1".to_string()], Filters { refuse_seconds: 5.0 })
            .await
            .unwrap();

        let calls = transport.calls.lock().unwrap();
        match &calls[0] {
            Call::Decline { framework_id, offer_ids, .. } => {
                assert_eq!(framework_id, "fw-77");
                assert_eq!(offer_ids, &["o-1".to_string()]);
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }
}
