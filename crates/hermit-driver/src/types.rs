//! Typed model of the cluster protocol: offers, status updates, the
//! calls we send and the events we receive.
//!
//! Only the event kinds the scheduler reacts to are modeled; the wire
//! codec behind [`crate::transport::MasterTransport`] maps to and from
//! these types.

use serde::{Deserialize, Serialize};

use hermit_core::TaskState;

// ── Offers ─────────────────────────────────────────────────────────

/// A bundle of resources the master advertises for a short window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub framework_id: String,
    pub agent_id: String,
    pub hostname: String,
    #[serde(default)]
    pub agent_ip: String,
    #[serde(default)]
    pub agent_port: i32,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub unavailability: Option<Unavailability>,
}

/// A named resource: a scalar amount or a set of value ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(flatten)]
    pub value: ResourceValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceValue {
    Scalar(f64),
    Ranges(Vec<ValueRange>),
}

/// An inclusive `[begin, end]` range of integer values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub begin: u64,
    pub end: u64,
}

impl Resource {
    pub fn scalar(name: &str, value: f64) -> Resource {
        Resource {
            name: name.to_string(),
            value: ResourceValue::Scalar(value),
        }
    }

    pub fn ranges(name: &str, ranges: Vec<ValueRange>) -> Resource {
        Resource {
            name: name.to_string(),
            value: ResourceValue::Ranges(ranges),
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self.value {
            ResourceValue::Scalar(v) => Some(v),
            ResourceValue::Ranges(_) => None,
        }
    }

    pub fn as_ranges(&self) -> Option<&[ValueRange]> {
        match &self.value {
            ResourceValue::Ranges(r) => Some(r),
            ResourceValue::Scalar(_) => None,
        }
    }
}

/// A typed agent attribute. Only text attributes participate in
/// constraint matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(flatten)]
    pub value: AttributeValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    Text(String),
    Scalar(f64),
}

impl Attribute {
    pub fn text(name: &str, value: &str) -> Attribute {
        Attribute {
            name: name.to_string(),
            value: AttributeValue::Text(value.to_string()),
        }
    }
}

/// A maintenance window on the offering agent. A window without a
/// duration is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unavailability {
    /// Window start, Unix nanoseconds.
    pub start_nanos: i64,
    /// Window length in nanoseconds; `None` means indefinite.
    #[serde(default)]
    pub duration_nanos: Option<i64>,
}

// ── Status updates ─────────────────────────────────────────────────

/// A task status update delivered by the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub state: TaskState,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub message: Option<String>,
    /// Opaque executor payload (mount metadata for docker tasks).
    #[serde(default)]
    pub data: Vec<u8>,
    /// Acknowledgment token; present iff the update must be acked.
    #[serde(default)]
    pub uuid: Option<Vec<u8>>,
}

// ── Launch descriptors ─────────────────────────────────────────────

/// A concrete launch descriptor for one task on one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: String,
    pub name: String,
    pub agent_id: String,
    pub command: CommandInfo,
    pub container: ContainerInfo,
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub shell: bool,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
    pub user: String,
    #[serde(default)]
    pub environment: Vec<EnvVar>,
    #[serde(default)]
    pub uris: Vec<CommandUri>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandUri {
    pub value: String,
    pub extract: bool,
    pub executable: bool,
    pub cache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub image: String,
    pub network: NetworkMode,
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
    pub force_pull_image: bool,
    pub privileged: bool,
    #[serde(default)]
    pub volumes: Vec<VolumeInfo>,
    /// Extra container runtime parameters (e.g. dns).
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkMode {
    Bridge,
    Host,
    None,
}

impl NetworkMode {
    /// Map a request's network name; anything unrecognized (including
    /// the empty string) falls back to bridge.
    pub fn from_name(name: &str) -> NetworkMode {
        match name.to_ascii_uppercase().as_str() {
            "HOST" => NetworkMode::Host,
            "NONE" => NetworkMode::None,
            _ => NetworkMode::Bridge,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u32,
    pub host_port: u32,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub container_path: String,
    pub host_path: String,
    pub mode: VolumeMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeMode {
    Rw,
    Ro,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub key: String,
    pub value: String,
}

// ── Calls ──────────────────────────────────────────────────────────

/// Identity the framework subscribes with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    /// Set on failover to resume an earlier registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub user: String,
    pub checkpoint: bool,
    pub failover_timeout: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
}

/// Authentication material loaded from the credentials file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub principal: String,
    pub secret: String,
}

/// A hint to the master not to re-offer declined resources for a while.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    pub refuse_seconds: f64,
}

/// An operation carried by an ACCEPT call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Launch { task_infos: Vec<TaskInfo> },
}

/// One (task, agent) pair in a RECONCILE call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileTask {
    pub task_id: String,
    pub agent_id: String,
}

/// A call sent to the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Call {
    Subscribe {
        framework: FrameworkInfo,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credentials: Option<Credentials>,
    },
    Accept {
        framework_id: String,
        offer_ids: Vec<String>,
        operations: Vec<Operation>,
        filters: Filters,
    },
    Decline {
        framework_id: String,
        offer_ids: Vec<String>,
        filters: Filters,
    },
    Kill {
        framework_id: String,
        task_id: String,
        agent_id: String,
    },
    Acknowledge {
        framework_id: String,
        agent_id: String,
        task_id: String,
        uuid: Vec<u8>,
    },
    Reconcile {
        framework_id: String,
        tasks: Vec<ReconcileTask>,
    },
}

// ── Events ─────────────────────────────────────────────────────────

/// An event received from the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    Subscribed {
        framework_id: String,
    },
    Offers {
        offers: Vec<Offer>,
    },
    InverseOffers {
        offer_ids: Vec<String>,
    },
    Rescind {
        offer_id: String,
    },
    RescindInverseOffer {
        offer_id: String,
    },
    Update {
        status: TaskStatus,
    },
    Message {
        agent_id: String,
        executor_id: String,
        data: Vec<u8>,
    },
    Failure {
        #[serde(default)]
        agent_id: Option<String>,
        #[serde(default)]
        executor_id: Option<String>,
        #[serde(default)]
        status: Option<i32>,
    },
    Error {
        message: String,
    },
    Heartbeat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_scalar_accessors() {
        let cpus = Resource::scalar("cpus", 1.5);
        assert_eq!(cpus.as_scalar(), Some(1.5));
        assert!(cpus.as_ranges().is_none());

        let ports = Resource::ranges("ports", vec![ValueRange { begin: 31000, end: 31009 }]);
        assert!(ports.as_scalar().is_none());
        assert_eq!(ports.as_ranges().unwrap().len(), 1);
    }

    #[test]
    fn network_mode_defaults_to_bridge() {
        assert_eq!(NetworkMode::from_name(""), NetworkMode::Bridge);
        assert_eq!(NetworkMode::from_name("host"), NetworkMode::Host);
        assert_eq!(NetworkMode::from_name("NONE"), NetworkMode::None);
        assert_eq!(NetworkMode::from_name("overlay"), NetworkMode::Bridge);
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = Event::Offers {
            offers: vec![Offer {
                id: "o-1".to_string(),
                framework_id: "fw-1".to_string(),
                agent_id: "agent-1".to_string(),
                hostname: "node1".to_string(),
                agent_ip: "10.0.0.1".to_string(),
                agent_port: 5051,
                resources: vec![Resource::scalar("cpus", 4.0)],
                attributes: vec![Attribute::text("rack", "a1")],
                unavailability: None,
            }],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"OFFERS\""));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn call_is_internally_tagged() {
        let call = Call::Kill {
            framework_id: "fw-1".to_string(),
            task_id: "hermit-task.abc".to_string(),
            agent_id: "agent-1".to_string(),
        };
        let json = serde_json::to_string(&call).unwrap();
        assert!(json.contains("\"type\":\"KILL\""));
    }

    #[test]
    fn heartbeat_round_trips() {
        let json = serde_json::to_string(&Event::Heartbeat).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Event::Heartbeat);
    }
}
