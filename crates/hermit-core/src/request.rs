//! The submission request record.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::task::{AgentConstraint, FetchUri, Port, Volume};

/// A task submission as handed to the scheduler by the API layer.
///
/// Two wire generations coexist; the older one spells the resource and
/// image keys differently, so those fields carry serde aliases and either
/// shape deserializes into the same record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "cpu", alias = "task_cpus")]
    pub cpus: f64,
    #[serde(rename = "mem", alias = "task_mem")]
    pub mem: f64,
    #[serde(rename = "image", alias = "docker_image")]
    pub image: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub masked_env: HashMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default, alias = "slave_constraints")]
    pub agent_constraints: Vec<AgentConstraint>,
    #[serde(default)]
    pub callback_uri: String,
    /// Legacy plain fetch list; merged with `fetch` at task construction.
    #[serde(default)]
    pub uris: Vec<String>,
    #[serde(default)]
    pub fetch: Vec<FetchUri>,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub dns: Option<String>,
    #[serde(default)]
    pub force_pull_image: bool,
    #[serde(default)]
    pub privileged: bool,
}
