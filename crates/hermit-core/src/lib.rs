//! hermit-core — the task model at the heart of Hermit.
//!
//! A task is an immutable identity plus an append-only log of status
//! transitions. Everything else in the system (store, matcher, scheduler)
//! reads that log through the predicates defined here and appends to it
//! through [`Task::update_status`].

pub mod request;
pub mod state;
pub mod task;

pub use request::Request;
pub use state::TaskState;
pub use task::{
    AgentConstraint, FetchUri, Port, Status, Task, Volume, epoch_secs, is_archive,
};
