//! The Hermit scheduling engine.
//!
//! Offers and status updates come in from the driver; submissions and
//! kills come in from the embedding API layer. The core matches queued
//! tasks against offers, builds launch descriptors, drives the task
//! state machine, reconciles with the master after (re-)subscription,
//! retries transient launch failures, and notifies submitters of
//! terminal states.

mod callback;
mod error;
mod extractor;
mod launch;
mod matcher;
mod metrics;
mod reconcile;
mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use launch::build_launch;
pub use matcher::{OfferPredicate, match_offer, matches_at};
pub use metrics::{Metrics, Sequence};
pub use reconcile::Reconciler;
pub use scheduler::{MAX_RETRIES, Scheduler, SchedulerConfig};
