//! Offer matching.
//!
//! Each requirement is a small predicate with a description; a task
//! matches an offer when every predicate holds. New requirements extend
//! the list rather than the matcher.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use hermit_core::Task;
use hermit_driver::{AttributeValue, Offer};

/// A single requirement an offer must satisfy.
pub trait OfferPredicate {
    fn matches(&self, offer: &Offer) -> bool;
    fn describe(&self) -> String;
}

/// Scalar resource at least `amount`.
struct ScalarAtLeast {
    resource: &'static str,
    amount: f64,
}

impl OfferPredicate for ScalarAtLeast {
    fn matches(&self, offer: &Offer) -> bool {
        offer
            .resources
            .iter()
            .filter(|r| r.name == self.resource)
            .filter_map(|r| r.as_scalar())
            .any(|v| v >= self.amount)
    }

    fn describe(&self) -> String {
        format!("{} >= {}", self.resource, self.amount)
    }
}

/// Text attribute equality.
struct AttributeEquals {
    name: String,
    value: String,
}

impl OfferPredicate for AttributeEquals {
    fn matches(&self, offer: &Offer) -> bool {
        offer.attributes.iter().any(|a| {
            a.name == self.name
                && matches!(&a.value, AttributeValue::Text(t) if *t == self.value)
        })
    }

    fn describe(&self) -> String {
        format!("attribute {} == {}", self.name, self.value)
    }
}

/// The agent is not inside a maintenance window at `now`.
struct AvailableAt {
    now_nanos: i64,
}

impl OfferPredicate for AvailableAt {
    fn matches(&self, offer: &Offer) -> bool {
        match offer.unavailability {
            None => true,
            Some(window) => {
                if self.now_nanos < window.start_nanos {
                    return true;
                }
                match window.duration_nanos {
                    // A window without a duration never ends.
                    None => false,
                    Some(duration) => self.now_nanos > window.start_nanos + duration,
                }
            }
        }
    }

    fn describe(&self) -> String {
        "agent available".to_string()
    }
}

fn predicates_for(task: &Task, now_nanos: i64) -> Vec<Box<dyn OfferPredicate>> {
    let mut predicates: Vec<Box<dyn OfferPredicate>> = vec![
        Box::new(ScalarAtLeast { resource: "cpus", amount: task.cpus }),
        Box::new(ScalarAtLeast { resource: "mem", amount: task.mem }),
        Box::new(AvailableAt { now_nanos }),
    ];
    for constraint in &task.agent_constraints {
        predicates.push(Box::new(AttributeEquals {
            name: constraint.attribute_name.clone(),
            value: constraint.attribute_value.clone(),
        }));
    }
    predicates
}

/// Whether `offer` can host `task` at `now`.
pub fn matches_at(task: &Task, offer: &Offer, now_nanos: i64) -> bool {
    for predicate in predicates_for(task, now_nanos) {
        if !predicate.matches(offer) {
            debug!(
                task_id = %task.id,
                offer_id = %offer.id,
                requirement = %predicate.describe(),
                "offer rejected"
            );
            return false;
        }
    }
    true
}

/// Pick the first matching offer and remove it from the batch via
/// swap-remove; the order of the remainder is not preserved. Unmatched
/// offers stay available for the next task in the same batch.
pub fn match_offer(task: &Task, mut offers: Vec<Offer>) -> (Option<Offer>, Vec<Offer>) {
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64;
    match offers.iter().position(|o| matches_at(task, o, now_nanos)) {
        Some(idx) => {
            let matched = offers.swap_remove(idx);
            (Some(matched), offers)
        }
        None => (None, offers),
    }
}
