//! hermit-store — durable task persistence for Hermit.
//!
//! The [`TaskStore`] trait is the capability set the scheduler needs:
//! put, read, delete, enumerate non-terminal tasks, reset, release. The
//! masking of sensitive environment values lives in the trait's provided
//! methods, above the backends, so every backend inherits the policy.
//!
//! Two backends are provided:
//! - [`EmbeddedStore`] — a single-file redb database (in-memory variant
//!   for tests)
//! - [`TreeStore`] — a coordination-service tree behind the
//!   [`TreeConnection`] seam; the concrete client is wired by the
//!   embedding application

pub mod embedded;
pub mod error;
pub mod store;
pub mod tree;

pub use embedded::EmbeddedStore;
pub use error::{StoreError, StoreResult};
pub use store::{MASK, TaskStore};
pub use tree::{TreeConnection, TreeStore, parse_tree_path};
