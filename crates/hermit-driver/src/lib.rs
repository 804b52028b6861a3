//! Master connection driver.
//!
//! Owns the subscription lifecycle against the cluster master: connect,
//! subscribe, demultiplex the event stream to a handler, reconnect with
//! backoff on stream loss, and expose a typed call surface
//! ([`MasterCaller`]) for the scheduling core.

mod caller;
mod driver;
mod error;
mod transport;
mod types;

pub use caller::{Caller, MasterCaller};
pub use driver::{Driver, EventHandler};
pub use error::{DriverError, DriverResult};
pub use transport::{HttpTransport, MasterTransport};
pub use types::{
    Attribute, AttributeValue, Call, CommandInfo, CommandUri, ContainerInfo, Credentials, EnvVar,
    Event, Filters, FrameworkInfo, NetworkMode, Offer, Operation, Parameter, PortMapping,
    ReconcileTask, Resource, ResourceValue, TaskInfo, TaskStatus, Unavailability, ValueRange,
    VolumeInfo, VolumeMode,
};
