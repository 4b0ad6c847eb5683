//! Dispatcher, access-control gate, and lifecycle orchestration on top of
//! `fabric_core`'s routing table, queues, and external-collaborator
//! contracts.

pub mod acl_gate;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;

pub mod prelude {
    pub use crate::acl_gate::{AccessControlGate, GateOutcome};
    pub use crate::dispatcher::{AddressTypeTagResolver, Dispatcher, DispatcherConfig, RoutingEventListener, TransportStatusResolver};
    pub use crate::error::SwitchError;
    pub use crate::lifecycle::{Lifecycle, Shutdown};
}
