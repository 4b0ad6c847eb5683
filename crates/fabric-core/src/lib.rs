//! Routing table, message envelope, queues, and the external-collaborator
//! contracts shared by the cluster-controller message router.
//!
//! This crate holds no dispatch logic; it is the leaf layer consumed by
//! `fabric_switch`'s dispatcher, access-control gate, and lifecycle
//! orchestration, and is usable standalone by anything that wants the data
//! model without the orchestration on top of it.

pub mod address;
pub mod config;
pub mod contracts;
pub mod envelope;
pub mod error;
pub mod gate;
pub mod message_queue;
pub mod multicast;
pub mod observability;
pub mod routing_table;
pub mod scheduler;
pub mod task_sequencer;

pub mod prelude {
    pub use crate::address::Address;
    pub use crate::config::RouterSettings;
    pub use crate::contracts::{
        AccessController, ConsumerPermission, MessagingMulticastSubscriber, MessagingStubFactory,
        MulticastAddressCalculator, PlatformSecurityManager, Stub, TransmitError, TransportStatus,
    };
    pub use crate::envelope::{ImmutableMessage, MessageType, NewMessage};
    pub use crate::error::CoreError;
    pub use crate::gate::TransportAvailabilityGate;
    pub use crate::message_queue::BoundedMessageQueue;
    pub use crate::multicast::{MulticastMessagingSkeletonDirectory, MulticastReceiverDirectory};
    pub use crate::routing_table::{RoutingEntry, RoutingTable};
    pub use crate::scheduler::DelayedScheduler;
    pub use crate::task_sequencer::{SequencedTask, TaskSequencer};
}
