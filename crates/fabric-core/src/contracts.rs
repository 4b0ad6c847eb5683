//! External-collaborator contracts (§6): narrow trait interfaces the
//! dispatcher plugs transports, security, and discovery into. Concrete
//! implementations (MQTT, WebSocket, UDS stubs, the real access-control
//! policy store) live outside this workspace per §1's Non-goals.
//!
//! Grounded on `spark-core::contract`'s use of `async_trait` for
//! collaborator-facing traits the core itself never implements.

use async_trait::async_trait;

use crate::address::Address;
use crate::envelope::ImmutableMessage;

/// Outbound handle to transmit one message on a specific transport
/// (§6, GLOSSARY "Stub").
#[async_trait]
pub trait Stub: Send + Sync {
    /// Transmits `message`. `on_failure` is invoked with a [`TransmitError`]
    /// when the transport could not deliver it; a synchronous `Ok(())`
    /// means the message was released to the transport (§4.4.2).
    async fn transmit(&self, message: ImmutableMessage) -> Result<(), TransmitError>;
}

/// Failure reported by a [`Stub::transmit`] call (§4.4.2, §7).
#[derive(Debug, Clone)]
pub enum TransmitError {
    /// Transient failure; caller should reschedule with backoff.
    DelayMessage { reason: String },
    /// Permanent failure; caller should give up and surface an error.
    Permanent { reason: String },
}

/// Resolves an [`Address`] to a [`Stub`], or reports it cannot
/// (§6: `IMessagingStubFactory`).
pub trait MessagingStubFactory: Send + Sync {
    fn can_create(&self, address: &Address) -> bool;
    fn create(&self, address: &Address) -> Option<std::sync::Arc<dyn Stub>>;
}

/// Access-control verdict (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerPermission {
    Yes,
    No,
    Retry,
}

/// Consulted once per message before first transmission (§6:
/// `IAccessController::hasConsumerPermission`).
#[async_trait]
pub trait AccessController: Send + Sync {
    async fn has_consumer_permission(
        &self,
        message: &ImmutableMessage,
        is_local_recipient: bool,
    ) -> ConsumerPermission;
}

/// Computes the global multicast address for a provider/GBID pair
/// (§6: `IMulticastAddressCalculator`).
pub trait MulticastAddressCalculator: Send + Sync {
    fn compute(&self, message: &ImmutableMessage, gbid: &str) -> Option<Address>;
}

/// Subscribes/unsubscribes at a specific transport on behalf of the
/// multicast receiver directory (§6: `IMessagingMulticastSubscriber`,
/// GLOSSARY "Skeleton").
#[async_trait]
pub trait MessagingMulticastSubscriber: Send + Sync {
    async fn register_multicast_subscription(&self, multicast_id: &str) -> Result<(), String>;
    async fn unregister_multicast_subscription(&self, multicast_id: &str) -> Result<(), String>;
}

/// Reports and signals changes in a transport's availability
/// (§4.7, §6: `ITransportStatus`).
pub trait TransportStatus: Send + Sync {
    fn is_available(&self) -> bool;
    /// Registers `callback` to be invoked whenever availability changes.
    /// Implementations typically deliver this from their own I/O thread.
    fn subscribe(&self, callback: Box<dyn Fn(bool) + Send + Sync>);
    /// Stable key identifying this transport for the purposes of keying
    /// the transport-not-available queue.
    fn transport_key(&self) -> &str;
}

/// Validates and signs messages at the ingress/egress boundary
/// (§6: `IPlatformSecurityManager`). The core never performs crypto
/// itself (§1 Non-goals); this is a pure pass-through contract.
pub trait PlatformSecurityManager: Send + Sync {
    fn validate(&self, message: &ImmutableMessage) -> bool;
    fn sign(&self, message: &ImmutableMessage) -> Vec<u8>;
}
