//! The message dispatcher: `route`, `sendMessage`, `scheduleMessage`, and
//! the next-hop registration API (§4.4, §6).
//!
//! Grounded on `spark-switch::core::session_manager::SessionManager` for
//! the overall "stateful hub holding several `fabric_core` collections
//! behind narrow async methods" shape, and on
//! `cpp/cluster-controller/messaging/CcMessageRouter.cpp` for the
//! route/sendMessage/scheduleMessage control flow itself.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use fabric_core::address::Address;
use fabric_core::config::RouterSettings;
use fabric_core::contracts::{
    AccessController, MessagingMulticastSubscriber, MessagingStubFactory, MulticastAddressCalculator,
    PlatformSecurityManager, TransmitError, TransportStatus,
};
use fabric_core::envelope::ImmutableMessage;
use fabric_core::error::{backoff_delay, CoreError};
use fabric_core::gate::{GateLimits, TransportAvailabilityGate};
use fabric_core::message_queue::{BoundedMessageQueue, QueueLimits};
use fabric_core::multicast::{MulticastMessagingSkeletonDirectory, MulticastReceiverDirectory};
use fabric_core::observability::RoutingStats;
use fabric_core::routing_table::{now_ms, RoutingTable};
use fabric_core::scheduler::{DelayedScheduler, Runnable};

use crate::acl_gate::{AccessControlGate, GateOutcome};
use crate::error::SwitchError;

const BACKOFF_CAP_MS: u64 = 60_000;

/// Notified when `route` queues a message for an unknown recipient
/// (§4.4.1 step 4: "emit a queued-for-delivery notification event (unless
/// the sender is the notification provider itself, cycle break)").
pub trait RoutingEventListener: Send + Sync {
    fn participant_id(&self) -> &str;
    fn on_queued_for_delivery(&self, recipient: &str);
}

/// Resolves the [`TransportStatus`] an [`Address`] depends on, if any.
/// Supplied by whoever wires transports in; the dispatcher has no
/// built-in notion of transport topology (§1 Non-goals).
pub trait TransportStatusResolver: Send + Sync {
    fn resolve(&self, address: &Address) -> Option<Arc<dyn TransportStatus>>;
}

/// Maps an [`Address`] to the `(addressTypeTag, gbid)` pair used to look
/// up its multicast subscription skeleton (§3).
pub trait AddressTypeTagResolver: Send + Sync {
    fn tag_for(&self, address: &Address) -> Option<(String, String)>;
}

pub struct DispatcherConfig {
    pub own_global_address: Option<Address>,
    pub gbids: Vec<String>,
    pub settings: RouterSettings,
    pub stub_factory: Arc<dyn MessagingStubFactory>,
    pub access_controller: Option<Arc<dyn AccessController>>,
    pub security_manager: Option<Arc<dyn PlatformSecurityManager>>,
    pub multicast_address_calculator: Option<Arc<dyn MulticastAddressCalculator>>,
    pub transport_status_resolver: Arc<dyn TransportStatusResolver>,
    pub address_type_tag_resolver: Arc<dyn AddressTypeTagResolver>,
    pub routing_event_listener: Option<Arc<dyn RoutingEventListener>>,
}

/// Central switching fabric of one node (§1).
///
/// Holds a `Weak` self-reference set at construction via `Arc::new_cyclic`
/// so the internal retry/drain paths can obtain an owned `Arc<Dispatcher>`
/// to move into spawned tasks without requiring every caller to thread one
/// through; a plain `&self` receiver is enough at every public entry
/// point.
pub struct Dispatcher {
    self_ref: Weak<Dispatcher>,
    routing_table: Arc<RoutingTable>,
    message_queue: Arc<BoundedMessageQueue>,
    multicast_directory: Arc<MulticastReceiverDirectory>,
    skeleton_directory: Arc<MulticastMessagingSkeletonDirectory>,
    gate: Arc<TransportAvailabilityGate>,
    scheduler: Arc<DelayedScheduler>,
    stats: Arc<RoutingStats>,
    stub_factory: Arc<dyn MessagingStubFactory>,
    access_control: AccessControlGate,
    security_manager: Option<Arc<dyn PlatformSecurityManager>>,
    multicast_address_calculator: Option<Arc<dyn MulticastAddressCalculator>>,
    transport_status_resolver: Arc<dyn TransportStatusResolver>,
    address_type_tag_resolver: Arc<dyn AddressTypeTagResolver>,
    routing_event_listener: Option<Arc<dyn RoutingEventListener>>,
    own_global_address: Mutex<Option<Address>>,
    gbids: Vec<String>,
    settings: RouterSettings,
    shutting_down: AtomicBool,
}

impl Dispatcher {
    /// Builds the dispatcher, along with the message queue and
    /// transport-not-available gate it owns. Both are sized from
    /// `config.settings` (§6's `messageQueueLimit`,
    /// `perParticipantIdMessageQueueLimit`, `messageQueueLimitBytes`,
    /// `transportNotAvailableQueueLimit`,
    /// `transportNotAvailableQueueLimitBytes`) via
    /// `QueueLimits::from_settings`/`GateLimits::from_settings` rather than
    /// being handed in pre-built, so those knobs actually reach the
    /// eviction caps they configure.
    pub fn new(
        routing_table: Arc<RoutingTable>,
        multicast_directory: Arc<MulticastReceiverDirectory>,
        skeleton_directory: Arc<MulticastMessagingSkeletonDirectory>,
        scheduler: Arc<DelayedScheduler>,
        stats: Arc<RoutingStats>,
        config: DispatcherConfig,
    ) -> Arc<Self> {
        let message_queue = Arc::new(BoundedMessageQueue::new(QueueLimits::from_settings(&config.settings)));
        let gate = Arc::new(TransportAvailabilityGate::new(GateLimits::from_settings(&config.settings)));
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            routing_table,
            message_queue,
            multicast_directory,
            skeleton_directory,
            gate,
            scheduler,
            stats,
            stub_factory: config.stub_factory,
            access_control: AccessControlGate::new(config.access_controller, config.settings.acl_audit),
            security_manager: config.security_manager,
            multicast_address_calculator: config.multicast_address_calculator,
            transport_status_resolver: config.transport_status_resolver,
            address_type_tag_resolver: config.address_type_tag_resolver,
            routing_event_listener: config.routing_event_listener,
            own_global_address: Mutex::new(config.own_global_address),
            gbids: config.gbids,
            settings: config.settings,
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Number of messages currently queued for `participant_id` awaiting a
    /// route (§4.3). Exposed for callers (and tests) that need to observe
    /// queue depth without reaching into the dispatcher's internals.
    pub fn queued_len_for_recipient(&self, participant_id: &str) -> usize {
        self.message_queue.len_for_recipient(participant_id)
    }

    fn arc(&self) -> Arc<Dispatcher> {
        self.self_ref
            .upgrade()
            .expect("dispatcher self-reference dropped while dispatcher is alive")
    }

    // ---- inbound API (§6) -------------------------------------

    /// `route(ImmutableMessage)` of §4.4.1.
    pub async fn route(&self, message: ImmutableMessage) -> Result<(), SwitchError> {
        self.route_with_try_count(message, 1).await
    }

    async fn route_with_try_count(&self, message: ImmutableMessage, try_count: u32) -> Result<(), SwitchError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(SwitchError::ShuttingDown {
                message_id: message.id().to_string(),
            });
        }

        if message.is_expired(now_ms()) {
            self.stats.record_dropped();
            self.maybe_synthesize_error_reply(&message, "message expired");
            return Err(SwitchError::Core(CoreError::MessageExpired {
                message_id: message.id().to_string(),
                expiry_ms: message.expiry_date_ms(),
            }));
        }

        if let Some(security_manager) = &self.security_manager {
            if !security_manager.validate(&message) {
                self.stats.record_dropped();
                self.maybe_synthesize_error_reply(&message, "invalid signature");
                return Err(SwitchError::Core(CoreError::MessageNotSent {
                    message_id: message.id().to_string(),
                    reason: "invalid-signature".to_string(),
                }));
            }
        }

        let destinations = self.resolve_destinations(&message).await;

        if destinations.is_empty() {
            if message.message_type() == fabric_core::envelope::MessageType::Multicast {
                debug!(message_id = message.id(), "multicast has no receivers, dropping silently");
                self.stats.record_dropped();
                return Ok(());
            }
            if message.message_type().is_discardable_when_unroutable()
                && self.settings.discard_unroutable_replies_and_publications
            {
                warn!(message_id = message.id(), "dropping unroutable reply/publication");
                self.stats.record_dropped();
                return Ok(());
            }
            self.queue_for_later(&message);
            return Ok(());
        }

        for address in destinations {
            let dispatcher = self.arc();
            let message = message.clone();
            tokio::spawn(async move {
                dispatcher.send_message(message, address, try_count).await;
            });
        }
        self.stats.record_routed();
        Ok(())
    }

    async fn resolve_destinations(&self, message: &ImmutableMessage) -> Vec<Address> {
        if message.message_type() != fabric_core::envelope::MessageType::Multicast {
            return self
                .routing_table
                .lookup(message.recipient())
                .map(|entry| vec![entry.address])
                .unwrap_or_default();
        }

        let mut seen = HashSet::new();
        let mut addresses = Vec::new();

        for subscriber in self.multicast_directory.receivers(message.recipient()) {
            if let Some(entry) = self.routing_table.lookup(&subscriber) {
                if seen.insert(entry.address.clone()) {
                    addresses.push(entry.address);
                }
            }
        }

        if self.publish_to_global(message) {
            if let Some(calculator) = &self.multicast_address_calculator {
                for gbid in &self.gbids {
                    if let Some(address) = calculator.compute(message, gbid) {
                        if seen.insert(address.clone()) {
                            addresses.push(address);
                        }
                    }
                }
            }
        }

        addresses
    }

    /// Publish-to-global predicate of §4.4.4.
    fn publish_to_global(&self, message: &ImmutableMessage) -> bool {
        self.routing_table
            .lookup(message.sender())
            .map(|entry| entry.is_globally_visible)
            .unwrap_or(false)
    }

    fn queue_for_later(&self, message: &ImmutableMessage) {
        let evicted = self.message_queue.queue(message.recipient(), message.clone());
        self.stats.record_queued();
        for victim in &evicted {
            self.maybe_synthesize_error_reply(&victim.message, "evicted: queue capacity exceeded");
        }
        if let Some(listener) = &self.routing_event_listener {
            if listener.participant_id() != message.sender() {
                listener.on_queued_for_delivery(message.recipient());
            }
        }
    }

    fn maybe_synthesize_error_reply(&self, message: &ImmutableMessage, reason: &str) {
        if message.message_type().expects_error_reply() {
            warn!(
                message_id = message.id(),
                sender = message.sender(),
                reason,
                "synthesizing reply-with-error to sender"
            );
            // Serializing and submitting the reply message itself is a
            // transport/codec concern outside this core (§1
            // Non-goals); we only emit the observable log + stat here.
        }
    }

    /// `addNextHop` of §6, with the drain side effect of §4.4.5.
    pub fn add_next_hop(
        &self,
        participant_id: impl Into<String>,
        address: Address,
        is_globally_visible: bool,
        expiry_date_ms: i64,
        is_sticky: bool,
    ) -> bool {
        let participant_id = participant_id.into();
        let accepted = self.routing_table.add(
            participant_id.clone(),
            address,
            is_globally_visible,
            expiry_date_ms,
            is_sticky,
        );
        if accepted {
            self.drain_and_reschedule(&participant_id);
        }
        accepted
    }

    /// Drains the queue for `participant_id` and reschedules each message
    /// through `sendMessage`. The queue's lock is only held for the drain
    /// itself (§4.4.5: "scheduling happens outside the lock").
    fn drain_and_reschedule(&self, participant_id: &str) {
        let drained = self.message_queue.drain(participant_id);
        if drained.is_empty() {
            return;
        }
        let Some(entry) = self.routing_table.lookup(participant_id) else {
            return;
        };
        for queued in drained {
            let dispatcher = self.arc();
            let address = entry.address.clone();
            tokio::spawn(async move {
                dispatcher.send_message(queued.message, address, 1).await;
            });
        }
    }

    pub fn remove_next_hop(&self, participant_id: &str) {
        if let Some(removed) = self.routing_table.remove(participant_id) {
            self.gate.remove_unreachable(&removed.address);
            self.multicast_directory
                .remove_unreachable(&removed.address, &self.routing_table);
        }
    }

    pub fn resolve_next_hop(&self, participant_id: &str) -> bool {
        self.routing_table.contains(participant_id)
    }

    pub async fn add_multicast_receiver(
        &self,
        multicast_id: &str,
        subscriber_pid: &str,
        provider_pid: &str,
    ) -> Result<(), SwitchError> {
        let skeleton = self.skeleton_for(provider_pid)?;
        self.multicast_directory
            .add_receiver(multicast_id, subscriber_pid, provider_pid, &self.routing_table, skeleton.as_ref())
            .await
            .map_err(SwitchError::Core)
    }

    pub async fn remove_multicast_receiver(&self, multicast_id: &str, subscriber_pid: &str, provider_pid: &str) -> Result<(), SwitchError> {
        let skeleton = self.skeleton_for(provider_pid)?;
        self.multicast_directory
            .remove_receiver(multicast_id, subscriber_pid, skeleton.as_ref())
            .await;
        Ok(())
    }

    fn skeleton_for(&self, provider_pid: &str) -> Result<Arc<dyn MessagingMulticastSubscriber>, SwitchError> {
        let entry = self
            .routing_table
            .lookup(provider_pid)
            .ok_or_else(|| SwitchError::Core(CoreError::NoRoutingEntry {
                participant_id: provider_pid.to_string(),
            }))?;
        let (tag, gbid) = self
            .address_type_tag_resolver
            .tag_for(&entry.address)
            .ok_or_else(|| SwitchError::NoMulticastSkeleton {
                provider_id: provider_pid.to_string(),
            })?;
        self.skeleton_directory
            .get(&tag, &gbid)
            .ok_or_else(|| SwitchError::NoMulticastSkeleton {
                provider_id: provider_pid.to_string(),
            })
    }

    pub fn get_global_address(&self) -> Result<Address, SwitchError> {
        self.own_global_address.lock().clone().ok_or(SwitchError::NoGlobalTransport)
    }

    pub fn get_reply_to_address(&self) -> Result<Address, SwitchError> {
        self.get_global_address()
    }

    // ---- dispatch internals (§4.4.2, §4.4.3) -------------------

    async fn send_message(&self, message: ImmutableMessage, address: Address, try_count: u32) {
        if self.access_control.has_controller() {
            let is_local_recipient = matches!(address, Address::InProcess { .. } | Address::LocalClient { .. });
            match self.access_control.check(&message, is_local_recipient, try_count).await {
                GateOutcome::Proceed => {}
                GateOutcome::Drop => {
                    self.stats.record_dropped();
                    return;
                }
                GateOutcome::Retry { try_count } => {
                    self.stats.record_retried();
                    let delay = backoff_delay(
                        try_count,
                        self.settings.send_msg_retry_interval(),
                        std::time::Duration::from_millis(BACKOFF_CAP_MS),
                    );
                    self.reschedule_after(message, address, try_count + 1, delay);
                    return;
                }
            }
        }
        self.schedule_message(message, address, try_count).await;
    }

    async fn schedule_message(&self, message: ImmutableMessage, address: Address, try_count: u32) {
        if let Some(status) = self.transport_status_resolver.resolve(&address) {
            if !status.is_available() {
                self.gate.park(status.transport_key(), message, address, try_count);
                return;
            }
        }

        let Some(stub) = self.stub_factory.create(&address) else {
            self.handle_transport_failure(message, address, try_count, "no stub available").await;
            return;
        };

        match stub.transmit(message.clone()).await {
            Ok(()) => {
                self.stats.record_routed();
            }
            Err(TransmitError::DelayMessage { reason }) => {
                self.handle_transport_failure(message, address, try_count, &reason).await;
            }
            Err(TransmitError::Permanent { reason }) => {
                warn!(message_id = message.id(), %reason, "permanent transmit failure");
                self.stats.record_dropped();
                self.maybe_synthesize_error_reply(&message, &reason);
            }
        }
    }

    async fn handle_transport_failure(&self, message: ImmutableMessage, address: Address, try_count: u32, reason: &str) {
        if message.is_expired(now_ms()) {
            warn!(message_id = message.id(), reason, "expired during retry, giving up");
            self.stats.record_dropped();
            self.maybe_synthesize_error_reply(&message, reason);
            return;
        }
        self.stats.record_retried();
        let delay = backoff_delay(
            try_count,
            self.settings.send_msg_retry_interval(),
            std::time::Duration::from_millis(BACKOFF_CAP_MS),
        );
        self.reschedule_after(message, address, try_count + 1, delay);
    }

    fn reschedule_after(&self, message: ImmutableMessage, address: Address, try_count: u32, delay: std::time::Duration) {
        let dispatcher = self.arc();
        let runnable: Runnable = Box::new(move || {
            tokio::spawn(async move {
                dispatcher.schedule_message(message, address, try_count).await;
            });
        });
        self.scheduler.schedule(runnable, delay);
    }

    /// Resolves `transport-not-available` queue entries for a transport
    /// that just became available (§4.7). Called by whoever owns the
    /// `TransportStatus::subscribe` wiring.
    pub fn on_transport_available(&self, transport_key: &str) {
        for parked in self.gate.drain_for_transport(transport_key) {
            let dispatcher = self.arc();
            tokio::spawn(async move {
                dispatcher.schedule_message(parked.message, parked.address, parked.try_count).await;
            });
        }
    }

    /// Periodic summary log driven by `routedMessagePrintIntervalS` (§6).
    pub fn log_routing_summary(&self) {
        self.stats.log_summary();
    }

    /// Runs a garbage-collection pass over expired, non-sticky routing
    /// entries (§9 Open Question: "implementers should define an
    /// explicit GC pass triggered either periodically or on capacity
    /// pressure"; this dispatcher drives it periodically via the delayed
    /// scheduler, see `fabric_switch::lifecycle`).
    pub fn collect_expired_routes(&self) -> Vec<String> {
        self.routing_table.collect_expired(now_ms())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }
}
