//! Multicast receiver directory and skeleton directory (§4.5, §3).
//!
//! Grounded on `spark-switch::applications::location::LocationStore`'s
//! `Arc<DashMap<..>>`-wrapped directory shape; kept as `parking_lot::Mutex`
//! here instead since §5 requires this directory's lock never be held
//! across a transport call ("must not be held across transport calls");
//! the skeleton calls below are all made with the lock released first.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::address::Address;
use crate::contracts::MessagingMulticastSubscriber;
use crate::error::CoreError;
use crate::routing_table::RoutingTable;

/// `multicastId -> set<subscriber PID>` (§3).
#[derive(Default)]
struct Directory {
    receivers: HashMap<String, HashSet<String>>,
}

/// On-disk persistence shape (§6): `{ multicastId: [subscriberPID, ...] }`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedDirectory(pub HashMap<String, Vec<String>>);

/// Registers and tracks multicast subscriptions, binding each registration
/// to the provider's transport-specific skeleton (§4.5).
pub struct MulticastReceiverDirectory {
    directory: Mutex<Directory>,
}

impl MulticastReceiverDirectory {
    pub fn new() -> Self {
        Self {
            directory: Mutex::new(Directory::default()),
        }
    }

    /// `addReceiver` of §4.5. Looks up the provider's address via
    /// `routing_table`, then calls `skeleton.register_multicast_subscription`
    /// with the directory lock released.
    pub async fn add_receiver(
        &self,
        multicast_id: &str,
        subscriber_pid: &str,
        provider_pid: &str,
        routing_table: &RoutingTable,
        skeleton: &dyn MessagingMulticastSubscriber,
    ) -> Result<(), CoreError> {
        if routing_table.lookup(provider_pid).is_none() {
            return Err(CoreError::ProviderRuntime {
                participant_id: provider_pid.to_string(),
                reason: "no routing entry: cannot bind multicast skeleton".to_string(),
            });
        }

        {
            let mut dir = self.directory.lock();
            dir.receivers
                .entry(multicast_id.to_string())
                .or_default()
                .insert(subscriber_pid.to_string());
        }

        skeleton
            .register_multicast_subscription(multicast_id)
            .await
            .map_err(|reason| CoreError::ProviderRuntime {
                participant_id: provider_pid.to_string(),
                reason,
            })?;
        debug!(multicast_id, subscriber_pid, "registered multicast receiver");
        Ok(())
    }

    /// `removeReceiver` of §4.5. Skeleton unsubscribe is best-effort:
    /// a failure is logged, not propagated.
    pub async fn remove_receiver(
        &self,
        multicast_id: &str,
        subscriber_pid: &str,
        skeleton: &dyn MessagingMulticastSubscriber,
    ) {
        {
            let mut dir = self.directory.lock();
            if let Some(subscribers) = dir.receivers.get_mut(multicast_id) {
                subscribers.remove(subscriber_pid);
                if subscribers.is_empty() {
                    dir.receivers.remove(multicast_id);
                }
            }
        }

        if let Err(reason) = skeleton.unregister_multicast_subscription(multicast_id).await {
            warn!(multicast_id, subscriber_pid, %reason, "skeleton unsubscribe failed, ignoring");
        }
    }

    pub fn receivers(&self, multicast_id: &str) -> HashSet<String> {
        self.directory
            .lock()
            .receivers
            .get(multicast_id)
            .cloned()
            .unwrap_or_default()
    }

    /// `removeUnreachable` of §4.5: purges every subscription whose
    /// subscriber's routing entry resolves to `address`.
    pub fn remove_unreachable(&self, address: &Address, routing_table: &RoutingTable) {
        let mut dir = self.directory.lock();
        let mut removed_any = false;
        dir.receivers.retain(|_, subscribers| {
            subscribers.retain(|pid| {
                let keep = routing_table
                    .lookup(pid)
                    .map(|entry| &entry.address != address)
                    .unwrap_or(true);
                if !keep {
                    removed_any = true;
                }
                keep
            });
            !subscribers.is_empty()
        });
        if removed_any {
            debug!(address = ?address, "purged multicast subscriptions for unreachable address");
        }
    }

    pub fn to_persisted(&self) -> PersistedDirectory {
        let dir = self.directory.lock();
        PersistedDirectory(
            dir.receivers
                .iter()
                .map(|(id, subs)| (id.clone(), subs.iter().cloned().collect()))
                .collect(),
        )
    }

    /// Restores from a persisted snapshot and replays
    /// `register_multicast_subscription` for every multicast id whose
    /// provider can still be resolved, per §4.5's persistence clause.
    /// `provider_of` maps a multicast id to its provider PID (encoded as
    /// the id's first path segment, GLOSSARY "Multicast id").
    pub async fn restore_and_replay(
        &self,
        persisted: PersistedDirectory,
        routing_table: &RoutingTable,
        skeleton: &dyn MessagingMulticastSubscriber,
    ) {
        {
            let mut dir = self.directory.lock();
            for (id, subs) in persisted.0.iter() {
                dir.receivers
                    .insert(id.clone(), subs.iter().cloned().collect());
            }
        }

        for multicast_id in persisted.0.keys() {
            let provider_pid = provider_of(multicast_id);
            if routing_table.lookup(provider_pid).is_none() {
                warn!(multicast_id, "skipping replay: provider has no routing entry");
                continue;
            }
            if let Err(reason) = skeleton.register_multicast_subscription(multicast_id).await {
                warn!(multicast_id, %reason, "replay of multicast subscription failed");
            }
        }
    }
}

impl Default for MulticastReceiverDirectory {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts the provider PID from a multicast id of the form
/// `providerParticipantId/broadcastName/partitions...` (GLOSSARY).
fn provider_of(multicast_id: &str) -> &str {
    multicast_id.split('/').next().unwrap_or(multicast_id)
}

/// `(addressTypeTag, gbid) -> subscriberSkeleton` (§3). Address type
/// tag is a small string discriminant (e.g. `"mqtt"`) rather than the
/// `Address` enum itself, since a skeleton binds to a transport *kind*
/// across many concrete addresses.
pub struct MulticastMessagingSkeletonDirectory {
    skeletons: Mutex<HashMap<(String, String), Arc<dyn MessagingMulticastSubscriber>>>,
}

impl MulticastMessagingSkeletonDirectory {
    pub fn new() -> Self {
        Self {
            skeletons: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(
        &self,
        address_type_tag: impl Into<String>,
        gbid: impl Into<String>,
        skeleton: Arc<dyn MessagingMulticastSubscriber>,
    ) {
        self.skeletons
            .lock()
            .insert((address_type_tag.into(), gbid.into()), skeleton);
    }

    pub fn get(&self, address_type_tag: &str, gbid: &str) -> Option<Arc<dyn MessagingMulticastSubscriber>> {
        self.skeletons
            .lock()
            .get(&(address_type_tag.to_string(), gbid.to_string()))
            .cloned()
    }
}

impl Default for MulticastMessagingSkeletonDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSkeleton {
        registrations: AtomicUsize,
    }

    #[async_trait]
    impl MessagingMulticastSubscriber for FakeSkeleton {
        async fn register_multicast_subscription(&self, _multicast_id: &str) -> Result<(), String> {
            self.registrations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn unregister_multicast_subscription(&self, _multicast_id: &str) -> Result<(), String> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn add_receiver_fails_without_provider_routing_entry() {
        let dir = MulticastReceiverDirectory::new();
        let table = RoutingTable::new("cc/inbound");
        let skeleton = FakeSkeleton {
            registrations: AtomicUsize::new(0),
        };
        let result = dir
            .add_receiver("p1/event", "sub1", "p1", &table, &skeleton)
            .await;
        assert!(matches!(result, Err(CoreError::ProviderRuntime { .. })));
    }

    #[tokio::test]
    async fn add_then_remove_receiver_round_trips() {
        let dir = MulticastReceiverDirectory::new();
        let table = RoutingTable::new("cc/inbound");
        table.add(
            "p1",
            Address::InProcess {
                participant_id: "p1".into(),
            },
            false,
            i64::MAX,
            false,
        );
        let skeleton = FakeSkeleton {
            registrations: AtomicUsize::new(0),
        };
        dir.add_receiver("p1/event", "sub1", "p1", &table, &skeleton)
            .await
            .unwrap();
        assert_eq!(dir.receivers("p1/event"), HashSet::from(["sub1".to_string()]));
        dir.remove_receiver("p1/event", "sub1", &skeleton).await;
        assert!(dir.receivers("p1/event").is_empty());
    }

    #[test]
    fn remove_unreachable_purges_matching_address() {
        let dir = MulticastReceiverDirectory::new();
        let table = RoutingTable::new("cc/inbound");
        let addr = Address::InProcess {
            participant_id: "sub1".into(),
        };
        table.add("sub1", addr.clone(), false, i64::MAX, false);
        {
            let mut state = dir.directory.lock();
            state
                .receivers
                .entry("p1/event".to_string())
                .or_default()
                .insert("sub1".to_string());
        }
        dir.remove_unreachable(&addr, &table);
        assert!(dir.receivers("p1/event").is_empty());
    }
}
