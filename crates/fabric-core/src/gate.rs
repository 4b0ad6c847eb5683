//! Transport-availability gate: parks messages whose destination requires
//! a transport currently reporting "not ready" (§4.7).
//!
//! Lives in `fabric-core` alongside the message queue it structurally
//! mirrors. §2's dependency order places the transport-availability
//! gate as a leaf ahead of the dispatcher, not inside it. `fabric-switch`'s
//! dispatcher owns the actual `TransportStatus::subscribe` wiring and
//! calls [`TransportAvailabilityGate::drain_for_transport`] when a
//! transport flips to available; this module only holds the parked
//! messages and enforces their caps.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tracing::warn;

use crate::address::Address;
use crate::config::RouterSettings;
use crate::envelope::ImmutableMessage;

/// A message parked because its destination transport is unavailable,
/// retaining enough context to resume `sendMessage` once it recovers.
#[derive(Debug, Clone)]
pub struct ParkedMessage {
    pub message: ImmutableMessage,
    pub address: Address,
    pub try_count: u32,
}

/// Count + bytes caps for the transport-not-available queue (§4.7:
/// "Queue capacity (count + bytes) is independently capped; eviction
/// policy mirrors §4.3"; no per-recipient cap is named for this queue).
#[derive(Debug, Clone, Copy, Default)]
pub struct GateLimits {
    pub max_count: Option<usize>,
    pub max_bytes: Option<usize>,
}

impl GateLimits {
    /// Reads `transportNotAvailableQueueLimit` and
    /// `transportNotAvailableQueueLimitBytes` off a loaded
    /// [`RouterSettings`] (§6).
    pub fn from_settings(settings: &RouterSettings) -> Self {
        Self {
            max_count: settings.transport_not_available_queue_limit,
            max_bytes: settings.transport_not_available_queue_limit_bytes,
        }
    }
}

struct PerTransport {
    entries: VecDeque<ParkedMessage>,
    total_bytes: usize,
}

impl PerTransport {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            total_bytes: 0,
        }
    }
}

pub struct TransportAvailabilityGate {
    limits: GateLimits,
    parked: Mutex<HashMap<String, PerTransport>>,
}

impl TransportAvailabilityGate {
    pub fn new(limits: GateLimits) -> Self {
        Self {
            limits,
            parked: Mutex::new(HashMap::new()),
        }
    }

    /// Parks `message` for `transport_key`, evicting the oldest parked
    /// message(s) for that transport if a cap is exceeded (§4.7).
    pub fn park(&self, transport_key: &str, message: ImmutableMessage, address: Address, try_count: u32) -> Vec<ParkedMessage> {
        let size = message.approx_size_bytes();
        let mut parked = self.parked.lock();
        let bucket = parked
            .entry(transport_key.to_string())
            .or_insert_with(PerTransport::new);
        bucket.entries.push_back(ParkedMessage {
            message,
            address,
            try_count,
        });
        bucket.total_bytes += size;

        let mut evicted = Vec::new();
        loop {
            let over_count = self
                .limits
                .max_count
                .map(|max| bucket.entries.len() > max)
                .unwrap_or(false);
            let over_bytes = self
                .limits
                .max_bytes
                .map(|max| bucket.total_bytes > max)
                .unwrap_or(false);
            if !over_count && !over_bytes {
                break;
            }
            let Some(victim) = bucket.entries.pop_front() else {
                break;
            };
            bucket.total_bytes = bucket.total_bytes.saturating_sub(victim.message.approx_size_bytes());
            warn!(
                transport_key,
                message_id = victim.message.id(),
                "evicted transport-not-available message: capacity exceeded"
            );
            evicted.push(victim);
        }
        evicted
    }

    /// `onAvailabilityChange(true)` handler of §4.7: removes and
    /// returns every message parked for `transport_key` so the caller can
    /// re-enter them into `sendMessage`.
    pub fn drain_for_transport(&self, transport_key: &str) -> Vec<ParkedMessage> {
        let mut parked = self.parked.lock();
        match parked.remove(transport_key) {
            Some(bucket) => bucket.entries.into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Purges parked messages whose resolved address is `address`, for
    /// symmetry with [`crate::multicast::MulticastReceiverDirectory::remove_unreachable`]
    /// when a routing entry disappears (an extension beyond the literal
    /// text of §4.5/§4.7).
    pub fn remove_unreachable(&self, address: &Address) {
        let mut parked = self.parked.lock();
        for bucket in parked.values_mut() {
            bucket.entries.retain(|entry| {
                let keep = &entry.address != address;
                if !keep {
                    bucket.total_bytes = bucket.total_bytes.saturating_sub(entry.message.approx_size_bytes());
                }
                keep
            });
        }
        parked.retain(|_, bucket| !bucket.entries.is_empty());
    }

    pub fn len_for_transport(&self, transport_key: &str) -> usize {
        self.parked
            .lock()
            .get(transport_key)
            .map(|bucket| bucket.entries.len())
            .unwrap_or(0)
    }
}
