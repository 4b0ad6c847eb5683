//! Routing table: PID → routing entry, with precedence-gated updates and
//! sticky/expiry-based GC (§4.2).
//!
//! Grounded on `spark-switch::core::session_manager::SessionManager`'s
//! shape (a keyed map behind a single lock with narrow accessor methods),
//! but using `parking_lot::RwLock<HashMap<..>>` instead of `DashMap` since
//! §5 mandates one explicit RW lock for this component with a defined
//! acquisition order relative to the message queue; a single `RwLock`
//! makes that order auditable at the call site, where a sharded map would
//! hide it.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::address::{candidate_wins, Address};

/// A single routing-table entry (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingEntry {
    pub address: Address,
    pub is_globally_visible: bool,
    pub expiry_date_ms: i64,
    pub is_sticky: bool,
}

impl RoutingEntry {
    /// Sticky entries are conceptually immune to expiry (§4.2: "their
    /// expiry field is conceptually `+∞`").
    pub fn is_expired(&self, now_ms: i64) -> bool {
        !self.is_sticky && now_ms > self.expiry_date_ms
    }
}

/// Own node's inbound topic, used by the address-validity filter (§3).
/// Held alongside the table since validity is a property of *this* node.
pub struct RoutingTable {
    own_inbound_topic: String,
    entries: RwLock<HashMap<String, RoutingEntry>>,
}

impl RoutingTable {
    pub fn new(own_inbound_topic: impl Into<String>) -> Self {
        Self {
            own_inbound_topic: own_inbound_topic.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// `add` of §4.2. Returns `false` only when the address-validity
    /// filter rejects `address` outright; every other outcome (insert,
    /// replace, idempotent no-op on a lower-precedence candidate) returns
    /// `true`.
    pub fn add(
        &self,
        participant_id: impl Into<String>,
        address: Address,
        is_globally_visible: bool,
        expiry_date_ms: i64,
        is_sticky: bool,
    ) -> bool {
        let participant_id = participant_id.into();
        if !address.is_valid_for_insertion(&self.own_inbound_topic) {
            warn!(
                participant_id = %participant_id,
                address = ?address,
                "rejected next-hop: fails address-validity filter"
            );
            return false;
        }

        let mut entries = self.entries.write();
        match entries.get(&participant_id) {
            None => {
                debug!(participant_id = %participant_id, address = ?address, "inserted next hop");
                entries.insert(
                    participant_id,
                    RoutingEntry {
                        address,
                        is_globally_visible,
                        expiry_date_ms,
                        is_sticky,
                    },
                );
            }
            Some(existing) => {
                if candidate_wins(&existing.address, &address) {
                    debug!(
                        participant_id = %participant_id,
                        old = ?existing.address,
                        new = ?address,
                        "replaced next hop"
                    );
                    entries.insert(
                        participant_id,
                        RoutingEntry {
                            address,
                            is_globally_visible,
                            expiry_date_ms,
                            is_sticky,
                        },
                    );
                } else {
                    trace!(
                        participant_id = %participant_id,
                        existing = ?existing.address,
                        rejected = ?address,
                        "kept higher-precedence next hop"
                    );
                }
            }
        }
        true
    }

    pub fn lookup(&self, participant_id: &str) -> Option<RoutingEntry> {
        self.entries.read().get(participant_id).cloned()
    }

    pub fn contains(&self, participant_id: &str) -> bool {
        self.entries.read().contains_key(participant_id)
    }

    /// `remove` of §4.2. Works on sticky entries too: sticky only
    /// protects against GC, never against an explicit remove.
    pub fn remove(&self, participant_id: &str) -> Option<RoutingEntry> {
        self.entries.write().remove(participant_id)
    }

    /// Explicit GC pass resolving the Open Question of §9 ("no clear
    /// eviction timer for non-sticky entries is shown"): the dispatcher
    /// drives this periodically (via the delayed scheduler) and on
    /// capacity pressure. Sticky entries are never touched.
    pub fn collect_expired(&self, now_ms: i64) -> Vec<String> {
        let mut entries = self.entries.write();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now_ms))
            .map(|(pid, _)| pid.clone())
            .collect();
        for pid in &expired {
            entries.remove(pid);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "garbage-collected expired routing entries");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Milliseconds since epoch, for call sites that need "now" for expiry
/// checks. A thin wrapper so tests can avoid depending on wall-clock time
/// directly when they construct `RoutingEntry`/`ImmutableMessage` values.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}
