//! Per-recipient message queue used while a route is not yet known
//! (§4.3), and its sibling the transport-not-available queue
//! (§4.7) which shares the same eviction policy.
//!
//! Grounded on `spark-switch::applications::location::LocationStore`'s
//! wrapping pattern, but with `parking_lot::RwLock` in place of `DashMap`:
//! §5 requires this lock be acquired strictly before the routing
//! table's (`messageQueue -> routingTable`, never reversed), a rule that is
//! only checkable at call sites if the lock is a single named field rather
//! than sharded internally.

use std::collections::VecDeque;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::RouterSettings;
use crate::envelope::ImmutableMessage;

/// One queued message plus its arrival time (§3 "Message queue entry").
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub recipient: String,
    pub message: ImmutableMessage,
    pub arrival_time_ms: i64,
}

/// Independent capacity caps enforced by a [`BoundedMessageQueue`]
/// (§4.3, §4.7: count, per-recipient count, bytes).
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    pub max_count: Option<usize>,
    pub max_count_per_recipient: Option<usize>,
    pub max_bytes: Option<usize>,
}

impl Default for QueueLimits {
    /// Spec §6 default: all caps unbounded.
    fn default() -> Self {
        Self {
            max_count: None,
            max_count_per_recipient: None,
            max_bytes: None,
        }
    }
}

impl QueueLimits {
    /// Reads `messageQueueLimit`, `perParticipantIdMessageQueueLimit`, and
    /// `messageQueueLimitBytes` off a loaded [`RouterSettings`] (§6).
    pub fn from_settings(settings: &RouterSettings) -> Self {
        Self {
            max_count: settings.message_queue_limit,
            max_count_per_recipient: settings.per_participant_id_message_queue_limit,
            max_bytes: settings.message_queue_limit_bytes,
        }
    }
}

struct State {
    entries: VecDeque<QueueEntry>,
    total_bytes: usize,
}

/// A capacity-bounded, oldest-first-eviction FIFO queue shared by the
/// per-recipient message queue (§4.3) and the transport-not-available
/// queue (§4.7); the two differ only in what key parks a message and in
/// their configured limits, not in eviction mechanics.
pub struct BoundedMessageQueue {
    limits: QueueLimits,
    state: RwLock<State>,
}

impl BoundedMessageQueue {
    pub fn new(limits: QueueLimits) -> Self {
        Self {
            limits,
            state: RwLock::new(State {
                entries: VecDeque::new(),
                total_bytes: 0,
            }),
        }
    }

    /// `queue(PID, message)` of §4.3. Returns the messages evicted to
    /// make room, oldest first, so the caller can synthesize
    /// reply-with-error for evicted requests/subscription-requests.
    pub fn queue(&self, recipient: impl Into<String>, message: ImmutableMessage) -> Vec<QueueEntry> {
        let recipient = recipient.into();
        let size = message.approx_size_bytes();
        let entry = QueueEntry {
            recipient: recipient.clone(),
            message,
            arrival_time_ms: crate::routing_table::now_ms(),
        };

        let mut state = self.state.write();
        state.entries.push_back(entry);
        state.total_bytes += size;

        let mut evicted = Vec::new();
        while let Some(victim_index) = self.find_eviction_victim(&state, &recipient) {
            let victim = state.entries.remove(victim_index).expect("index from scan");
            state.total_bytes = state.total_bytes.saturating_sub(victim.message.approx_size_bytes());
            warn!(
                recipient = %victim.recipient,
                message_id = victim.message.id(),
                "evicted queued message: capacity exceeded"
            );
            evicted.push(victim);
        }
        evicted
    }

    /// Finds the oldest message violating whichever cap is currently
    /// exceeded: per-recipient count first (the cap the new message itself
    /// may have just tripped), then global count, then bytes.
    fn find_eviction_victim(&self, state: &State, recipient: &str) -> Option<usize> {
        if let Some(max) = self.limits.max_count_per_recipient {
            let count = state.entries.iter().filter(|e| e.recipient == recipient).count();
            if count > max {
                return state.entries.iter().position(|e| e.recipient == recipient);
            }
        }
        if let Some(max) = self.limits.max_count {
            if state.entries.len() > max {
                return Some(0);
            }
        }
        if let Some(max) = self.limits.max_bytes {
            if state.total_bytes > max {
                return Some(0);
            }
        }
        None
    }

    /// `drain(PID)` of §4.3: removes and returns, in insertion order,
    /// every message queued for `recipient`.
    pub fn drain(&self, recipient: &str) -> Vec<QueueEntry> {
        let mut state = self.state.write();
        let mut drained = Vec::new();
        let mut remaining = VecDeque::with_capacity(state.entries.len());
        let entries = std::mem::take(&mut state.entries);
        for entry in entries {
            if entry.recipient == recipient {
                state.total_bytes = state.total_bytes.saturating_sub(entry.message.approx_size_bytes());
                drained.push(entry);
            } else {
                remaining.push_back(entry);
            }
        }
        state.entries = remaining;
        if !drained.is_empty() {
            debug!(recipient, count = drained.len(), "drained queued messages");
        }
        drained
    }

    /// Removes every queued entry matching `predicate`, used by the
    /// transport-not-available queue's purge-on-route-removal behavior
    /// (an extension of §4.5's `removeUnreachable` to the
    /// transport-not-available queue).
    pub fn remove_matching(&self, mut predicate: impl FnMut(&QueueEntry) -> bool) -> Vec<QueueEntry> {
        let mut state = self.state.write();
        let mut removed = Vec::new();
        let mut remaining = VecDeque::with_capacity(state.entries.len());
        let entries = std::mem::take(&mut state.entries);
        for entry in entries {
            if predicate(&entry) {
                state.total_bytes = state.total_bytes.saturating_sub(entry.message.approx_size_bytes());
                removed.push(entry);
            } else {
                remaining.push_back(entry);
            }
        }
        state.entries = remaining;
        removed
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    pub fn len_for_recipient(&self, recipient: &str) -> usize {
        self.state.read().entries.iter().filter(|e| e.recipient == recipient).count()
    }
}
