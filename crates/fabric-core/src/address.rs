//! Transport address variants and the precedence/validity rules that govern
//! routing-table updates (§3, §9 "Tagged address variant").
//!
//! The original C++ source dispatches on `typeid()` of a polymorphic base
//! class. We replace that with an explicit sum type and make precedence and
//! validity table-driven on the discriminant, per the redesign note.

use serde::{Deserialize, Serialize};

/// One of the four address families the router can hold a route for.
///
/// Value-equality comparable, as required by §3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    /// Same-process participant; no serialization boundary crossed.
    InProcess { participant_id: String },
    /// A client-role local transport: UDS-client or WS-client.
    LocalClient { socket_path: String },
    /// A server-role local transport: UDS-server or WS-server. Rejected at
    /// insertion for this node's own table (§3 address-validity filter); it
    /// addresses *other* runtimes, reachable only via their own tables.
    LocalServer { socket_path: String },
    /// A global message broker reachable over MQTT.
    GlobalBroker {
        broker_uri: String,
        topic: String,
        gbid: String,
    },
}

/// Precedence class used by the routing-table update rule (§3):
/// `InProcess > LocalClient > GlobalBroker > LocalServer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Precedence(u8);

impl Address {
    /// Rank in the precedence order; higher replaces lower on update.
    pub fn precedence(&self) -> Precedence {
        Precedence(match self {
            Address::InProcess { .. } => 3,
            Address::LocalClient { .. } => 2,
            Address::GlobalBroker { .. } => 1,
            Address::LocalServer { .. } => 0,
        })
    }

    /// True for `LocalServer` variants, used for the peer-server tie-break
    /// exception in §3 ("two peer-server-class addresses of identical
    /// precedence may overwrite each other").
    pub fn is_local_server(&self) -> bool {
        matches!(self, Address::LocalServer { .. })
    }

    /// Address-validity filter applied at insertion (§3):
    /// - `LocalServer` addresses never belong in this node's table, they
    ///   address other runtimes reached indirectly.
    /// - A `GlobalBroker` whose topic equals `own_inbound_topic` would
    ///   route this node's own outbound traffic back to itself.
    pub fn is_valid_for_insertion(&self, own_inbound_topic: &str) -> bool {
        match self {
            Address::LocalServer { .. } => false,
            Address::GlobalBroker { topic, .. } => topic != own_inbound_topic,
            Address::InProcess { .. } | Address::LocalClient { .. } => true,
        }
    }
}

/// Applies the update-precedence rule of §3 to decide whether
/// `candidate` should replace `incumbent`.
///
/// Returns `true` when the candidate wins (or the two are the same
/// peer-server class, which counts as "replace" since a fresh discovery of
/// the same class is assumed more current).
#[must_use]
pub fn candidate_wins(incumbent: &Address, candidate: &Address) -> bool {
    if incumbent.is_local_server() && candidate.is_local_server() {
        return true;
    }
    candidate.precedence() >= incumbent.precedence()
}
