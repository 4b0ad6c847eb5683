//! Error domain shared by every `fabric-core` module.
//!
//! Grounded on `spark-switch::error::SwitchError`: one `thiserror` enum per
//! failure family, each variant carrying enough context (participant id,
//! address, try count) to log or synthesize a reply-with-error without the
//! caller re-deriving it, plus a narrow `code()` accessor for cross-crate
//! propagation instead of matching on the variant directly.

use std::time::Duration;

use thiserror::Error;

use crate::address::Address;

/// Error surface of the routing core (§7).
///
/// Retry semantics are attached to each variant via [`CoreError::is_retryable`]
/// rather than encoded in the type itself, since the same `DelayMessage`
/// condition can originate from several call sites.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The message's TTL had already passed at the time it reached `route`.
    #[error("message `{message_id}` expired at {expiry_ms}ms (now past that point)")]
    MessageExpired { message_id: String, expiry_ms: i64 },

    /// Permanent delivery failure: bad signature, address rejected by the
    /// validity filter, or the transport itself refused the message.
    #[error("message `{message_id}` not sent: {reason}")]
    MessageNotSent { message_id: String, reason: String },

    /// Transient transport failure; the caller should reschedule with
    /// backoff rather than give up.
    #[error("message `{message_id}` delayed on {address:?} (try {try_count}): {reason}")]
    DelayMessage {
        message_id: String,
        address: Address,
        try_count: u32,
        reason: String,
    },

    /// Misuse of a directory-style API (e.g. registering a multicast
    /// receiver for a provider with no routing entry).
    #[error("provider runtime error for `{participant_id}`: {reason}")]
    ProviderRuntime {
        participant_id: String,
        reason: String,
    },

    /// The recipient is not (yet) known to the routing table. Not an error
    /// for non-multicast traffic (callers queue instead), but surfaced as
    /// a value so multicast call sites can tell "dropped, no receivers"
    /// apart from "dispatched".
    #[error("no routing entry for `{participant_id}`")]
    NoRoutingEntry { participant_id: String },
}

impl CoreError {
    /// Stable, cross-crate error code, analogous to `spark_core::SparkError::code`.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::MessageExpired { .. } => "router.message.expired",
            CoreError::MessageNotSent { .. } => "router.message.not_sent",
            CoreError::DelayMessage { .. } => "router.message.delayed",
            CoreError::ProviderRuntime { .. } => "router.provider.runtime",
            CoreError::NoRoutingEntry { .. } => "router.routing.missing",
        }
    }

    /// Whether the retry table in §7 allows retrying the send that
    /// produced this error. Only `DelayMessage` is retryable from this
    /// enum; ACL `RETRY` and null-stub retries are decided by the
    /// dispatcher, not this type.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::DelayMessage { .. })
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            CoreError::MessageExpired { message_id, .. }
            | CoreError::MessageNotSent { message_id, .. }
            | CoreError::DelayMessage { message_id, .. } => Some(message_id),
            _ => None,
        }
    }
}

/// Exponential backoff schedule of §4.4.3: `delay(n) = min(cap, base * 2^(n-1))`.
#[must_use]
pub fn backoff_delay(try_count: u32, base: Duration, cap: Duration) -> Duration {
    let n = try_count.max(1) - 1;
    match base.checked_mul(1u32.checked_shl(n).unwrap_or(u32::MAX)) {
        Some(scaled) if scaled < cap => scaled,
        _ => cap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_saturates() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_secs(60);
        assert_eq!(backoff_delay(1, base, cap), Duration::from_millis(100));
        assert_eq!(backoff_delay(2, base, cap), Duration::from_millis(200));
        assert_eq!(backoff_delay(3, base, cap), Duration::from_millis(400));
        assert_eq!(backoff_delay(40, base, cap), cap);
    }

    #[test]
    fn delay_message_is_retryable_only() {
        let err = CoreError::DelayMessage {
            message_id: "m1".into(),
            address: Address::InProcess {
                participant_id: "p1".into(),
            },
            try_count: 1,
            reason: "transport busy".into(),
        };
        assert!(err.is_retryable());
        assert!(!CoreError::MessageExpired {
            message_id: "m1".into(),
            expiry_ms: 0
        }
        .is_retryable());
    }
}
