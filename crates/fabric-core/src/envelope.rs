//! Immutable message envelope (§3, §4.1).
//!
//! Grounded on `spark-core`'s `data_plane`/`protocol` message types: a thin
//! wrapper around an opaque body plus a small fixed header set, with the
//! mutable bits the dispatcher needs (`accessControlChecked`,
//! `receivedFromGlobal`) kept as interior-mutable transient flags rather than
//! serialized fields.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Prefix reserved for caller-supplied headers (§3).
pub const CUSTOM_HEADER_PREFIX: &str = "custom-";

/// Message kind, one of §3's enumerated types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Request,
    Reply,
    OneWay,
    SubscriptionRequest,
    SubscriptionReply,
    SubscriptionPublication,
    SubscriptionStop,
    Multicast,
    MulticastSubscriptionRequest,
}

impl MessageType {
    /// Whether a message of this type is eligible for the configurable
    /// discard-unroutable policy of §4.3. Multicast is handled
    /// separately (never queued, §4.5) so it is excluded here.
    pub fn is_discardable_when_unroutable(self) -> bool {
        matches!(
            self,
            MessageType::Reply
                | MessageType::SubscriptionReply
                | MessageType::SubscriptionPublication
        )
    }

    /// Whether evicting or dropping a message of this type must synthesize
    /// a reply-with-error back to the sender (§4.3, §7).
    pub fn expects_error_reply(self) -> bool {
        matches!(
            self,
            MessageType::Request | MessageType::SubscriptionRequest
        )
    }
}

/// Serializable header/body content of a message, shared behind an `Arc` so
/// cloning an [`ImmutableMessage`] for fan-out never copies the body bytes.
#[derive(Debug, PartialEq, Eq)]
struct Inner {
    id: String,
    message_type: MessageType,
    sender: String,
    recipient: String,
    expiry_date_ms: i64,
    reply_to: Option<Address>,
    effort: Option<String>,
    creator: Option<String>,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
    signature: Vec<u8>,
}

/// An immutable, cheaply cloneable message envelope (§3, §4.1).
///
/// Header values and body bytes are read-only once constructed. The two
/// transient flags (`accessControlChecked`, `receivedFromGlobal`) are not
/// part of `Inner`; they live on the handle itself so clones share their
/// state, mirroring a single logical message passed by reference through
/// the dispatcher.
#[derive(Debug, Clone)]
pub struct ImmutableMessage {
    inner: Arc<Inner>,
    access_control_checked: Arc<AtomicBool>,
    received_from_global: Arc<AtomicBool>,
}

impl PartialEq for ImmutableMessage {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}
impl Eq for ImmutableMessage {}

/// Builder-style constructor parameters, grouped since `ImmutableMessage`
/// has no public way to mutate a field after construction.
pub struct NewMessage {
    pub id: String,
    pub message_type: MessageType,
    pub sender: String,
    pub recipient: String,
    pub expiry_date_ms: i64,
    pub reply_to: Option<Address>,
    pub effort: Option<String>,
    pub creator: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub signature: Vec<u8>,
}

impl ImmutableMessage {
    pub fn new(params: NewMessage) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: params.id,
                message_type: params.message_type,
                sender: params.sender,
                recipient: params.recipient,
                expiry_date_ms: params.expiry_date_ms,
                reply_to: params.reply_to,
                effort: params.effort,
                creator: params.creator,
                headers: params.headers,
                body: params.body,
                signature: params.signature,
            }),
            access_control_checked: Arc::new(AtomicBool::new(false)),
            received_from_global: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn message_type(&self) -> MessageType {
        self.inner.message_type
    }

    pub fn sender(&self) -> &str {
        &self.inner.sender
    }

    pub fn recipient(&self) -> &str {
        &self.inner.recipient
    }

    pub fn expiry_date_ms(&self) -> i64 {
        self.inner.expiry_date_ms
    }

    pub fn reply_to(&self) -> Option<&Address> {
        self.inner.reply_to.as_ref()
    }

    pub fn effort(&self) -> Option<&str> {
        self.inner.effort.as_deref()
    }

    pub fn creator(&self) -> Option<&str> {
        self.inner.creator.as_deref()
    }

    pub fn body(&self) -> &[u8] {
        &self.inner.body
    }

    pub fn signature(&self) -> &[u8] {
        &self.inner.signature
    }

    /// Approximate size for queue byte-capacity accounting (§4.3):
    /// body + signature + a rough header estimate.
    pub fn approx_size_bytes(&self) -> usize {
        let header_bytes: usize = self
            .inner
            .headers
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum();
        self.inner.body.len() + self.inner.signature.len() + header_bytes + self.inner.id.len()
    }

    /// Raw header lookup, prefix included.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.inner.headers.get(key).map(String::as_str)
    }

    /// Custom-header lookup: `key` is given *without* the reserved prefix.
    pub fn custom_header(&self, key: &str) -> Option<&str> {
        let prefixed = format!("{CUSTOM_HEADER_PREFIX}{key}");
        self.inner.headers.get(&prefixed).map(String::as_str)
    }

    /// Iterates custom headers with the reserved prefix stripped.
    pub fn custom_headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.headers.iter().filter_map(|(k, v)| {
            k.strip_prefix(CUSTOM_HEADER_PREFIX)
                .map(|stripped| (stripped, v.as_str()))
        })
    }

    /// Expiry test of §4.1: `now > expiryDateMs ⇒ expired`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.inner.expiry_date_ms
    }

    pub fn is_access_control_checked(&self) -> bool {
        self.access_control_checked.load(Ordering::Acquire)
    }

    pub fn mark_access_control_checked(&self) {
        self.access_control_checked.store(true, Ordering::Release);
    }

    pub fn is_received_from_global(&self) -> bool {
        self.received_from_global.load(Ordering::Acquire)
    }

    pub fn mark_received_from_global(&self) {
        self.received_from_global.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(expiry_date_ms: i64) -> ImmutableMessage {
        let mut headers = BTreeMap::new();
        headers.insert("custom-trace-id".to_string(), "abc123".to_string());
        headers.insert("content-type".to_string(), "application/octet-stream".to_string());
        ImmutableMessage::new(NewMessage {
            id: "m1".into(),
            message_type: MessageType::Request,
            sender: "s1".into(),
            recipient: "r1".into(),
            expiry_date_ms: expiry_date_ms,
            reply_to: None,
            effort: None,
            creator: None,
            headers,
            body: vec![1, 2, 3],
            signature: vec![],
        })
    }

    #[test]
    fn expiry_test_matches_spec() {
        let msg = sample(1_000);
        assert!(!msg.is_expired(1_000));
        assert!(msg.is_expired(1_001));
    }

    #[test]
    fn custom_header_prefix_is_stripped_on_read() {
        let msg = sample(1_000);
        assert_eq!(msg.custom_header("trace-id"), Some("abc123"));
        assert_eq!(msg.header("content-type"), Some("application/octet-stream"));
        let customs: Vec<_> = msg.custom_headers().collect();
        assert_eq!(customs, vec![("trace-id", "abc123")]);
    }

    #[test]
    fn transient_flags_default_false_and_are_shared_across_clones() {
        let msg = sample(1_000);
        assert!(!msg.is_access_control_checked());
        let clone = msg.clone();
        clone.mark_access_control_checked();
        assert!(msg.is_access_control_checked());
    }

    #[test]
    fn clones_share_identity_for_equality() {
        let msg = sample(1_000);
        let clone = msg.clone();
        assert_eq!(msg, clone);
    }
}
