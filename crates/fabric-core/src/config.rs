//! Router settings (§6), loaded from TOML or environment: a plain serde
//! struct with documented defaults, no hidden global state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_send_msg_retry_interval_ms() -> u64 {
    10_000
}

fn default_routed_message_print_interval_s() -> u64 {
    60
}

/// Every tunable enumerated in §6, with the defaults stated
/// explicitly (unbounded queue caps, ACL audit off, discard-unroutable on)
/// and reasonable values for the two left to the implementer
/// (`sendMsgRetryIntervalMs`, `routedMessagePrintIntervalS`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterSettings {
    pub message_queue_limit: Option<usize>,
    pub per_participant_id_message_queue_limit: Option<usize>,
    pub message_queue_limit_bytes: Option<usize>,

    pub transport_not_available_queue_limit: Option<usize>,
    pub transport_not_available_queue_limit_bytes: Option<usize>,

    #[serde(default = "default_send_msg_retry_interval_ms")]
    pub send_msg_retry_interval_ms: u64,

    #[serde(default)]
    pub acl_audit: bool,

    #[serde(default = "default_discard_unroutable")]
    pub discard_unroutable_replies_and_publications: bool,

    #[serde(default = "default_routed_message_print_interval_s")]
    pub routed_message_print_interval_s: u64,

    #[serde(default)]
    pub ttl_uplift_ms: i64,
}

fn default_discard_unroutable() -> bool {
    true
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            message_queue_limit: None,
            per_participant_id_message_queue_limit: None,
            message_queue_limit_bytes: None,
            transport_not_available_queue_limit: None,
            transport_not_available_queue_limit_bytes: None,
            send_msg_retry_interval_ms: default_send_msg_retry_interval_ms(),
            acl_audit: false,
            discard_unroutable_replies_and_publications: default_discard_unroutable(),
            routed_message_print_interval_s: default_routed_message_print_interval_s(),
            ttl_uplift_ms: 0,
        }
    }
}

/// Prefix for the environment-override names read by
/// [`RouterSettings::apply_env_overrides`], e.g. `FABRIC_ROUTER_ACL_AUDIT`.
const ENV_PREFIX: &str = "FABRIC_ROUTER_";

impl RouterSettings {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Overlays environment variables named `FABRIC_ROUTER_<SCREAMING_SNAKE
    /// field name>` on top of an already-loaded settings value. This
    /// router has one fixed set of knobs rather than an open schema, so a
    /// flat `env::var` per field stands in for a full layered-source
    /// merge. Unset or unparsable variables are left as-is.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(v) = env_usize_opt("MESSAGE_QUEUE_LIMIT") {
            self.message_queue_limit = v;
        }
        if let Some(v) = env_usize_opt("PER_PARTICIPANT_ID_MESSAGE_QUEUE_LIMIT") {
            self.per_participant_id_message_queue_limit = v;
        }
        if let Some(v) = env_usize_opt("MESSAGE_QUEUE_LIMIT_BYTES") {
            self.message_queue_limit_bytes = v;
        }
        if let Some(v) = env_usize_opt("TRANSPORT_NOT_AVAILABLE_QUEUE_LIMIT") {
            self.transport_not_available_queue_limit = v;
        }
        if let Some(v) = env_usize_opt("TRANSPORT_NOT_AVAILABLE_QUEUE_LIMIT_BYTES") {
            self.transport_not_available_queue_limit_bytes = v;
        }
        if let Some(v) = env_parsed::<u64>("SEND_MSG_RETRY_INTERVAL_MS") {
            self.send_msg_retry_interval_ms = v;
        }
        if let Some(v) = env_parsed::<bool>("ACL_AUDIT") {
            self.acl_audit = v;
        }
        if let Some(v) = env_parsed::<bool>("DISCARD_UNROUTABLE_REPLIES_AND_PUBLICATIONS") {
            self.discard_unroutable_replies_and_publications = v;
        }
        if let Some(v) = env_parsed::<u64>("ROUTED_MESSAGE_PRINT_INTERVAL_S") {
            self.routed_message_print_interval_s = v;
        }
        if let Some(v) = env_parsed::<i64>("TTL_UPLIFT_MS") {
            self.ttl_uplift_ms = v;
        }
        self
    }

    pub fn send_msg_retry_interval(&self) -> Duration {
        Duration::from_millis(self.send_msg_retry_interval_ms)
    }

    pub fn routed_message_print_interval(&self) -> Duration {
        Duration::from_secs(self.routed_message_print_interval_s)
    }

    pub fn ttl_uplift(&self) -> Duration {
        Duration::from_millis(self.ttl_uplift_ms.max(0) as u64)
    }
}

fn env_parsed<T: std::str::FromStr>(suffix: &str) -> Option<T> {
    std::env::var(format!("{ENV_PREFIX}{suffix}"))
        .ok()
        .and_then(|raw| raw.parse().ok())
}

fn env_usize_opt(suffix: &str) -> Option<Option<usize>> {
    std::env::var(format!("{ENV_PREFIX}{suffix}"))
        .ok()
        .map(|raw| raw.parse::<usize>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_defaults() {
        let settings = RouterSettings::default();
        assert_eq!(settings.message_queue_limit, None);
        assert!(!settings.acl_audit);
        assert!(settings.discard_unroutable_replies_and_publications);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let settings = RouterSettings::from_toml_str(
            r#"
            aclAudit = true
            messageQueueLimit = 500
            "#,
        )
        .unwrap();
        assert!(settings.acl_audit);
        assert_eq!(settings.message_queue_limit, Some(500));
        assert_eq!(settings.send_msg_retry_interval_ms, default_send_msg_retry_interval_ms());
    }

    #[test]
    fn env_overrides_apply_on_top_of_defaults() {
        // SAFETY: test-local env vars with a name unique to this test, set
        // and cleared within the same test body.
        unsafe {
            std::env::set_var("FABRIC_ROUTER_ACL_AUDIT", "true");
            std::env::set_var("FABRIC_ROUTER_SEND_MSG_RETRY_INTERVAL_MS", "42");
        }
        let settings = RouterSettings::default().apply_env_overrides();
        unsafe {
            std::env::remove_var("FABRIC_ROUTER_ACL_AUDIT");
            std::env::remove_var("FABRIC_ROUTER_SEND_MSG_RETRY_INTERVAL_MS");
        }
        assert!(settings.acl_audit);
        assert_eq!(settings.send_msg_retry_interval_ms, 42);
    }
}
