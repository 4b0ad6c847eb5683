//! Access-control gate: wires the one-shot permission-check callback
//! described in §4.6 around an [`AccessController`] collaborator.

use std::sync::Arc;

use fabric_core::contracts::{AccessController, ConsumerPermission};
use fabric_core::envelope::ImmutableMessage;
use tracing::{trace, warn};

/// Result of running a message through the access-control gate.
pub enum GateOutcome {
    /// Permission granted (or no controller configured); proceed to
    /// `scheduleMessage` unmodified.
    Proceed,
    /// Permission denied; drop the message, no reply synthesized.
    Drop,
    /// Permission undecided; retry with the given (incremented) try count
    /// and backoff.
    Retry { try_count: u32 },
}

/// Holds the optional [`AccessController`] and the ACL audit-mode flag
/// (§4.6: "An ACL audit mode flag may override NO -> YES while still
/// logging the original verdict").
pub struct AccessControlGate {
    controller: Option<Arc<dyn AccessController>>,
    audit_mode: bool,
}

impl AccessControlGate {
    pub fn new(controller: Option<Arc<dyn AccessController>>, audit_mode: bool) -> Self {
        Self {
            controller,
            audit_mode,
        }
    }

    pub fn has_controller(&self) -> bool {
        self.controller.is_some()
    }

    /// Runs the permission check table of §4.6. A message that has
    /// already been checked (`accessControlChecked`) or has no controller
    /// configured proceeds unconditionally.
    pub async fn check(
        &self,
        message: &ImmutableMessage,
        is_local_recipient: bool,
        try_count: u32,
    ) -> GateOutcome {
        let Some(controller) = &self.controller else {
            message.mark_access_control_checked();
            return GateOutcome::Proceed;
        };
        if message.is_access_control_checked() {
            return GateOutcome::Proceed;
        }

        let verdict = controller
            .has_consumer_permission(message, is_local_recipient)
            .await;

        let effective = if self.audit_mode && verdict == ConsumerPermission::No {
            warn!(
                message_id = message.id(),
                "ACL audit mode: overriding NO verdict to YES"
            );
            ConsumerPermission::Yes
        } else {
            verdict
        };

        match effective {
            ConsumerPermission::Yes => {
                message.mark_access_control_checked();
                GateOutcome::Proceed
            }
            ConsumerPermission::No => {
                trace!(message_id = message.id(), "ACL verdict NO, dropping message");
                GateOutcome::Drop
            }
            // Carries the pre-increment try_count, matching
            // handle_transport_failure's convention: the caller computes
            // backoff from this value, then reschedules with try_count + 1.
            ConsumerPermission::Retry => GateOutcome::Retry { try_count },
        }
    }
}
