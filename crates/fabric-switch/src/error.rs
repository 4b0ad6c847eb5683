//! Dispatch-level error domain, layered over [`fabric_core::error::CoreError`].
//!
//! Grounded on `spark-switch::error::SwitchError`: wraps the lower-layer
//! error type rather than duplicating its variants, and adds only the
//! failure modes that are specific to orchestration (no global transport
//! configured, rejecting work after shutdown).

use thiserror::Error;

use fabric_core::error::CoreError;

#[derive(Debug, Error, Clone)]
pub enum SwitchError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("no global transport configured for this node")]
    NoGlobalTransport,

    #[error("dispatcher is shutting down, message `{message_id}` rejected")]
    ShuttingDown { message_id: String },

    #[error("no multicast skeleton registered for provider `{provider_id}`")]
    NoMulticastSkeleton { provider_id: String },
}

impl SwitchError {
    /// Stable, cross-crate error code, analogous to `spark_switch`'s own
    /// dotted codes and to [`CoreError::code`].
    pub fn code(&self) -> &'static str {
        match self {
            SwitchError::Core(inner) => inner.code(),
            SwitchError::NoGlobalTransport => "switch.transport.no_global",
            SwitchError::ShuttingDown { .. } => "switch.lifecycle.shutting_down",
            SwitchError::NoMulticastSkeleton { .. } => "switch.multicast.no_skeleton",
        }
    }
}
