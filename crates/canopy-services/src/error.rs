//! Error kinds of the topology core.
//!
//! Every variant is locally recoverable: the cycle that hit it aborts,
//! drops whatever it had allocated and waits for the next timer tick.

use canopy_core::wire::WireError;

use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// Empty, malformed or otherwise unusable input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A membership mutation was attempted before a root exists.
    #[error("no root is set")]
    NoRoot,

    /// The radio is in a mode from which no own address can be derived.
    #[error("network interface is in the wrong state")]
    WrongInterfaceState,

    /// A transport query or send failed.
    #[error("transport failure: {0}")]
    TransportFailure(#[from] TransportError),

    /// The discovery engine is stopped and owns no registry.
    #[error("discovery engine is not running")]
    NotRunning,
}

impl From<WireError> for TopologyError {
    fn from(e: WireError) -> Self {
        TopologyError::InvalidArgument(e.to_string())
    }
}
