//! The mesh transport seam.
//!
//! Everything below "send this packet" and "what does the mesh look like
//! from here" lives behind [`MeshTransport`]: radio setup, routing,
//! fragmentation and the multi-hop aggregation of sub-node lists.

use canopy_core::wire::{Address, MeshPacket, WireError};

pub use canopy_core::config::OpMode;

/// Connection state of the mesh stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityPhase {
    Disabled,
    /// Associating with a router or parent.
    WifiConnecting,
    /// Associated, negotiating the mesh link.
    NetConnecting,
    LocalAvailable,
    OnlineAvailable,
    SoftApAvailable,
    LeafAvailable,
}

impl ConnectivityPhase {
    /// Whether a topology test may run in this phase.
    pub fn is_available(self) -> bool {
        matches!(
            self,
            ConnectivityPhase::LocalAvailable
                | ConnectivityPhase::OnlineAvailable
                | ConnectivityPhase::SoftApAvailable
                | ConnectivityPhase::LeafAvailable
        )
    }
}

/// Radio interface an address can be read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    Station,
    SoftAp,
}

/// What the mesh stack reports about this node's attached devices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInfo {
    /// The root's upstream device, if any.
    pub upstream: Option<Address>,
    /// Every directly or indirectly attached sub-node.
    pub subnodes: Vec<Address>,
}

impl NodeInfo {
    /// Split the stack's raw list, which carries the upstream at index 0.
    pub fn from_raw(mut raw: Vec<Address>) -> Self {
        if raw.is_empty() {
            return Self::default();
        }
        let subnodes = raw.split_off(1);
        Self {
            upstream: raw.pop(),
            subnodes,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to query node info: {0}")]
    NodeInfo(String),

    #[error("failed to build packet: {0}")]
    Build(#[from] WireError),

    #[error("send failed: {0}")]
    Send(String),

    #[error("interface address unavailable: {0:?}")]
    Interface(Interface),
}

/// The calls the topology core makes into the mesh stack.
///
/// All calls return immediately. A successful `send` only means the packet
/// was handed over; delivery is never awaited.
pub trait MeshTransport {
    fn is_root(&self) -> bool;

    fn phase(&self) -> ConnectivityPhase;

    fn op_mode(&self) -> OpMode;

    fn interface_address(&self, interface: Interface) -> Result<Address, TransportError>;

    fn node_info(&mut self) -> Result<NodeInfo, TransportError>;

    fn send(&mut self, packet: &MeshPacket) -> Result<(), TransportError>;
}
