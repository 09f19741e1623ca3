//! Canopy integration test harness.
//!
//! Drives real discovery engines over a recording [`MockTransport`] and a
//! [`ManualClock`], so every scenario is deterministic and needs no network.
//!
//!   cargo test --test integration

mod exchange;
mod registry;
mod scenarios;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use canopy_core::clock::ManualClock;
use canopy_core::wire::{Address, MeshPacket};
use canopy_services::{
    topology_dispatcher, ConnectivityPhase, DispatchOutcome, DiscoveryEngine, Interface,
    MeshTransport, NodeInfo, OpMode, TransportError,
};

// ── Harness ───────────────────────────────────────────────────────────────────

pub const THRESHOLD: Duration = Duration::from_secs(30);
pub const INTERVAL: Duration = Duration::from_secs(15);

pub fn addr(last: u8) -> Address {
    Address::new([0x24, 0x0a, 0xc4, 0x00, 0x00, last])
}

/// Mesh stack stand-in that records every packet handed to it.
pub struct MockTransport {
    pub root: bool,
    pub own: Address,
    pub phase: ConnectivityPhase,
    pub op_mode: OpMode,
    pub info: NodeInfo,
    pub sent: Vec<MeshPacket>,
}

impl MockTransport {
    pub fn node(own: Address) -> Self {
        Self {
            root: false,
            own,
            phase: ConnectivityPhase::LeafAvailable,
            op_mode: OpMode::Station,
            info: NodeInfo::default(),
            sent: Vec::new(),
        }
    }

    pub fn root(own: Address, info: NodeInfo) -> Self {
        Self {
            root: true,
            phase: ConnectivityPhase::OnlineAvailable,
            info,
            ..Self::node(own)
        }
    }

    /// Take every recorded packet, oldest first.
    pub fn drain(&mut self) -> Vec<MeshPacket> {
        std::mem::take(&mut self.sent)
    }
}

impl MeshTransport for MockTransport {
    fn is_root(&self) -> bool {
        self.root
    }

    fn phase(&self) -> ConnectivityPhase {
        self.phase
    }

    fn op_mode(&self) -> OpMode {
        self.op_mode
    }

    fn interface_address(&self, _: Interface) -> Result<Address, TransportError> {
        Ok(self.own)
    }

    fn node_info(&mut self) -> Result<NodeInfo, TransportError> {
        Ok(self.info.clone())
    }

    fn send(&mut self, packet: &MeshPacket) -> Result<(), TransportError> {
        self.sent.push(packet.clone());
        Ok(())
    }
}

/// A started engine over `transport`, driven by `clock`.
pub fn engine(transport: MockTransport, clock: &ManualClock) -> DiscoveryEngine<MockTransport> {
    let mut engine = DiscoveryEngine::new(transport, Arc::new(clock.clone()), THRESHOLD);
    engine.start(INTERVAL).unwrap();
    engine
}

/// Encode `packet` and feed it through the topology dispatcher, as the node
/// loop would for an inbound datagram.
pub fn deliver(engine: &mut DiscoveryEngine<MockTransport>, packet: &MeshPacket) -> Result<DispatchOutcome> {
    let raw = packet.encode()?;
    Ok(topology_dispatcher().dispatch(engine, &raw)?)
}

pub fn members(engine: &DiscoveryEngine<MockTransport>) -> Vec<Address> {
    engine.snapshot().iter().map(|e| e.address).collect()
}
