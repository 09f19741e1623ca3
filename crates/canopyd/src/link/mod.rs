//! UDP link transport.
//!
//! Emulates the mesh stack on a LAN: every node multicasts encoded mesh
//! packets to ff02::1 and hears everyone else's. Role, own address and
//! upstream come from configuration. The root's sub-node set is every
//! source address heard within the sub-node timeout.

pub mod socket;

use std::net::SocketAddrV6;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use canopy_core::clock::{Clock, Timestamp};
use canopy_core::config::{MeshConfig, MeshRole};
use canopy_core::wire::{Address, MeshPacket, MAX_PACKET};
use canopy_services::transport::{
    ConnectivityPhase, Interface, MeshTransport, NodeInfo, OpMode, TransportError,
};

/// Static identity of this node on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    pub root: bool,
    pub address: Address,
    pub upstream: Option<Address>,
    pub op_mode: OpMode,
    pub sub_node_timeout: Duration,
}

impl LinkSettings {
    pub fn from_config(mesh: &MeshConfig, sub_node_timeout: Duration) -> Self {
        Self {
            root: mesh.role == MeshRole::Root,
            address: mesh.address,
            upstream: mesh.upstream,
            op_mode: mesh.op_mode,
            sub_node_timeout,
        }
    }

    /// Soft-AP address: the station address with the last octet incremented.
    fn soft_ap_address(&self) -> Address {
        let mut octets = self.address.octets();
        octets[5] = octets[5].wrapping_add(1);
        Address::new(octets)
    }
}

// ── Attached table ────────────────────────────────────────────────────────────

/// Source addresses heard on the link, with the time last heard.
#[derive(Clone)]
pub struct AttachedTable {
    seen: Arc<DashMap<Address, Timestamp>>,
    clock: Arc<dyn Clock>,
}

impl AttachedTable {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            seen: Arc::new(DashMap::new()),
            clock,
        }
    }

    pub fn record(&self, addr: Address) {
        self.seen.insert(addr, self.clock.now());
    }

    /// Addresses heard within `timeout`, oldest first.
    pub fn fresh(&self, timeout: Duration) -> Vec<Address> {
        let now = self.clock.now();
        let mut fresh: Vec<(Timestamp, Address)> = self
            .seen
            .iter()
            .filter(|e| now.saturating_duration_since(*e.value()) <= timeout)
            .map(|e| (*e.value(), *e.key()))
            .collect();
        fresh.sort();
        fresh.into_iter().map(|(_, addr)| addr).collect()
    }

    /// Drop entries older than `timeout`. Returns how many were removed.
    pub fn prune(&self, timeout: Duration) -> usize {
        let now = self.clock.now();
        let before = self.seen.len();
        self.seen
            .retain(|_, seen| now.saturating_duration_since(*seen) <= timeout);
        before - self.seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

struct Outbound {
    socket: socket2::Socket,
    dest: SocketAddrV6,
}

/// [`MeshTransport`] over link-local UDP multicast.
pub struct UdpLinkTransport {
    settings: LinkSettings,
    attached: AttachedTable,
    outbound: Option<Outbound>,
}

impl UdpLinkTransport {
    /// An unbound transport. It reports a connecting phase and refuses to
    /// send until [`UdpLinkTransport::bind`] succeeds.
    pub fn new(settings: LinkSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            attached: AttachedTable::new(clock),
            outbound: None,
        }
    }

    /// Open the send and listen sockets. Returns the receiver half, which
    /// must be driven by [`LinkReceiver::run`].
    pub fn bind(&mut self, port: u16, interface_index: u32) -> Result<LinkReceiver> {
        let send = socket::make_send_socket(interface_index)
            .context("failed to create multicast send socket")?;
        let listen = socket::make_listen_socket(port, interface_index)
            .context("failed to create multicast listen socket")?;
        let listen = UdpSocket::from_std(listen).context("failed to convert to tokio UdpSocket")?;

        self.outbound = Some(Outbound {
            socket: send,
            dest: socket::multicast_dest(port, interface_index)?,
        });
        tracing::info!(port, interface_index, address = %self.settings.address, "link sockets bound");

        Ok(LinkReceiver {
            socket: listen,
            own: self.settings.address,
            attached: self.attached.clone(),
        })
    }
}

impl MeshTransport for UdpLinkTransport {
    fn is_root(&self) -> bool {
        self.settings.root
    }

    fn phase(&self) -> ConnectivityPhase {
        match (&self.outbound, self.settings.root) {
            (None, _) => ConnectivityPhase::NetConnecting,
            (Some(_), true) => ConnectivityPhase::OnlineAvailable,
            (Some(_), false) => ConnectivityPhase::LeafAvailable,
        }
    }

    fn op_mode(&self) -> OpMode {
        self.settings.op_mode
    }

    fn interface_address(&self, interface: Interface) -> Result<Address, TransportError> {
        match interface {
            Interface::Station => Ok(self.settings.address),
            Interface::SoftAp => Ok(self.settings.soft_ap_address()),
        }
    }

    fn node_info(&mut self) -> Result<NodeInfo, TransportError> {
        let removed = self.attached.prune(self.settings.sub_node_timeout);
        if removed > 0 {
            tracing::trace!(removed, remaining = self.attached.len(), "pruned attached table");
        }
        if self.attached.is_empty() {
            tracing::trace!("no sub-nodes heard yet");
        }
        Ok(NodeInfo {
            upstream: self.settings.upstream,
            subnodes: self.attached.fresh(self.settings.sub_node_timeout),
        })
    }

    fn send(&mut self, packet: &MeshPacket) -> Result<(), TransportError> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| TransportError::Send("link is not bound".into()))?;
        let bytes = packet.encode()?;
        match outbound.socket.send_to(&bytes, &outbound.dest.into()) {
            Ok(n) => {
                tracing::trace!(bytes = n, dst = %packet.dst, "datagram sent");
                Ok(())
            }
            Err(e) => Err(TransportError::Send(e.to_string())),
        }
    }
}

// ── Receiver ──────────────────────────────────────────────────────────────────

/// Receive half of the link. Feeds accepted datagrams to the node loop.
pub struct LinkReceiver {
    socket: UdpSocket,
    own: Address,
    attached: AttachedTable,
}

impl LinkReceiver {
    pub async fn run(
        self,
        inbound: mpsc::UnboundedSender<Bytes>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut buf = vec![0u8; MAX_PACKET];
        tracing::info!("link receiver starting");

        loop {
            tokio::select! {
                r = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = match r {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };
                    let Some(raw) = admit(&buf[..len], self.own, &self.attached) else {
                        continue;
                    };
                    tracing::trace!(%peer, len, "datagram accepted");
                    if inbound.send(raw).is_err() {
                        tracing::info!("node loop gone, link receiver stopping");
                        return;
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("link receiver shutting down");
                    return;
                }
            }
        }
    }
}

/// Decide whether a datagram is for this node. Accepted sources are
/// recorded in the attached table.
fn admit(datagram: &[u8], own: Address, attached: &AttachedTable) -> Option<Bytes> {
    let packet = match MeshPacket::decode(datagram) {
        Ok(p) => p,
        Err(e) => {
            tracing::trace!(error = %e, len = datagram.len(), "undecodable datagram dropped");
            return None;
        }
    };
    if packet.src == own {
        tracing::trace!("ignoring own datagram");
        return None;
    }
    if packet.dst != own && !packet.dst.is_broadcast() {
        return None;
    }
    attached.record(packet.src);
    Some(Bytes::copy_from_slice(datagram))
}
