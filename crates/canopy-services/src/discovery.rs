//! Discovery engine: the periodic topology test.
//!
//! The engine owns the registry and the timer that drives topology tests.
//! What a test does depends on the node's role:
//!
//! - Root: ask the transport for the upstream and attached sub-nodes and
//!   fold them into the registry directly.
//! - Non-root: broadcast a topology request. The root answers with a
//!   response whose source is the root and whose repeated `TOPO_RESP`
//!   options list its sub-nodes; the response arrives later through the
//!   dispatcher and is folded in by [`DiscoveryEngine::handle_response`].
//!
//! Eviction is time-driven: a sub-node disappears only once it has gone
//! unconfirmed for longer than the timeout threshold, never merely because
//! one report left it out.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use canopy_core::clock::Clock;
use canopy_core::config::DiscoveryConfig;
use canopy_core::wire::{
    Address, MeshOption, MeshPacket, OptionKey, ProtocolId, ADDRESSES_PER_OPTION, FLAG_FLOW_REQ,
};

use crate::error::TopologyError;
use crate::registry::{NodeEntry, Registry, TopologyView};
use crate::transport::{Interface, MeshTransport, OpMode, TransportError};

/// Timing parameters of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverySettings {
    /// Interval between topology tests.
    pub interval: Duration,
    /// Members unconfirmed for longer than this are evicted.
    pub timeout_threshold: Duration,
}

impl From<&DiscoveryConfig> for DiscoverySettings {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            interval: config.interval(),
            timeout_threshold: config.sub_node_timeout(),
        }
    }
}

/// Result of one topology test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The mesh link is not up; nothing was done.
    Skipped,
    /// Root role: the registry was refreshed from the transport.
    Refreshed { added: usize, evicted: usize },
    /// Non-root role: a topology request was broadcast.
    RequestSent,
}

struct Timer {
    period: Duration,
    interval: Option<Interval>,
}

impl Timer {
    fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    // The interval is created on first poll so arming needs no runtime.
    async fn tick(&mut self) {
        let period = self.period;
        let interval = self.interval.get_or_insert_with(|| {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        interval.tick().await;
    }
}

/// Periodic, role-dependent topology discovery over a [`MeshTransport`].
pub struct DiscoveryEngine<T> {
    transport: T,
    clock: Arc<dyn Clock>,
    timeout_threshold: Duration,
    registry: Option<Registry>,
    timer: Option<Timer>,
}

impl<T: MeshTransport> DiscoveryEngine<T> {
    /// Create a stopped engine. Call [`DiscoveryEngine::start`] to begin.
    pub fn new(transport: T, clock: Arc<dyn Clock>, timeout_threshold: Duration) -> Self {
        Self {
            transport,
            clock,
            timeout_threshold,
            registry: None,
            timer: None,
        }
    }

    /// Create the registry if needed and (re-)arm the periodic timer.
    ///
    /// The first tick fires one `interval` after arming. A zero interval is
    /// rejected and leaves the engine as it was.
    pub fn start(&mut self, interval: Duration) -> Result<(), TopologyError> {
        if interval.is_zero() {
            return Err(TopologyError::InvalidArgument(
                "topology test interval must be non-zero".into(),
            ));
        }
        if self.registry.is_none() {
            self.registry = Some(Registry::new(self.clock.clone()));
        }
        self.timer = Some(Timer::new(interval));
        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            root = self.transport.is_root(),
            "periodic topology tests enabled"
        );
        Ok(())
    }

    /// Disarm the timer and release the registry.
    pub fn stop(&mut self) {
        self.timer = None;
        self.registry = None;
        tracing::info!("periodic topology tests disabled");
    }

    pub fn is_running(&self) -> bool {
        self.registry.is_some()
    }

    /// Resolves when the armed timer fires. Never resolves while stopped.
    pub async fn tick(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => timer.tick().await,
            None => std::future::pending().await,
        }
    }

    pub fn registry(&self) -> Option<&Registry> {
        self.registry.as_ref()
    }

    pub fn root(&self) -> Option<NodeEntry> {
        self.registry.as_ref().and_then(Registry::root)
    }

    /// Members of the current registry; empty while stopped.
    pub fn snapshot(&self) -> &[NodeEntry] {
        self.registry.as_ref().map(Registry::snapshot).unwrap_or(&[])
    }

    /// Owned copy of the registry for other tasks.
    pub fn view(&self) -> TopologyView {
        self.registry.as_ref().map(Registry::view).unwrap_or_default()
    }

    pub fn is_root(&self) -> bool {
        self.transport.is_root()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Run one topology test for the node's current role.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, TopologyError> {
        if self.registry.is_none() {
            return Err(TopologyError::NotRunning);
        }

        let phase = self.transport.phase();
        if !phase.is_available() {
            tracing::trace!(?phase, "mesh not available, skipping topology test");
            return Ok(CycleOutcome::Skipped);
        }

        if self.transport.is_root() {
            self.refresh_from_transport()
        } else {
            self.send_request()
        }
    }

    /// Fold a topology response into the registry.
    ///
    /// `source` becomes (or stays) the root; each entry of `member_lists` is
    /// the decoded address list of one `TOPO_RESP` option occurrence.
    /// Returns the number of members added.
    pub fn handle_response(
        &mut self,
        source: Address,
        member_lists: &[Vec<Address>],
    ) -> Result<usize, TopologyError> {
        let registry = self.registry.as_mut().ok_or(TopologyError::NotRunning)?;

        registry.set_root(source)?;
        registry.touch(&[source]);

        let mut added = 0;
        for list in member_lists {
            added += registry.add(list)?;
            registry.touch(list);
        }

        let evicted = registry.evict_stale(self.timeout_threshold, self.clock.now());
        tracing::debug!(root = %source, added, evicted, "topology response processed");
        registry.log_contents();
        Ok(added)
    }

    /// Answer a topology request. Only the root answers; returns whether a
    /// response was sent.
    pub fn handle_request(&mut self, request: &MeshPacket) -> Result<bool, TopologyError> {
        if !self.transport.is_root() {
            return Ok(false);
        }
        let members: Vec<Address> = self
            .registry
            .as_ref()
            .ok_or(TopologyError::NotRunning)?
            .snapshot()
            .iter()
            .map(|e| e.address)
            .collect();
        let src = self.own_address()?;

        let mut response = MeshPacket::new(request.src, src, ProtocolId::NONE);
        if members.is_empty() {
            response.add_option(
                MeshOption::with_addresses(OptionKey::TOPO_RESP, &[]).map_err(TransportError::from)?,
            );
        }
        for chunk in members.chunks(ADDRESSES_PER_OPTION) {
            response.add_option(
                MeshOption::with_addresses(OptionKey::TOPO_RESP, chunk)
                    .map_err(TransportError::from)?,
            );
        }

        self.transport.send(&response)?;
        tracing::trace!(to = %request.src, members = members.len(), "topology response sent");
        Ok(true)
    }

    fn refresh_from_transport(&mut self) -> Result<CycleOutcome, TopologyError> {
        let info = self.transport.node_info()?;
        let registry = self.registry.as_mut().ok_or(TopologyError::NotRunning)?;

        if let Some(upstream) = info.upstream {
            match registry.set_root(upstream) {
                Ok(_) => {
                    registry.touch(&[upstream]);
                }
                Err(e) => tracing::warn!(error = %e, "failed to set the root device"),
            }
        }

        let mut added = 0;
        if !info.subnodes.is_empty() {
            match registry.add(&info.subnodes) {
                Ok(n) => {
                    added = n;
                    registry.touch(&info.subnodes);
                }
                Err(e) => tracing::warn!(error = %e, "failed to add new sub-nodes"),
            }
        }

        let evicted = registry.evict_stale(self.timeout_threshold, self.clock.now());
        tracing::debug!(added, evicted, members = registry.len(), "root topology test complete");
        registry.log_contents();
        Ok(CycleOutcome::Refreshed { added, evicted })
    }

    fn send_request(&mut self) -> Result<CycleOutcome, TopologyError> {
        let src = self.own_address()?;

        let mut request = MeshPacket::new(Address::BROADCAST, src, ProtocolId::NONE)
            .with_flags(FLAG_FLOW_REQ);
        request.add_option(
            MeshOption::with_addresses(OptionKey::TOPO_REQ, &[Address::BROADCAST])
                .map_err(TransportError::from)?,
        );

        self.transport.send(&request)?;
        tracing::trace!(src = %src, "topology request broadcast");
        Ok(CycleOutcome::RequestSent)
    }

    fn own_address(&self) -> Result<Address, TopologyError> {
        let interface = match self.transport.op_mode() {
            OpMode::SoftAp => Interface::SoftAp,
            OpMode::Station | OpMode::StationAp => Interface::Station,
            OpMode::Null => return Err(TopologyError::WrongInterfaceState),
        };
        Ok(self.transport.interface_address(interface)?)
    }
}
