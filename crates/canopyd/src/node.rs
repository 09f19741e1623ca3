//! Node event loop.
//!
//! One task owns the discovery engine and the dispatcher. It waits on the
//! engine timer, inbound datagrams and shutdown, and handles each event to
//! completion before taking the next. After every event it publishes an
//! owned [`NodeStatus`] for readers outside the loop.

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};

use canopy_services::{
    topology_dispatcher, CycleOutcome, DispatchOutcome, DiscoveryEngine, Dispatcher, MeshTransport,
    TopologyError, TopologyView,
};

/// What the node loop publishes after each event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub running: bool,
    pub topology: TopologyView,
}

pub struct NodeLoop<T: MeshTransport> {
    engine: DiscoveryEngine<T>,
    dispatcher: Dispatcher<DiscoveryEngine<T>>,
    inbound: mpsc::UnboundedReceiver<Bytes>,
    status: watch::Sender<NodeStatus>,
    shutdown: broadcast::Receiver<()>,
}

impl<T: MeshTransport> NodeLoop<T> {
    pub fn new(
        engine: DiscoveryEngine<T>,
        inbound: mpsc::UnboundedReceiver<Bytes>,
        status: watch::Sender<NodeStatus>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            engine,
            dispatcher: topology_dispatcher(),
            inbound,
            status,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(root = self.engine.is_root(), "node loop starting");
        self.publish();

        loop {
            tokio::select! {
                _ = self.engine.tick() => self.on_tick(),
                packet = self.inbound.recv() => match packet {
                    Some(raw) => self.on_packet(&raw),
                    None => {
                        tracing::info!("inbound channel closed, node loop stopping");
                        break;
                    }
                },
                _ = self.shutdown.recv() => {
                    tracing::info!("node loop shutting down");
                    break;
                }
            }
            self.publish();
        }

        self.engine.stop();
        self.publish();
    }

    fn on_tick(&mut self) {
        match self.engine.run_cycle() {
            Ok(CycleOutcome::Skipped) => {}
            Ok(outcome) => tracing::trace!(?outcome, "topology test done"),
            Err(TopologyError::WrongInterfaceState) => {
                tracing::warn!("interface has no usable address, topology test skipped")
            }
            Err(e) => tracing::warn!(error = %e, "topology test failed"),
        }
    }

    fn on_packet(&mut self, raw: &[u8]) {
        match self.dispatcher.dispatch(&mut self.engine, raw) {
            Ok(DispatchOutcome::Handled(protocol)) => {
                tracing::trace!(%protocol, len = raw.len(), "packet handled")
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "packet dropped"),
        }
    }

    fn publish(&self) {
        self.status.send_replace(NodeStatus {
            running: self.engine.is_running(),
            topology: self.engine.view(),
        });
    }
}
