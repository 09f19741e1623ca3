//! canopy-services — the topology core: registry, discovery engine and
//! packet dispatch, all behind the [`transport::MeshTransport`] seam.

pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod registry;
pub mod topology;
pub mod transport;

pub use discovery::{CycleOutcome, DiscoveryEngine, DiscoverySettings};
pub use dispatch::{DispatchOutcome, Dispatcher, ProtocolBinding};
pub use error::TopologyError;
pub use handler::ProtocolHandler;
pub use registry::{NodeEntry, Registry, TopologyView};
pub use topology::{topology_dispatcher, TopologyHandler};
pub use transport::{ConnectivityPhase, Interface, MeshTransport, NodeInfo, OpMode, TransportError};
