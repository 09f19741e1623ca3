//! Handler for topology messages (protocol tag `NONE`).
//!
//! Requests are answered by the root; responses are folded into the
//! registry by non-root nodes. A root hearing a response ignores it.

use anyhow::Result;

use canopy_core::wire::{MeshPacket, OptionKey, ProtocolId};

use crate::discovery::DiscoveryEngine;
use crate::dispatch::{Dispatcher, ProtocolBinding};
use crate::error::TopologyError;
use crate::handler::ProtocolHandler;
use crate::transport::MeshTransport;

pub struct TopologyHandler;

impl<T: MeshTransport> ProtocolHandler<DiscoveryEngine<T>> for TopologyHandler {
    fn handle(&self, engine: &mut DiscoveryEngine<T>, header: &MeshPacket, _payload: &[u8]) -> Result<()> {
        if header.has_option(OptionKey::TOPO_RESP) {
            if engine.is_root() {
                tracing::debug!(src = %header.src, "root ignoring topology response");
                return Ok(());
            }
            let lists = header
                .options(OptionKey::TOPO_RESP)
                .map(|o| o.addresses())
                .collect::<Result<Vec<_>, _>>()
                .map_err(TopologyError::from)?;
            engine.handle_response(header.src, &lists)?;
        } else if header.has_option(OptionKey::TOPO_REQ) {
            engine.handle_request(header)?;
        } else {
            return Err(TopologyError::InvalidArgument(format!(
                "topology packet from {} carries no topology option",
                header.src
            ))
            .into());
        }
        Ok(())
    }
}

/// Dispatch table serving topology messages only.
pub fn topology_dispatcher<T: MeshTransport>() -> Dispatcher<DiscoveryEngine<T>> {
    Dispatcher::new(vec![ProtocolBinding::new(ProtocolId::NONE, TopologyHandler)])
}
