//! Routes inbound packets to protocol handlers by protocol tag.

use canopy_core::wire::{MeshPacket, ProtocolId};

use crate::error::TopologyError;
use crate::handler::ProtocolHandler;

/// One row of the dispatch table. A binding without a handler marks a
/// protocol that is known but not served.
pub struct ProtocolBinding<C> {
    pub protocol: ProtocolId,
    pub handler: Option<Box<dyn ProtocolHandler<C>>>,
}

impl<C> ProtocolBinding<C> {
    pub fn new(protocol: ProtocolId, handler: impl ProtocolHandler<C> + 'static) -> Self {
        Self {
            protocol,
            handler: Some(Box::new(handler)),
        }
    }

    pub fn unhandled(protocol: ProtocolId) -> Self {
        Self {
            protocol,
            handler: None,
        }
    }
}

/// What became of a dispatched packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The bound handler ran and succeeded.
    Handled(ProtocolId),
    /// The bound handler ran and returned an error.
    HandlerFailed(ProtocolId),
    /// The protocol is in the table but has no handler.
    NoHandler(ProtocolId),
    /// The protocol is not in the table.
    Unsupported(ProtocolId),
    /// The header could not be decoded.
    Unresolved,
}

/// Static protocol table. Built once, read-only afterwards.
pub struct Dispatcher<C> {
    bindings: Vec<ProtocolBinding<C>>,
}

impl<C> Dispatcher<C> {
    pub fn new(bindings: Vec<ProtocolBinding<C>>) -> Self {
        Self { bindings }
    }

    pub fn protocols(&self) -> impl Iterator<Item = ProtocolId> + '_ {
        self.bindings.iter().map(|b| b.protocol)
    }

    /// Dispatch one raw packet.
    ///
    /// Only an empty packet is an error. Every other failure drops the
    /// packet, logs it and is reported through the outcome.
    pub fn dispatch(&self, ctx: &mut C, raw: &[u8]) -> Result<DispatchOutcome, TopologyError> {
        if raw.is_empty() {
            return Err(TopologyError::InvalidArgument("empty packet".into()));
        }

        let packet = match MeshPacket::decode(raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, len = raw.len(), "failed to resolve protocol");
                return Ok(DispatchOutcome::Unresolved);
            }
        };
        let protocol = packet.protocol;
        let payload = packet.user_data().unwrap_or(raw);

        let Some(binding) = self.bindings.iter().find(|b| b.protocol == protocol) else {
            tracing::warn!(%protocol, src = %packet.src, "protocol is not supported");
            return Ok(DispatchOutcome::Unsupported(protocol));
        };
        let Some(handler) = binding.handler.as_ref() else {
            tracing::warn!(%protocol, "no handler bound for protocol");
            return Ok(DispatchOutcome::NoHandler(protocol));
        };

        match handler.handle(ctx, &packet, payload) {
            Ok(()) => Ok(DispatchOutcome::Handled(protocol)),
            Err(e) => {
                tracing::warn!(%protocol, src = %packet.src, error = %e, "protocol handler failed");
                Ok(DispatchOutcome::HandlerFailed(protocol))
            }
        }
    }
}
