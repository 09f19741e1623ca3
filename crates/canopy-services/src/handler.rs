//! Handler trait for protocol-tagged inbound packets.
//!
//! The dispatcher hands every decoded packet to the handler bound to its
//! protocol tag, together with a mutable context owned by the node loop.
//! Handlers run to completion before the next packet is taken.

use anyhow::Result;
use canopy_core::wire::MeshPacket;

/// Trait for anything that consumes packets of one protocol.
///
/// `C` is the context the handler may mutate, typically the discovery engine.
pub trait ProtocolHandler<C>: Send {
    /// Handle one packet. `payload` is the user-data section, or the whole
    /// raw packet when the packet carries no user data.
    fn handle(&self, ctx: &mut C, header: &MeshPacket, payload: &[u8]) -> Result<()>;
}

impl<C, F> ProtocolHandler<C> for F
where
    F: Fn(&mut C, &MeshPacket, &[u8]) -> Result<()> + Send,
{
    fn handle(&self, ctx: &mut C, header: &MeshPacket, payload: &[u8]) -> Result<()> {
        self(ctx, header, payload)
    }
}
