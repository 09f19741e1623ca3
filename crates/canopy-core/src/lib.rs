//! canopy-core — shared types, wire format, clock and configuration.
//! All other Canopy crates depend on this one.

pub mod clock;
pub mod config;
pub mod wire;

pub use clock::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use wire::{Address, MeshOption, MeshPacket, OptionKey, ProtocolId, WireError};
