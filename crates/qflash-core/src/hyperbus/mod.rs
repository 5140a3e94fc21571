//! HyperBus flash programming
//!
//! The [`Sequencer`] drives a HyperFlash device over an 8-bit DDR bus. Every
//! bus operation is one 64-bit [`Packet`] (48-bit command/address header plus
//! a 16-bit payload) shifted out MSB byte first, one byte per edge of the
//! output clock, framed by chip-select.

pub mod monitor;
pub mod opcodes;
mod packet;
mod pins;
mod sequencer;
mod status;

pub use monitor::{BusMonitor, BusWindow};
pub use packet::{AddressSpace, Burst, Direction, Packet, ShiftRegister};
pub use pins::{HyperbusInputs, HyperbusPins};
pub use sequencer::{
    FlashCommand, Phase, Sequencer, SequencerConfig, SequencerInput, SequencerOutput,
    SequencerState, ERASE_SEQUENCE, WRITE_PREAMBLE,
};
pub use status::StatusRegister;

/// Output clock edges for one command/data packet
pub const PHASE_EDGES: u8 = 8;

/// Output clock edges for a read header (command/address only)
pub const HEADER_EDGES: u8 = 6;

/// Output clock edges for the status word
pub const STATUS_DATA_EDGES: u8 = 2;

/// Default initial read latency, in clocks
pub const DEFAULT_LATENCY: u8 = 16;

/// Latency edges between the read header and the first data byte
///
/// Two edges per clock, less the clock already spent on the header's last
/// edge pair.
pub const fn latency_edges(latency: u8) -> u8 {
    2 * latency - 2
}
