//! Serial command bus (QSPI-style, 4-bit data)
//!
//! The host drives select (active low), a sample clock and a 4-bit data
//! nibble. The [`QspiDecoder`] is the slave side: it turns the nibble stream
//! into byte-wide memory strobes. The [`host`] module is the master side used
//! by tests and the simulator front end.
//!
//! ## Frame layout
//!
//! | Nibbles | Content |
//! |---------|---------|
//! | 0-1 | bit 7 = read flag, bits 6..0 = address bits 22..16 |
//! | 2-5 | address bits 15..0, most significant nibble first |
//! | 6.. | data bytes, high nibble first |

mod decoder;
#[cfg(feature = "alloc")]
pub mod host;

pub use decoder::{DecoderConfig, DecoderInput, DecoderOutput, DecoderState, QspiDecoder};

/// Levels on the serial command bus as driven by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QspiPins {
    /// Select, active low (high = idle)
    pub qss: bool,
    /// Sample clock; the slave takes a nibble on each rising edge
    pub qck: bool,
    /// Data nibble driven by the host (low 4 bits)
    pub qd: u8,
}

impl Default for QspiPins {
    fn default() -> Self {
        Self {
            qss: true,
            qck: false,
            qd: 0,
        }
    }
}

/// Read/write flag in the command byte
pub const CMD_READ: u8 = 0x80;

/// Mask of the address bits carried in the command byte
pub const CMD_ADDR_MASK: u8 = 0x7F;

/// Split a byte into (high, low) nibbles
pub const fn nibbles(byte: u8) -> (u8, u8) {
    (byte >> 4, byte & 0xF)
}
